//! Dotted-path utilities.
//!
//! A path is a dot-separated identifier sequence rooted at the literal
//! `root`; `*` is the wildcard segment.

use crate::{MetadataError, Result};

pub const PATH_ROOT: &str = "root";
pub const PATH_SEPARATOR: char = '.';
pub const PATH_WILDCARD: &str = "*";

/// Reserved name of the time column; never a valid leaf.
pub const TIME_COLUMN_NAME: &str = "time";

/// Split a path into its segments, checking that it is rooted and free of
/// empty segments.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    if segments[0] != PATH_ROOT || segments.iter().any(|s| s.is_empty()) {
        return Err(MetadataError::illegal_path(path));
    }
    Ok(segments)
}

/// The prefix of `path` down to `level` (root is level 0): the storage-group
/// name used when schemas are created automatically.
pub fn storage_group_name_by_level(path: &str, level: usize) -> Result<String> {
    let segments = split_path(path)?;
    if segments.len() <= level {
        return Err(MetadataError::illegal_path(path));
    }
    Ok(segments[..=level].join("."))
}

/// Whether `path` starts with `prefix_pattern`, where a `*` segment of the
/// pattern matches any single segment. Segments of `path` beyond the pattern
/// are unconstrained.
pub fn matches_path_prefix(path: &str, prefix_pattern: &[&str]) -> bool {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    if segments.len() < prefix_pattern.len() {
        return false;
    }
    prefix_pattern
        .iter()
        .zip(&segments)
        .all(|(pattern, segment)| *pattern == PATH_WILDCARD || pattern == segment)
}
