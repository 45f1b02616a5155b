//! Inverted index from `(tag key, tag value)` to the time-series carrying
//! that tag.

use std::collections::{BTreeSet, HashMap};

/// tag key -> tag value -> full paths of the leaves tagged with it.
///
/// Value sets that empty out on removal are kept in place so a key that was
/// ever indexed keeps answering queries, with an empty result.
#[derive(Debug, Default)]
pub(crate) struct TagIndex {
    index: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl TagIndex {
    pub(crate) fn insert(&mut self, path: &str, tags: &HashMap<String, String>) {
        for (key, value) in tags {
            self.index
                .entry(key.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(path.to_string());
        }
    }

    /// Remove `path` from every `(key, value)` set it participates in.
    pub(crate) fn remove(&mut self, path: &str, tags: &HashMap<String, String>) {
        for (key, value) in tags {
            if let Some(values) = self.index.get_mut(key) {
                if let Some(paths) = values.get_mut(value) {
                    paths.remove(path);
                }
            }
        }
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Paths whose `key` tag matches `value`; substring match when
    /// `contains`, exact match otherwise. Sorted by path.
    pub(crate) fn matching_paths(&self, key: &str, value: &str, contains: bool) -> BTreeSet<String> {
        let mut matched = BTreeSet::new();
        if let Some(values) = self.index.get(key) {
            for (tag_value, paths) in values {
                let hit = if contains {
                    tag_value.contains(value)
                } else {
                    tag_value == value
                };
                if hit {
                    matched.extend(paths.iter().cloned());
                }
            }
        }
        matched
    }
}
