//! Runtime configuration for the metadata catalog.

use std::path::PathBuf;

/// Knobs governing the on-disk layout and in-memory behavior of the catalog.
#[derive(Debug, Clone)]
pub struct MetaConfig {
    /// Directory holding the operation log and the tag file.
    pub schema_dir: PathBuf,

    /// Capacity of the device-node cache.
    pub node_cache_size: usize,

    /// Size in bytes of one tag/attribute record in the tag file.
    pub tag_attribute_total_size: usize,

    /// Materialize a missing storage group when a time-series is created
    /// below it.
    pub auto_create_schema_enabled: bool,

    /// Tree depth at which auto-created storage groups are placed (root is
    /// depth 0).
    pub default_storage_group_level: usize,

    /// Gates adapter notifications and per-group series accounting.
    pub enable_parameter_adapter: bool,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_dir: PathBuf::from("data/system/schema"),
            node_cache_size: 300_000,
            tag_attribute_total_size: 700,
            auto_create_schema_enabled: true,
            default_storage_group_level: 1,
            enable_parameter_adapter: true,
        }
    }
}

impl MetaConfig {
    /// Configuration rooted at `schema_dir`, defaults elsewhere.
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
            ..Self::default()
        }
    }
}
