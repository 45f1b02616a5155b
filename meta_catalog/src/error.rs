use crate::adapter::Veto;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("path [{path}] is illegal")]
    IllegalPath { path: String },

    #[error("path [{path}] does not exist")]
    PathNotExist { path: String },

    #[error("path [{path}] already exists")]
    PathAlreadyExist { path: String },

    #[error("storage group is not set for path [{path}]")]
    StorageGroupNotSet { path: String },

    #[error("storage group [{path}] has already been set")]
    StorageGroupAlreadySet { path: String },

    #[error("node [{path}] is not a {expected}")]
    UnexpectedNodeKind {
        path: String,
        expected: &'static str,
    },

    #[error("the key {key} is not a tag")]
    NotATagKey { key: String },

    #[error("tag/attribute payload of {size} bytes exceeds the record size of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("tag record at offset {offset} is corrupt: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("malformed metadata log entry [{line}]: {reason}")]
    MalformedLogEntry { line: String, reason: String },

    #[error("adapter rejected the change: {0}")]
    AdapterVeto(#[from] Veto),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetadataError {
    pub(crate) fn illegal_path(path: impl Into<String>) -> Self {
        Self::IllegalPath { path: path.into() }
    }

    pub(crate) fn path_not_exist(path: impl Into<String>) -> Self {
        Self::PathNotExist { path: path.into() }
    }

    pub(crate) fn path_already_exist(path: impl Into<String>) -> Self {
        Self::PathAlreadyExist { path: path.into() }
    }

    pub(crate) fn storage_group_not_set(path: impl Into<String>) -> Self {
        Self::StorageGroupNotSet { path: path.into() }
    }

    pub(crate) fn storage_group_already_set(path: impl Into<String>) -> Self {
        Self::StorageGroupAlreadySet { path: path.into() }
    }
}
