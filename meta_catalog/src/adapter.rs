//! Interfaces to the external collaborators the catalog drives: the dynamic
//! configuration adapter, which may veto capacity changes, and the storage
//! engine, which owns the data files of each storage group.

use std::fmt::Debug;

/// Refusal returned by a [`ConfigAdapter`] when a requested capacity change
/// cannot be absorbed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct Veto(pub String);

/// Consumer of catalog capacity changes.
///
/// `adjust_*` calls are made while the catalog write lock is held, before the
/// operation is logged; an `Err` makes the catalog reverse the tree mutation
/// and surface the veto to the caller. The counter hooks are best-effort and
/// cannot fail.
pub trait ConfigAdapter: Debug + Send + Sync {
    /// Account for `delta` time-series being created (positive) or dropped
    /// (negative).
    fn adjust_time_series(&self, delta: i32) -> Result<(), Veto>;

    /// Account for `delta` storage groups being created or dropped.
    fn adjust_storage_groups(&self, delta: i32) -> Result<(), Veto>;

    /// A storage group came into existence.
    fn init_counter(&self, _storage_group: &str) {}

    /// A storage group was removed.
    fn delete_counter(&self, _storage_group: &str) {}
}

/// A [`ConfigAdapter`] that accepts every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedAdapter;

impl ConfigAdapter for UnlimitedAdapter {
    fn adjust_time_series(&self, _delta: i32) -> Result<(), Veto> {
        Ok(())
    }

    fn adjust_storage_groups(&self, _delta: i32) -> Result<(), Veto> {
        Ok(())
    }
}

/// Owner of the raw data files of each storage group.
pub trait StorageEngine: Debug + Send + Sync {
    /// Drop every data file owned by `storage_group`. Called when a delete
    /// leaves the group without any time-series.
    fn delete_all_data_files(&self, storage_group: &str) -> std::io::Result<()>;
}

/// A [`StorageEngine`] that owns no files.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorageEngine;

impl StorageEngine for NoopStorageEngine {
    fn delete_all_data_files(&self, _storage_group: &str) -> std::io::Result<()> {
        Ok(())
    }
}
