//! # Metadata Catalog
//!
//! The catalog is the metadata management system of the database. It holds
//! the hierarchical schema tree (storage groups, devices, and measurement
//! leaves addressed by dotted path), an inverted index for tag-based series
//! discovery, per-storage-group series accounting, and a bounded device-node
//! cache, all behind a single process-wide reader/writer lock.
//!
//! ## Persistence
//!
//! The catalog persists its state to two files inside the configured schema
//! directory:
//!
//! ### 1. Operation log (`mlog.txt`)
//!
//! An append-only, newline-delimited text journal with one catalog mutation
//! per line, fields comma-separated:
//!
//! ```text
//! set_storage_group,root.sg1
//! create_timeseries,root.sg1.d1.s1,1,0,1,,,-1
//! set_ttl,root.sg1,604800000
//! delete_timeseries,root.sg1.d1.s1
//! delete_storage_group,root.sg1
//! ```
//!
//! Every committed mutation appends exactly one line, flushed before the
//! caller observes success. On startup the log is replayed against an empty
//! tree; a line that fails to parse or apply is reported and skipped, so
//! recovery never aborts on a single bad record.
//!
//! ### 2. Tag file (`tlog.bin`)
//!
//! A binary side file of fixed-size records, each holding a series' tag and
//! attribute maps as two length-prefixed big-endian map serializations,
//! zero-padded to the configured record size. Leaves store the byte offset
//! of their record; records are never rewritten or reclaimed.
//!
//! The tree recovered by replay is byte-equivalent to the pre-restart tree
//! provided the tag file travels with the log.

pub mod adapter;
mod cache;
pub mod config;
mod counters;
pub mod error;
mod index;
pub mod log;
pub mod manager;
pub mod node;
pub mod path;
pub mod schema;
pub mod tag_file;
pub mod tree;

pub use error::MetadataError;
pub use manager::{
    CreateTimeSeriesRequest, MetaManager, ShowTimeSeriesQuery, TagFilter, TimeSeriesRow,
};

pub(crate) type Result<T, E = MetadataError> = std::result::Result<T, E>;
