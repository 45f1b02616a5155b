//! The append-only metadata operation log.
//!
//! One catalog mutation per line, UTF-8, fields comma-separated. The log is
//! replayed at startup to rebuild the in-memory tree; a line that fails to
//! parse or apply is reported and skipped, never aborting recovery.
//!
//! Line layouts:
//!
//! ```text
//! create_timeseries,<path>,<type id>,<encoding id>,<compressor id>,<k=v&k=v>,<alias>,<tag offset>
//! delete_timeseries,<path>
//! set_storage_group,<path>
//! delete_storage_group,<path>[,<path>...]
//! set_ttl,<path>,<ttl millis>
//! ```
//!
//! Empty `props` and `alias` fields mean absent; a tag offset of `-1` means
//! the series has no tag record.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::schema::{CompressionType, TsDataType, TsEncoding};
use crate::{MetadataError, Result};

/// File name of the operation log inside the schema directory.
pub const META_LOG: &str = "mlog.txt";

const CREATE_TIMESERIES: &str = "create_timeseries";
const DELETE_TIMESERIES: &str = "delete_timeseries";
const SET_STORAGE_GROUP: &str = "set_storage_group";
const DELETE_STORAGE_GROUP: &str = "delete_storage_group";
const SET_TTL: &str = "set_ttl";

/// One recorded catalog mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaLogEntry {
    CreateTimeSeries {
        path: String,
        data_type: TsDataType,
        encoding: TsEncoding,
        compressor: CompressionType,
        props: HashMap<String, String>,
        alias: Option<String>,
        tag_offset: Option<u64>,
    },
    DeleteTimeSeries {
        path: String,
    },
    SetStorageGroup {
        path: String,
    },
    DeleteStorageGroups {
        paths: Vec<String>,
    },
    SetTtl {
        path: String,
        ttl: u64,
    },
}

impl MetaLogEntry {
    /// Parse one log line.
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = |reason: &str| MetadataError::MalformedLogEntry {
            line: line.to_string(),
            reason: reason.to_string(),
        };
        let fields: Vec<&str> = line.trim().split(',').collect();
        match fields[0] {
            CREATE_TIMESERIES => {
                if fields.len() < 8 {
                    return Err(malformed("expected 8 fields"));
                }
                let data_type = fields[2]
                    .parse::<u16>()
                    .ok()
                    .and_then(TsDataType::from_id)
                    .ok_or_else(|| malformed("bad data type id"))?;
                let encoding = fields[3]
                    .parse::<u16>()
                    .ok()
                    .and_then(TsEncoding::from_id)
                    .ok_or_else(|| malformed("bad encoding id"))?;
                let compressor = fields[4]
                    .parse::<u16>()
                    .ok()
                    .and_then(CompressionType::from_id)
                    .ok_or_else(|| malformed("bad compressor id"))?;
                let props = parse_props(fields[5])
                    .ok_or_else(|| malformed("bad props, expected k=v&k=v"))?;
                let alias = if fields[6].is_empty() {
                    None
                } else {
                    Some(fields[6].to_string())
                };
                let tag_offset = if fields[7].is_empty() {
                    None
                } else {
                    let raw = fields[7]
                        .parse::<i64>()
                        .map_err(|_| malformed("bad tag offset"))?;
                    if raw < 0 {
                        None
                    } else {
                        Some(raw as u64)
                    }
                };
                Ok(Self::CreateTimeSeries {
                    path: fields[1].to_string(),
                    data_type,
                    encoding,
                    compressor,
                    props,
                    alias,
                    tag_offset,
                })
            }
            DELETE_TIMESERIES => {
                if fields.len() < 2 {
                    return Err(malformed("expected a path"));
                }
                Ok(Self::DeleteTimeSeries {
                    path: fields[1].to_string(),
                })
            }
            SET_STORAGE_GROUP => {
                if fields.len() < 2 {
                    return Err(malformed("expected a path"));
                }
                Ok(Self::SetStorageGroup {
                    path: fields[1].to_string(),
                })
            }
            DELETE_STORAGE_GROUP => {
                if fields.len() < 2 {
                    return Err(malformed("expected at least one path"));
                }
                Ok(Self::DeleteStorageGroups {
                    paths: fields[1..].iter().map(|s| s.to_string()).collect(),
                })
            }
            SET_TTL => {
                if fields.len() < 3 {
                    return Err(malformed("expected a path and a ttl"));
                }
                let ttl = fields[2]
                    .parse::<u64>()
                    .map_err(|_| malformed("bad ttl"))?;
                Ok(Self::SetTtl {
                    path: fields[1].to_string(),
                    ttl,
                })
            }
            _ => Err(malformed("unrecognized opcode")),
        }
    }
}

fn parse_props(field: &str) -> Option<HashMap<String, String>> {
    let mut props = HashMap::new();
    if field.is_empty() {
        return Some(props);
    }
    for pair in field.split('&') {
        let (key, value) = pair.split_once('=')?;
        props.insert(key.to_string(), value.to_string());
    }
    Some(props)
}

impl fmt::Display for MetaLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTimeSeries {
                path,
                data_type,
                encoding,
                compressor,
                props,
                alias,
                tag_offset,
            } => {
                write!(
                    f,
                    "{CREATE_TIMESERIES},{path},{},{},{},",
                    data_type.id(),
                    encoding.id(),
                    compressor.id()
                )?;
                // props sorted so a given entry always renders the same line
                let mut entries: Vec<_> = props.iter().collect();
                entries.sort();
                let joined = entries
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&");
                write!(f, "{joined},{},", alias.as_deref().unwrap_or(""))?;
                match tag_offset {
                    Some(offset) => write!(f, "{offset}"),
                    None => write!(f, "-1"),
                }
            }
            Self::DeleteTimeSeries { path } => write!(f, "{DELETE_TIMESERIES},{path}"),
            Self::SetStorageGroup { path } => write!(f, "{SET_STORAGE_GROUP},{path}"),
            Self::DeleteStorageGroups { paths } => {
                write!(f, "{DELETE_STORAGE_GROUP},{}", paths.join(","))
            }
            Self::SetTtl { path, ttl } => write!(f, "{SET_TTL},{path},{ttl}"),
        }
    }
}

/// Appends catalog mutations to the operation log, one line per mutation,
/// flushed before the caller observes success.
#[derive(Debug)]
pub struct MetaLogWriter {
    writer: BufWriter<File>,
}

impl MetaLogWriter {
    pub fn open(schema_dir: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(schema_dir.join(META_LOG))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, entry: &MetaLogEntry) -> Result<()> {
        writeln!(self.writer, "{entry}")?;
        self.writer.flush()?;
        Ok(())
    }
}
