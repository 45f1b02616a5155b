//! The tag/attribute side file: fixed-size records addressed by byte offset.
//!
//! Each record holds two length-prefixed string maps, tags then attributes,
//! zero-padded to the configured record size. Records are append-only and
//! never reclaimed; deleting a series simply abandons its record.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use crate::{MetadataError, Result};

/// File name of the tag log inside the schema directory.
pub const TAG_LOG: &str = "tlog.bin";

/// Shared handle to the tag log. Reads and appends go through one file
/// descriptor behind a mutex, so lookups work under the catalog read lock.
#[derive(Debug)]
pub struct TagLogFile {
    file: Mutex<File>,
}

impl TagLogFile {
    pub fn open(schema_dir: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(schema_dir.join(TAG_LOG))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one record of `record_bytes` bytes; returns its byte offset.
    pub fn write(
        &self,
        record_bytes: usize,
        tags: &HashMap<String, String>,
        attributes: &HashMap<String, String>,
    ) -> Result<u64> {
        let mut record = Vec::with_capacity(record_bytes);
        write_map(&mut record, tags)?;
        write_map(&mut record, attributes)?;
        if record.len() > record_bytes {
            return Err(MetadataError::PayloadTooLarge {
                size: record.len(),
                limit: record_bytes,
            });
        }
        record.resize(record_bytes, 0);

        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&record)?;
        Ok(offset)
    }

    /// Read the record at `offset` back into its tag and attribute maps.
    pub fn read(
        &self,
        record_bytes: usize,
        offset: u64,
    ) -> Result<(HashMap<String, String>, HashMap<String, String>)> {
        let mut record = vec![0u8; record_bytes];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut record)?;
        }
        let mut cursor = Cursor::new(record.as_slice());
        let tags = read_map(&mut cursor, offset)?;
        let attributes = read_map(&mut cursor, offset)?;
        Ok((tags, attributes))
    }

    /// As [`TagLogFile::read`], discarding the attribute map.
    pub fn read_tag(&self, record_bytes: usize, offset: u64) -> Result<HashMap<String, String>> {
        Ok(self.read(record_bytes, offset)?.0)
    }
}

fn write_map(buffer: &mut Vec<u8>, map: &HashMap<String, String>) -> Result<()> {
    // sorted so a given map always serializes to the same bytes
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort();
    buffer.write_u32::<BigEndian>(entries.len() as u32)?;
    for (key, value) in entries {
        write_string(buffer, key)?;
        write_string(buffer, value)?;
    }
    Ok(())
}

fn write_string(buffer: &mut Vec<u8>, s: &str) -> Result<()> {
    buffer.write_u32::<BigEndian>(s.len() as u32)?;
    buffer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_map(cursor: &mut Cursor<&[u8]>, offset: u64) -> Result<HashMap<String, String>> {
    let corrupt = |reason: &str| MetadataError::Corrupt {
        offset,
        reason: reason.to_string(),
    };
    let count = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| corrupt("record truncated"))?;
    // every entry carries at least two length prefixes
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if u64::from(count) * 8 > remaining {
        return Err(corrupt("map entry count runs past the record"));
    }
    let mut map = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let key = read_string(cursor, offset)?;
        let value = read_string(cursor, offset)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn read_string(cursor: &mut Cursor<&[u8]>, offset: u64) -> Result<String> {
    let corrupt = |reason: &str| MetadataError::Corrupt {
        offset,
        reason: reason.to_string(),
    };
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| corrupt("record truncated"))? as usize;
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if len as u64 > remaining {
        return Err(corrupt("string length runs past the record"));
    }
    let mut bytes = vec![0u8; len];
    cursor
        .read_exact(&mut bytes)
        .map_err(|_| corrupt("record truncated"))?;
    String::from_utf8(bytes).map_err(|_| corrupt("string is not valid utf-8"))
}
