// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Binary layout of a segment file
//!
//! All integers are 8 bytes wide, signed, little endian.
//!
//! \[format version] \[entry count] \[entry count × record offset] \[records]
//!
//! A record is \[key length] \[key] \[value length] \[value], where a value length
//! of -1 marks a tombstone and no value bytes follow.

use crate::{error::CorruptionKind, version::Version, Entry};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::Write;

/// Width of every integer in the format
pub const INT_SIZE: u64 = std::mem::size_of::<i64>() as u64;

/// \[format version] + \[entry count]
pub const HEADER_SIZE: u64 = INT_SIZE * 2;

/// Value length that marks a tombstone
pub const TOMBSTONE_MARKER: i64 = -1;

/// Byte position where the data region begins for the given entry count
#[must_use]
pub fn data_start(item_count: u64) -> u64 {
    HEADER_SIZE + INT_SIZE * item_count
}

/// Serialized size of a single record
#[must_use]
pub fn record_size(entry: &Entry) -> u64 {
    let value_size = entry.value.as_ref().map_or(0, |v| v.len() as u64);
    INT_SIZE + entry.key.len() as u64 + INT_SIZE + value_size
}

/// Writes the format version and entry count
pub fn write_header<W: Write>(
    writer: &mut W,
    version: Version,
    item_count: u64,
) -> std::io::Result<()> {
    writer.write_u64::<LittleEndian>(u64::from(version))?;
    writer.write_u64::<LittleEndian>(item_count)?;
    Ok(())
}

/// Writes one index slot, the absolute file offset of a record
pub fn write_index_slot<W: Write>(writer: &mut W, offset: u64) -> std::io::Result<()> {
    writer.write_u64::<LittleEndian>(offset)
}

/// Writes a record, returning the amount of bytes written
pub fn write_record<W: Write>(writer: &mut W, entry: &Entry) -> std::io::Result<u64> {
    // NOTE: Lengths are bounded by the address space, which fits into i64 on 64-bit targets
    #[allow(clippy::cast_possible_wrap)]
    writer.write_i64::<LittleEndian>(entry.key.len() as i64)?;
    writer.write_all(&entry.key)?;

    match &entry.value {
        Some(value) => {
            #[allow(clippy::cast_possible_wrap)]
            writer.write_i64::<LittleEndian>(value.len() as i64)?;
            writer.write_all(value)?;
        }
        None => {
            writer.write_i64::<LittleEndian>(TOMBSTONE_MARKER)?;
        }
    }

    Ok(record_size(entry))
}

fn read_i64(bytes: &[u8], pos: usize) -> Option<i64> {
    let end = pos.checked_add(INT_SIZE as usize)?;
    bytes.get(pos..end).map(LittleEndian::read_i64)
}

/// Validated segment header
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// Format version
    pub version: Version,

    /// Amount of records, including tombstones
    pub item_count: u64,
}

impl Header {
    /// Parses and validates the header and the index bounds
    ///
    /// # Errors
    ///
    /// Returns `InvalidVersion` for unknown format versions, `Corrupt` if
    /// the header is truncated or the index does not fit into the file.
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        let raw_version = read_i64(bytes, 0).ok_or(CorruptionKind::TruncatedHeader)?;
        let raw_count = read_i64(bytes, INT_SIZE as usize).ok_or(CorruptionKind::TruncatedHeader)?;

        #[allow(clippy::cast_sign_loss)]
        let version = Version::try_from(raw_version as u64)?;

        let item_count =
            u64::try_from(raw_count).map_err(|_| CorruptionKind::InvalidEntryCount(raw_count))?;

        let index_end = item_count
            .checked_mul(INT_SIZE)
            .and_then(|x| x.checked_add(HEADER_SIZE))
            .ok_or(CorruptionKind::InvalidEntryCount(raw_count))?;

        if index_end > bytes.len() as u64 {
            return Err(CorruptionKind::InvalidEntryCount(raw_count).into());
        }

        Ok(Self {
            version,
            item_count,
        })
    }
}

/// Reads the record offset stored in index slot `pos`
///
/// The caller guarantees `pos < item_count` of a validated header.
pub fn index_slot(bytes: &[u8], pos: u64) -> crate::Result<usize> {
    let slot = HEADER_SIZE + pos * INT_SIZE;

    #[allow(clippy::cast_possible_truncation)]
    let raw = read_i64(bytes, slot as usize).ok_or(CorruptionKind::InvalidOffset(-1))?;

    let offset = usize::try_from(raw).map_err(|_| CorruptionKind::InvalidOffset(raw))?;

    if offset < HEADER_SIZE as usize || offset >= bytes.len() {
        return Err(CorruptionKind::InvalidOffset(raw).into());
    }

    Ok(offset)
}

/// Returns the key bytes of the record at `offset`, and the position right after the key
fn key_slice(bytes: &[u8], offset: usize) -> crate::Result<(&[u8], usize)> {
    let raw = read_i64(bytes, offset).ok_or(CorruptionKind::InvalidOffset(offset as i64))?;
    let len = usize::try_from(raw).map_err(|_| CorruptionKind::InvalidKeyLength(raw))?;

    let start = offset + INT_SIZE as usize;
    let end = start
        .checked_add(len)
        .ok_or(CorruptionKind::InvalidKeyLength(raw))?;

    let key = bytes
        .get(start..end)
        .ok_or(CorruptionKind::InvalidKeyLength(raw))?;

    Ok((key, end))
}

/// Borrows the key of the record at `offset` directly from the file bytes
pub fn key_at(bytes: &[u8], offset: usize) -> crate::Result<&[u8]> {
    key_slice(bytes, offset).map(|(key, _)| key)
}

/// Decodes the full record at `offset`
pub fn decode_record(bytes: &[u8], offset: usize) -> crate::Result<Entry> {
    let (key, value_pos) = key_slice(bytes, offset)?;

    #[allow(clippy::cast_possible_wrap)]
    let raw = read_i64(bytes, value_pos)
        .ok_or(CorruptionKind::InvalidValueLength(value_pos as i64))?;

    let value = if raw == TOMBSTONE_MARKER {
        None
    } else {
        let len = usize::try_from(raw).map_err(|_| CorruptionKind::InvalidValueLength(raw))?;
        let start = value_pos + INT_SIZE as usize;
        let end = start
            .checked_add(len)
            .ok_or(CorruptionKind::InvalidValueLength(raw))?;

        let value = bytes
            .get(start..end)
            .ok_or(CorruptionKind::InvalidValueLength(raw))?;

        Some(value.into())
    };

    Ok(Entry {
        key: key.into(),
        value,
    })
}
