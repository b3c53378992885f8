// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Segment file creation

use super::record::{self, data_start, record_size};
use crate::{version::Version, Entry};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Serializes sorted entries into a new segment file, making sure all data is written durably
///
/// The file is pre-sized to exactly header + index + data, the record offsets
/// are computed in a first pass so the index can be written in front of the data.
///
/// Returns the file size.
pub fn write_segment<P: AsRef<Path>>(path: P, entries: &[Entry]) -> crate::Result<u64> {
    let path = path.as_ref();

    debug_assert!(
        entries.windows(2).all(|w| matches!(w, [a, b] if a.key < b.key)),
        "segment entries must be sorted and unique"
    );

    let item_count = entries.len() as u64;
    let data_size = entries.iter().map(record_size).sum::<u64>();
    let file_size = data_start(item_count) + data_size;

    log::trace!(
        "Writing {item_count} entries ({file_size} bytes) to {}",
        path.display()
    );

    let file = File::create(path)?;
    file.set_len(file_size)?;

    let mut writer = BufWriter::with_capacity(512_000, file);

    record::write_header(&mut writer, Version::V0, item_count)?;

    let mut offset = data_start(item_count);
    for entry in entries {
        record::write_index_slot(&mut writer, offset)?;
        offset += record_size(entry);
    }

    let mut file_pos = data_start(item_count);
    for entry in entries {
        file_pos += record::write_record(&mut writer, entry)?;
    }

    debug_assert_eq!(file_pos, file_size);

    writer.flush()?;

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(file_size)
}
