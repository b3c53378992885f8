// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::priority::Priority;
use std::{
    fs::File,
    path::{Path, PathBuf},
};

pub const SEGMENT_FILE_PREFIX: &str = "data";
pub const SEGMENT_FILE_EXT: &str = "dat";
pub const TEMP_FILE_EXT: &str = "tmp";

/// Priority slot that compaction output gets demoted into
pub const LOWEST_PRIORITY: Priority = 0;

/// Kind of file recognized in the store folder
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// Finished, loadable segment
    Segment(Priority),

    /// Segment write that never got renamed into place
    Unfinished(Priority),
}

/// Path of the finished segment file with the given priority
pub fn segment_file_path<P: AsRef<Path>>(folder: P, priority: Priority) -> PathBuf {
    folder
        .as_ref()
        .join(format!("{SEGMENT_FILE_PREFIX}{priority}.{SEGMENT_FILE_EXT}"))
}

/// Path of the in-progress segment file with the given priority
pub fn temp_file_path<P: AsRef<Path>>(folder: P, priority: Priority) -> PathBuf {
    folder
        .as_ref()
        .join(format!("{SEGMENT_FILE_PREFIX}{priority}.{TEMP_FILE_EXT}"))
}

/// Parses a file name like `data12.dat` or `data12.tmp`
///
/// Returns `None` for anything else.
pub fn parse_file_name(file_name: &str) -> Option<FileKind> {
    let rest = file_name.strip_prefix(SEGMENT_FILE_PREFIX)?;
    let (number, ext) = rest.split_once('.')?;

    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let priority = number.parse::<Priority>().ok()?;

    match ext {
        SEGMENT_FILE_EXT => Some(FileKind::Segment(priority)),
        TEMP_FILE_EXT => Some(FileKind::Unfinished(priority)),
        _ => None,
    }
}

/// Fsyncs a folder so that renames and deletes inside of it are durable
pub fn fsync_directory<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    #[cfg(not(target_os = "windows"))]
    {
        let folder = File::open(path.as_ref())?;
        folder.sync_all()?;
    }

    #[cfg(target_os = "windows")]
    {
        // NOTE: Folders cannot be opened for fsync on Windows
        let _ = path;
    }

    Ok(())
}
