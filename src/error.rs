// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Describes which part of a segment file failed validation
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CorruptionKind {
    /// File is too short to contain the header
    TruncatedHeader,

    /// Entry count is negative or the index does not fit into the file
    InvalidEntryCount(i64),

    /// Index slot points outside of the file
    InvalidOffset(i64),

    /// Key length is negative or runs past the end of the file
    InvalidKeyLength(i64),

    /// Value length is below -1 or runs past the end of the file
    InvalidValueLength(i64),

    /// A segment file name carries the highest possible priority,
    /// so no newer segment can be created
    PriorityExhausted(u64),
}

/// Represents errors that can occur in the storage engine
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Segment file has an unsupported format version
    InvalidVersion(u64),

    /// Segment header, index or record is malformed
    Corrupt(CorruptionKind),

    /// A flush is already running, try again later
    Busy,

    /// The engine was closed
    Closed,

    /// The engine ended up in a state it should never reach
    Internal(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LsmKvError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CorruptionKind> for Error {
    fn from(value: CorruptionKind) -> Self {
        Self::Corrupt(value)
    }
}

/// Engine result
pub type Result<T> = std::result::Result<T, Error>;
