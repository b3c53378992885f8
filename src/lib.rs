// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embeddable log-structured merge (LSM) key-value storage engine.
//!
//! ##### About
//!
//! This crate exports an `Engine` that stores ordered byte-string keys and values.
//!
//! Writes are added into an in-memory write buffer (`MemTable`). Once it grows past
//! a size threshold, a background thread writes its contents into an immutable,
//! sorted, memory-mapped disk segment. Reads merge the write buffer with all segments,
//! the most recent version of a key wins.
//!
//! Deletes are written as tombstones, which shadow older versions of a key until
//! compaction merges all segments into one and drops them.
//!
//! Keys are ordered byte-wise, a key sorts before all keys it is a prefix of.
//!
//! ##### NOTE
//!
//! > There is no write-ahead log: writes that are not flushed
//! > (or persisted by [`Engine::close`]) are lost on a crash.
//!
//! # Example usage
//!
//! ```
//! use lsm_kv::{Config, Entry};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let engine = Config::new(folder.path()).flush_threshold(4_096).open()?;
//!
//! engine.insert("my_key", "my_value")?;
//!
//! let item = engine.get("my_key")?;
//! assert_eq!(Some(Entry::new("my_key", "my_value")), item);
//!
//! // Search by range
//! for item in &engine.range("a"..="z")? {
//!   let entry = item?;
//!   // ...
//! }
//!
//! // Write the memtable to a disk segment in the background
//! engine.flush()?;
//! engine.wait_for_flush()?;
//!
//! engine.remove("my_key")?;
//! assert!(!engine.contains_key("my_key")?);
//!
//! // Merge all disk segments into one
//! engine.flush()?;
//! engine.wait_for_flush()?;
//! engine.compact()?;
//! engine.wait_for_compaction()?;
//!
//! // Persists everything that is still in memory
//! engine.close()?;
//! #
//! # Ok::<(), lsm_kv::Error>(())
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("compilation is only allowed for 64-bit targets");

mod config;
mod engine;
mod engine_inner;
mod error;
mod file;
mod manager;
mod memtable;
mod merge;
mod path;
mod priority;
mod range;

#[doc(hidden)]
pub mod segment;

mod segment_set;
mod tombstone;
mod value;
mod version;

pub use {
    config::{CompactionPolicy, Config},
    engine::Engine,
    error::{CorruptionKind, Error, Result},
    range::{Range, RangeIterator},
    segment::Segment,
    value::{Entry, UserKey, UserValue},
    version::Version,
};
