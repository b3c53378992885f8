// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Immutable, sorted, memory-mapped disk segments

pub mod range;
pub mod record;
pub mod writer;

use self::{range::Range, record::Header};
use crate::{priority::Priority, Entry};
use memmap2::Mmap;
use std::{
    cmp::Ordering,
    fs::File,
    path::{Path, PathBuf},
};

/// Disk segment (a.k.a. `SSTable`, `sorted string table`) that is located on disk
///
/// A segment is an immutable, sorted list of key-value pairs stored in a single file,
/// see [`record`] for the layout. The file is memory-mapped read-only, and both point
/// reads and range reads use the offset index at the start of the file to jump to
/// records directly.
///
/// Deleted entries are represented by tombstones.
pub struct Segment {
    priority: Priority,
    path: PathBuf,
    mmap: Mmap,
    item_count: u64,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment:{}", self.priority)
    }
}

impl Segment {
    /// Maps a segment file and validates its header.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the file is not a valid segment.
    pub fn recover<P: AsRef<Path>>(path: P, priority: Priority) -> crate::Result<Self> {
        let path = path.as_ref();
        log::trace!("Mapping segment {}", path.display());

        let file = File::open(path)?;

        // SAFETY: Segment files are never modified after they are renamed into place,
        // they are only ever deleted, which keeps existing mappings intact
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        let header = Header::decode(&mmap)?;

        Ok(Self {
            priority,
            path: path.to_path_buf(),
            mmap,
            item_count: header.item_count,
        })
    }

    /// Returns the segment priority; higher is newer.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the path of the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the amount of entries (including tombstones) in the segment.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.item_count
    }

    /// Returns `true` if the segment has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }

    /// Returns the size of the segment file in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Searches the index for a key.
    ///
    /// Like [`slice::binary_search`], returns `Ok(position)` on a hit and
    /// `Err(insertion_point)` on a miss, so range bounds can be derived
    /// without a second search.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the index or a record is corrupt.
    pub fn binary_search(&self, key: &[u8]) -> crate::Result<Result<u64, u64>> {
        let bytes = self.bytes();

        let mut lo = 0;
        let mut hi = self.item_count;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;

            let offset = record::index_slot(bytes, mid)?;
            let mid_key = record::key_at(bytes, offset)?;

            match mid_key.cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }

        Ok(Err(lo))
    }

    /// Returns the first index position with a key >= `key`.
    fn lower_bound(&self, key: &[u8]) -> crate::Result<u64> {
        Ok(self.binary_search(key)?.unwrap_or_else(|pos| pos))
    }

    /// Decodes the entry at the given index position.
    pub(crate) fn entry_at(&self, pos: u64) -> crate::Result<Entry> {
        let bytes = self.bytes();
        let offset = record::index_slot(bytes, pos)?;
        record::decode_record(bytes, offset)
    }

    /// Retrieves an entry from the segment.
    ///
    /// The returned entry may be a tombstone, it is up to the caller to interpret it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the segment is corrupt.
    pub fn lookup<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<Entry>> {
        match self.binary_search(key.as_ref())? {
            Ok(pos) => self.entry_at(pos).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Creates an iterator over the half-open key range `[from, to)`.
    ///
    /// `None` bounds are open: `from = None` starts at the first entry,
    /// `to = None` runs until the last entry.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the segment is corrupt.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> crate::Result<Range<'_>> {
        let lo = match from {
            Some(key) => self.lower_bound(key)?,
            None => 0,
        };

        let hi = match to {
            Some(key) => self.lower_bound(key)?,
            None => self.item_count,
        };

        Ok(Range::new(self, lo, hi.max(lo)))
    }

    /// Creates an iterator over the whole segment.
    #[must_use]
    pub fn iter(&self) -> Range<'_> {
        Range::new(self, 0, self.item_count)
    }
}
