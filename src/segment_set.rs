// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{priority::Priority, segment::Segment, Entry};
use std::sync::Arc;

/// Immutable list of the disk segments of a store, newest first
///
/// The set is never modified in place. Flushes and compactions build a new
/// set and swap it in, so a reader holding an `Arc<SegmentSet>` keeps a
/// consistent view for as long as it needs it.
#[derive(Clone, Debug, Default)]
pub struct SegmentSet {
    segments: Vec<Arc<Segment>>,
}

impl SegmentSet {
    /// Creates a set, ordering the segments by descending priority
    #[must_use]
    pub fn new(mut segments: Vec<Arc<Segment>>) -> Self {
        segments.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { segments }
    }

    /// Returns the amount of segments
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if there are no segments
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterates over the segments, newest first
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Segment>> + '_ {
        self.segments.iter()
    }

    /// Highest priority in the set
    #[must_use]
    pub fn max_priority(&self) -> Option<Priority> {
        self.segments.first().map(|x| x.priority())
    }

    /// Summed size of all segment files in bytes
    #[must_use]
    pub fn disk_space(&self) -> u64 {
        self.segments.iter().map(|x| x.file_size()).sum()
    }

    /// Priorities of all segments, newest first
    #[must_use]
    pub fn priorities(&self) -> Vec<Priority> {
        self.segments.iter().map(|x| x.priority()).collect()
    }

    /// Point read, returning the entry of the newest segment that contains the key
    ///
    /// The entry may be a tombstone.
    pub fn get(&self, key: &[u8]) -> crate::Result<Option<Entry>> {
        for segment in &self.segments {
            if let Some(entry) = segment.lookup(key)? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Returns a new set with a freshly flushed segment added in front
    #[must_use]
    pub fn with_flushed(&self, segment: Arc<Segment>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(segment);
        segments.extend(self.segments.iter().cloned());
        Self::new(segments)
    }

    /// Returns a new set with the compacted segments replaced by their output
    ///
    /// Segments that were flushed while the compaction was running are kept.
    #[must_use]
    pub fn with_compacted(&self, inputs: &[Priority], output: Option<Arc<Segment>>) -> Self {
        let segments = self
            .segments
            .iter()
            .filter(|x| !inputs.contains(&x.priority()))
            .cloned()
            .chain(output)
            .collect();

        Self::new(segments)
    }
}
