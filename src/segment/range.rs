// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bounded iteration over a single segment

use super::Segment;
use crate::Entry;

/// Forward iterator over a contiguous slice `[lo, hi)` of a segment's index
///
/// Records are decoded straight from the mapped file on every step.
/// After a decoding error the iterator is exhausted.
pub struct Range<'a> {
    segment: &'a Segment,
    pos: u64,
    end: u64,
}

impl<'a> Range<'a> {
    pub(crate) fn new(segment: &'a Segment, lo: u64, hi: u64) -> Self {
        debug_assert!(lo <= hi);
        debug_assert!(hi <= segment.len());

        Self {
            segment,
            pos: lo,
            end: hi,
        }
    }
}

impl<'a> Iterator for Range<'a> {
    type Item = crate::Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }

        let item = self.segment.entry_at(self.pos);

        if item.is_err() {
            self.pos = self.end;
        } else {
            self.pos += 1;
        }

        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        #[allow(clippy::cast_possible_truncation)]
        let remaining = (self.end - self.pos) as usize;
        (remaining, Some(remaining))
    }
}
