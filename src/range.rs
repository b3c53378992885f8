// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    memtable::MemTable,
    merge::{BoxedIterator, MergeIterator},
    segment_set::SegmentSet,
    tombstone::TombstoneFilter,
    value::UserKey,
    Entry,
};
use std::sync::Arc;

/// Merged view over a key range of the engine
///
/// Holds on to the memtables and the segment set that were current when
/// the range was created, so iterating it never blocks writers. The segment
/// set is immutable, but the memtable that was active at creation keeps
/// accepting writes, and an iterator created later sees them.
///
/// Iterate over `&Range` to get the live entries in ascending key order.
pub struct Range {
    /// Active memtable first, then sealed memtables, newest first
    memtables: Vec<Arc<MemTable>>,

    segments: Arc<SegmentSet>,

    /// Half-open `[from, to)`, `None` is unbounded
    bounds: (Option<UserKey>, Option<UserKey>),
}

impl Range {
    pub(crate) fn new(
        memtables: Vec<Arc<MemTable>>,
        segments: Arc<SegmentSet>,
        bounds: (Option<UserKey>, Option<UserKey>),
    ) -> Self {
        Self {
            memtables,
            segments,
            bounds,
        }
    }
}

/// Iterator over the live entries of a [`Range`]
#[allow(clippy::module_name_repetitions)]
pub struct RangeIterator<'a> {
    iter: TombstoneFilter<MergeIterator<'a>>,
}

impl<'a> RangeIterator<'a> {
    fn new(lock: &'a Range) -> Self {
        let from = lock.bounds.0.as_deref();
        let to = lock.bounds.1.as_deref();

        let mut iters: Vec<BoxedIterator<'a>> =
            Vec::with_capacity(lock.memtables.len() + lock.segments.len());

        for memtable in &lock.memtables {
            iters.push(Box::new(memtable.range(from, to).map(Ok)));
        }

        for segment in lock.segments.iter() {
            match segment.range(from, to) {
                Ok(reader) => iters.push(Box::new(reader)),
                Err(e) => iters.push(Box::new(std::iter::once(Err(e)))),
            }
        }

        Self {
            iter: TombstoneFilter::new(MergeIterator::new(iters)),
        }
    }
}

impl<'a> Iterator for RangeIterator<'a> {
    type Item = crate::Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

impl<'a> IntoIterator for &'a Range {
    type IntoIter = RangeIterator<'a>;
    type Item = <Self::IntoIter as Iterator>::Item;

    fn into_iter(self) -> Self::IntoIter {
        RangeIterator::new(self)
    }
}
