// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::value::{UserKey, UserValue};
use crate::Entry;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering::AcqRel, Ordering::Acquire};

/// The memtable serves as an intermediary storage for new items
///
/// Every key is stored once, a later write replaces the earlier one.
/// Deletions are kept as tombstones (`None`) so they shadow older segments.
#[derive(Default)]
pub struct MemTable {
    pub(crate) items: SkipMap<UserKey, Option<UserValue>>,

    /// Approximate active memtable size
    ///
    /// If this grows too large, a flush is triggered
    pub(crate) approximate_size: AtomicU64,
}

impl MemTable {
    /// Returns the item by key if it exists
    ///
    /// The item may be a tombstone.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Option<Entry> {
        self.items
            .get(key.as_ref())
            .map(|entry| Entry::from((entry.key().clone(), entry.value().clone())))
    }

    /// Get approximate size of memtable in bytes
    pub fn size(&self) -> u64 {
        self.approximate_size.load(Acquire)
    }

    /// Count the amount of items in the memtable
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the memtable is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Inserts an item into the memtable
    ///
    /// Returns the added item's size and new size of the memtable.
    pub fn insert(&self, item: Entry) -> (u64, u64) {
        let item_size = item.size();

        let size_before = self.approximate_size.fetch_add(item_size, AcqRel);
        self.items.insert(item.key, item.value);

        (item_size, size_before + item_size)
    }

    /// Iterates over the half-open key range `[from, to)`, tombstones included
    pub fn range<'a>(
        &'a self,
        from: Option<&'a [u8]>,
        to: Option<&'a [u8]>,
    ) -> impl Iterator<Item = Entry> + 'a {
        let lo = from.map_or(Bound::Unbounded, Bound::Included);

        let hi = match (from, to) {
            // NOTE: Inverted bounds collapse to the empty range [from, from)
            (Some(from), Some(to)) if to <= from => Bound::Excluded(from),
            (_, to) => to.map_or(Bound::Unbounded, Bound::Excluded),
        };

        self.items
            .range::<[u8], _>((lo, hi))
            .map(|entry| Entry::from((entry.key().clone(), entry.value().clone())))
    }

    /// Iterates over all items in key order, tombstones included
    pub fn iter(&self) -> impl Iterator<Item = Entry> + '_ {
        self.items
            .iter()
            .map(|entry| Entry::from((entry.key().clone(), entry.value().clone())))
    }
}
