// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Entry;
use min_max_heap::MinMaxHeap;

pub type BoxedIterator<'a> = Box<dyn Iterator<Item = crate::Result<Entry>> + 'a>;

/// Heap slot, remembering which iterator an item came from
struct HeapItem {
    entry: Entry,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.source == other.source
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.entry.key, self.source).cmp(&(&other.entry.key, other.source))
    }
}

/// This iterator can iterate through N iterators simultaneously in order
/// This is achieved by advancing the iterators that yield the lowest item
/// and merging using a simple k-way merge algorithm
///
/// The iterators need to be passed in order of recency, the freshest first.
/// If multiple iterators yield the same key, the item of the freshest one
/// is picked and the others are skipped.
///
/// An error hit while refilling the heap is returned after the item that
/// was already taken off it.
pub struct MergeIterator<'a> {
    iterators: Vec<BoxedIterator<'a>>,
    heap: MinMaxHeap<HeapItem>,
    initialized: bool,
    deferred_error: Option<crate::Error>,
}

impl<'a> MergeIterator<'a> {
    /// Initializes a new merge iterator
    #[must_use]
    pub fn new(iterators: Vec<BoxedIterator<'a>>) -> Self {
        let heap = MinMaxHeap::with_capacity(iterators.len());

        Self {
            iterators,
            heap,
            initialized: false,
            deferred_error: None,
        }
    }

    fn advance(&mut self, source: usize) -> crate::Result<()> {
        if let Some(iterator) = self.iterators.get_mut(source) {
            if let Some(item) = iterator.next() {
                self.heap.push(HeapItem {
                    entry: item?,
                    source,
                });
            }
        }

        Ok(())
    }

    fn advance_or_defer(&mut self, source: usize) {
        if let Err(e) = self.advance(source) {
            if self.deferred_error.is_none() {
                self.deferred_error = Some(e);
            }
        }
    }

    fn initialize(&mut self) {
        for source in 0..self.iterators.len() {
            self.advance_or_defer(source);
        }

        self.initialized = true;
    }
}

impl<'a> Iterator for MergeIterator<'a> {
    type Item = crate::Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.initialized {
            self.initialize();
        }

        if let Some(e) = self.deferred_error.take() {
            return Some(Err(e));
        }

        let head = self.heap.pop_min()?;
        self.advance_or_defer(head.source);

        // Older versions of the same key are shadowed
        while let Some(next) = self.heap.peek_min() {
            if next.entry.key != head.entry.key {
                break;
            }

            if let Some(shadowed) = self.heap.pop_min() {
                self.advance_or_defer(shadowed.source);
            }
        }

        Some(Ok(head.entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn boxed(entries: Vec<Entry>) -> BoxedIterator<'static> {
        Box::new(entries.into_iter().map(Ok))
    }

    #[test]
    fn merge_big() -> crate::Result<()> {
        let iter0 = (000u64..100).map(|x| Entry::new(x.to_be_bytes(), "old"));
        let iter1 = (100u64..200).map(|x| Entry::new(x.to_be_bytes(), "new"));
        let iter2 = (200u64..300).map(|x| Entry::tombstone(x.to_be_bytes()));
        let iter3 = (300u64..400).map(|x| Entry::new(x.to_be_bytes(), "qwe"));

        let merge_iter = MergeIterator::new(vec![
            boxed(iter0.collect()),
            boxed(iter1.collect()),
            boxed(iter2.collect()),
            boxed(iter3.collect()),
        ]);

        let mut count = 0;

        for (idx, item) in merge_iter.enumerate() {
            let item = item?;
            assert_eq!(&*item.key, (idx as u64).to_be_bytes());
            count += 1;
        }

        assert_eq!(400, count);

        Ok(())
    }

    #[test]
    fn merge_freshest_wins() -> crate::Result<()> {
        let newest = vec![Entry::new("a", "new"), Entry::tombstone("c")];
        let middle = vec![Entry::new("b", "mid"), Entry::new("c", "mid")];
        let oldest = vec![
            Entry::new("a", "old"),
            Entry::new("b", "old"),
            Entry::new("c", "old"),
            Entry::new("d", "old"),
        ];

        let merge_iter = MergeIterator::new(vec![boxed(newest), boxed(middle), boxed(oldest)]);
        let items = merge_iter.collect::<crate::Result<Vec<_>>>()?;

        assert_eq!(
            items,
            vec![
                Entry::new("a", "new"),
                Entry::new("b", "mid"),
                Entry::tombstone("c"),
                Entry::new("d", "old"),
            ]
        );

        Ok(())
    }

    #[test]
    fn merge_interleaved() -> crate::Result<()> {
        let evens = (0u64..100).step_by(2).map(|x| Entry::new(x.to_be_bytes(), "even"));
        let odds = (1u64..100).step_by(2).map(|x| Entry::new(x.to_be_bytes(), "odd"));

        let merge_iter = MergeIterator::new(vec![boxed(evens.collect()), boxed(odds.collect())]);
        let keys = merge_iter
            .map(|x| x.map(|entry| entry.key))
            .collect::<crate::Result<Vec<_>>>()?;

        assert_eq!(100, keys.len());
        assert!(keys.windows(2).all(|w| matches!(w, [a, b] if a < b)));

        Ok(())
    }

    #[test]
    fn merge_empty() -> crate::Result<()> {
        assert_eq!(0, MergeIterator::new(vec![]).count());
        assert_eq!(0, MergeIterator::new(vec![boxed(vec![]), boxed(vec![])]).count());

        let merge_iter = MergeIterator::new(vec![boxed(vec![]), boxed(vec![Entry::new("a", "")])]);
        assert_eq!(1, merge_iter.count());

        Ok(())
    }

    #[test]
    fn merge_surfaces_errors() {
        let broken: BoxedIterator<'static> = Box::new(
            vec![
                Ok(Entry::new("a", "")),
                Err(crate::Error::Internal("broken source")),
            ]
            .into_iter(),
        );

        let mut merge_iter = MergeIterator::new(vec![broken]);
        assert!(matches!(merge_iter.next(), Some(Ok(entry)) if &*entry.key == b"a"));
        assert!(matches!(merge_iter.next(), Some(Err(crate::Error::Internal(_)))));
    }

    #[test]
    fn merge_error_after_shadowed_item() {
        let newest = boxed(vec![Entry::new("a", "new"), Entry::new("b", "new")]);
        let broken: BoxedIterator<'static> = Box::new(
            vec![
                Ok(Entry::new("a", "old")),
                Err(crate::Error::Internal("broken source")),
            ]
            .into_iter(),
        );

        let mut merge_iter = MergeIterator::new(vec![newest, broken]);

        assert!(matches!(
            merge_iter.next(),
            Some(Ok(entry)) if entry == Entry::new("a", "new")
        ));
        assert!(matches!(merge_iter.next(), Some(Err(crate::Error::Internal(_)))));
        assert!(matches!(
            merge_iter.next(),
            Some(Ok(entry)) if entry == Entry::new("b", "new")
        ));
        assert!(merge_iter.next().is_none());
    }
}
