// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Entry;

/// Skips deleted entries of an ascending stream
///
/// Errors are passed through untouched.
pub struct TombstoneFilter<I> {
    inner: I,
}

impl<I> TombstoneFilter<I> {
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl<I: Iterator<Item = crate::Result<Entry>>> Iterator for TombstoneFilter<I> {
    type Item = crate::Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(entry) if entry.is_tombstone() => continue,
                item => return Some(item),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.inner.size_hint().1)
    }
}
