// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::CorruptionKind;
use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{AcqRel, Acquire},
    },
    Arc,
};

/// Segment priority, a monotonically increasing counter
///
/// A segment with a higher priority shadows items with the
/// same key in segments with a lower priority.
pub type Priority = u64;

/// Thread-safe segment priority generator
///
/// Priority 0 is reserved for compaction output, so a fresh
/// counter starts handing out 1.
#[derive(Clone, Debug)]
pub struct PriorityCounter(Arc<AtomicU64>);

impl Default for PriorityCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl std::ops::Deref for PriorityCounter {
    type Target = Arc<AtomicU64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PriorityCounter {
    /// Creates a new counter, starting at the given value
    #[must_use]
    pub fn new(next: Priority) -> Self {
        Self(Arc::new(AtomicU64::new(next)))
    }

    /// Creates a counter that continues after the highest recovered priority
    ///
    /// # Errors
    ///
    /// Will return `Err` if the highest priority leaves no room for a newer segment.
    pub fn after(max: Option<Priority>) -> crate::Result<Self> {
        let next = match max {
            Some(max) => max
                .checked_add(1)
                .ok_or(CorruptionKind::PriorityExhausted(max))?,
            None => 1,
        };

        Ok(Self::new(next))
    }

    /// Peeks at the next priority without allocating it
    #[must_use]
    pub fn get(&self) -> Priority {
        self.load(Acquire)
    }

    /// Allocates the next priority
    #[must_use]
    pub fn next(&self) -> Priority {
        self.fetch_add(1, AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn priority_counter_continues() -> crate::Result<()> {
        let counter = PriorityCounter::after(Some(9))?;
        assert_eq!(10, counter.get());
        assert_eq!(10, counter.next());
        assert_eq!(11, counter.next());
        assert_eq!(12, counter.get());

        Ok(())
    }

    #[test]
    fn priority_counter_empty_store() -> crate::Result<()> {
        let counter = PriorityCounter::after(None)?;
        assert_eq!(1, counter.next());

        // Compaction output in slot 0 must not reset the counter
        let counter = PriorityCounter::after(Some(0))?;
        assert_eq!(1, counter.next());

        Ok(())
    }

    #[test]
    fn priority_counter_exhausted() {
        assert!(matches!(
            PriorityCounter::after(Some(u64::MAX)),
            Err(crate::Error::Corrupt(CorruptionKind::PriorityExhausted(u64::MAX)))
        ));

        assert!(PriorityCounter::after(Some(u64::MAX - 1)).is_ok());
    }
}
