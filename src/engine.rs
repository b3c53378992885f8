// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    config::{CompactionPolicy, Config},
    engine_inner::{join_background, EngineInner},
    manager::SegmentManager,
    range::Range,
    value::UserKey,
    Entry,
};
use std::{
    ops::{Bound, RangeBounds},
    path::Path,
    sync::{
        atomic::Ordering::{Acquire, Release, SeqCst},
        Arc,
    },
};

fn ignore_tombstone_value(item: Entry) -> Option<Entry> {
    if item.is_tombstone() {
        None
    } else {
        Some(item)
    }
}

/// Smallest key that sorts after `key`
fn successor(key: &[u8]) -> UserKey {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next.into()
}

/// A log-structured merge key-value engine
///
/// Writes go into an in-memory memtable. Once it grows past the flush threshold,
/// it is written to an immutable, sorted disk segment by a background thread.
/// Compaction merges all segments into one, dropping deleted keys.
///
/// The handle is cheap to clone and can be shared between threads.
#[derive(Clone)]
pub struct Engine(pub(crate) Arc<EngineInner>);

impl std::ops::Deref for Engine {
    type Target = EngineInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Engine {
    /// Opens an engine in the given directory, recovering all segments found in it.
    ///
    /// The directory is created if it does not exist.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// use lsm_kv::Engine;
    ///
    /// let engine = Engine::open(folder.path(), 1_024 * 1_024)?;
    /// assert!(engine.is_empty()?);
    /// #
    /// # Ok::<(), lsm_kv::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or a segment is corrupt.
    pub fn open<P: AsRef<Path>>(path: P, flush_threshold: u64) -> crate::Result<Self> {
        Config::new(path).flush_threshold(flush_threshold).open()
    }

    pub(crate) fn open_with_config(config: Config) -> crate::Result<Self> {
        log::info!("Opening engine at {}", config.path.display());

        let (manager, segments) = SegmentManager::load(&config.path)?;

        log::info!(
            "Recovered {} segments, next segment is {}",
            segments.len(),
            manager.next_priority()
        );

        Ok(Self(Arc::new(EngineInner::new(config, manager, segments))))
    }

    fn check_open(&self) -> crate::Result<()> {
        if self.is_closed() {
            Err(crate::Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Returns `true` once the engine was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(SeqCst)
    }

    /// Retrieves an item from the engine.
    ///
    /// The active memtable is searched first, then the memtables that are being
    /// flushed, then the disk segments from newest to oldest. The first hit wins.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// use lsm_kv::{Engine, Entry};
    ///
    /// let engine = Engine::open(folder.path(), 1_024)?;
    /// engine.insert("a", "my_value")?;
    ///
    /// let item = engine.get("a")?;
    /// assert_eq!(Some(Entry::new("a", "my_value")), item);
    /// #
    /// # Ok::<(), lsm_kv::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the engine is closed.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<Entry>> {
        let key = key.as_ref();

        let (memtables, segments) = {
            let state = self.state.read().expect("lock is poisoned");

            if self.is_closed() {
                return Err(crate::Error::Closed);
            }

            (state.memtables(), state.segments.clone())
        };

        for memtable in &memtables {
            if let Some(item) = memtable.get(key) {
                return Ok(ignore_tombstone_value(item));
            }
        }

        Ok(segments.get(key)?.and_then(ignore_tombstone_value))
    }

    /// Returns `true` if the engine contains the specified key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the engine is closed.
    pub fn contains_key<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<bool> {
        self.get(key).map(|x| x.is_some())
    }

    /// Returns a view over a key range.
    ///
    /// Iterate over a reference to it to get the live entries in ascending key order.
    /// The range keeps the memtables and segments that existed at the call, so
    /// flushes and compactions do not change what it yields. Writes into the
    /// memtable that was active at the call may still show up during iteration.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// use lsm_kv::Engine;
    ///
    /// let engine = Engine::open(folder.path(), 1_024)?;
    ///
    /// for key in ["b", "c", "d", "e"] {
    ///     engine.insert(key, "")?;
    /// }
    ///
    /// let range = engine.range("b".."d")?;
    /// let keys = range
    ///     .into_iter()
    ///     .map(|x| x.map(|entry| entry.key))
    ///     .collect::<lsm_kv::Result<Vec<_>>>()?;
    ///
    /// assert_eq!(2, keys.len());
    /// #
    /// # Ok::<(), lsm_kv::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Will return `Err` if the engine is closed.
    pub fn range<K: AsRef<[u8]>, R: RangeBounds<K>>(&self, range: R) -> crate::Result<Range> {
        let from = match range.start_bound() {
            Bound::Included(key) => Some(key.as_ref().into()),
            Bound::Excluded(key) => Some(successor(key.as_ref())),
            Bound::Unbounded => None,
        };

        let to = match range.end_bound() {
            Bound::Included(key) => Some(successor(key.as_ref())),
            Bound::Excluded(key) => Some(key.as_ref().into()),
            Bound::Unbounded => None,
        };

        self.create_range(from, to)
    }

    /// Returns a view over all items, see [`Engine::range`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if the engine is closed.
    pub fn iter(&self) -> crate::Result<Range> {
        self.create_range(None, None)
    }

    fn create_range(&self, from: Option<UserKey>, to: Option<UserKey>) -> crate::Result<Range> {
        let state = self.state.read().expect("lock is poisoned");

        if self.is_closed() {
            return Err(crate::Error::Closed);
        }

        Ok(Range::new(
            state.memtables(),
            state.segments.clone(),
            (from, to),
        ))
    }

    /// Scans the entire engine, returning the amount of live items.
    ///
    /// ###### Caution
    ///
    /// This operation scans the entire engine: O(n) complexity!
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the engine is closed.
    pub fn len(&self) -> crate::Result<usize> {
        let mut count = 0;

        for item in &self.iter()? {
            let _ = item?;
            count += 1;
        }

        Ok(count)
    }

    /// Returns `true` if the engine holds no live items.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the engine is closed.
    pub fn is_empty(&self) -> crate::Result<bool> {
        let range = self.iter()?;
        let first = range.into_iter().next().transpose()?;
        Ok(first.is_none())
    }

    /// Writes an entry, overwriting any previous entry of the same key.
    ///
    /// If the active memtable has reached the flush threshold, a flush is started
    /// first. If a flush is already running, the write waits for it to finish.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the engine is closed, or a flush failed.
    pub fn upsert(&self, entry: Entry) -> crate::Result<()> {
        while self.active_memtable_size() >= self.config.flush_threshold {
            self.check_open()?;

            match self.flush() {
                Ok(()) => break,
                Err(crate::Error::Busy) => {
                    log::trace!("upsert: waiting for running flush");
                    self.wait_for_flush()?;
                }
                Err(e) => return Err(e),
            }
        }

        let state = self.state.read().expect("lock is poisoned");

        if self.is_closed() {
            return Err(crate::Error::Closed);
        }

        state.active.insert(entry);

        Ok(())
    }

    /// Inserts a key-value pair.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the engine is closed, or a flush failed.
    pub fn insert<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> crate::Result<()> {
        self.upsert(Entry::new(key, value))
    }

    /// Removes an item by writing a tombstone for it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the engine is closed, or a flush failed.
    pub fn remove<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<()> {
        self.upsert(Entry::tombstone(key))
    }

    /// Returns the amount of disk segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.state.read().expect("lock is poisoned").segments.len()
    }

    /// Returns the summed size of all disk segments in bytes.
    #[must_use]
    pub fn disk_space(&self) -> u64 {
        self.state
            .read()
            .expect("lock is poisoned")
            .segments
            .disk_space()
    }

    /// Returns the approximate size of the active memtable in bytes.
    #[must_use]
    pub fn active_memtable_size(&self) -> u64 {
        self.state.read().expect("lock is poisoned").active.size()
    }

    /// Returns the amount of memtables that are waiting to be written to disk.
    #[must_use]
    pub fn sealed_memtable_count(&self) -> usize {
        self.state.read().expect("lock is poisoned").sealed.len()
    }

    /// Starts writing the active memtable to a new disk segment in a background thread.
    ///
    /// The memtable stays readable until its segment is in place.
    /// Does nothing if the memtable is empty or the engine is closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`](crate::Error::Busy) if a flush is already running,
    /// or `Err` if the thread could not be spawned.
    pub fn flush(&self) -> crate::Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        if self
            .flushing
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_err()
        {
            return Err(crate::Error::Busy);
        }

        {
            log::trace!("rotate: acquiring state write lock");
            let mut state = self.state.write().expect("lock is poisoned");

            if state.active.is_empty() || self.is_closed() {
                self.flushing.store(false, Release);
                return Ok(());
            }

            let yanked_memtable = std::mem::take(&mut state.active);
            state.sealed.insert(0, yanked_memtable);
        }

        // NOTE: The previous flush is done, a memtable it failed to write
        // is retried by the next thread
        let previous = self.flush_handle.lock().expect("lock is poisoned").take();

        if let Some(previous) = previous {
            if let Err(e) = join_background(previous) {
                log::warn!("Previous flush failed: {e:?}");
            }
        }

        let inner = self.0.clone();

        let handle = std::thread::Builder::new()
            .name("lsm-kv:flush".to_string())
            .spawn(move || {
                log::debug!("Starting flush worker");

                let result = inner.flush_sealed();

                if let Err(e) = &result {
                    log::error!("Flush thread error: {e:?}");
                }

                inner.flushing.store(false, Release);
                drop(inner);

                result
            })
            .inspect_err(|_| self.flushing.store(false, Release))?;

        *self.flush_handle.lock().expect("lock is poisoned") = Some(handle);

        Ok(())
    }

    /// Blocks until the running flush (if any) is done.
    ///
    /// # Errors
    ///
    /// Returns the error of the flush, if it failed.
    pub fn wait_for_flush(&self) -> crate::Result<()> {
        self.join_flush()
    }

    /// Starts merging all disk segments into one in a background thread.
    ///
    /// Does nothing if there are fewer than two segments, or a compaction is
    /// already running. With [`CompactionPolicy::OncePerFlush`], it also does
    /// nothing if a compaction already started since the last flush.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the engine is closed, or the thread could not be spawned.
    pub fn compact(&self) -> crate::Result<()> {
        self.check_open()?;

        if self.config.compaction_policy == CompactionPolicy::OncePerFlush
            && self.compacted_since_flush.load(Acquire)
        {
            log::trace!("compact: nothing was flushed since the last compaction");
            return Ok(());
        }

        if self.segment_count() < 2 {
            return Ok(());
        }

        if self
            .compacting
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_err()
        {
            log::trace!("compact: compaction is already running");
            return Ok(());
        }

        // NOTE: close() may have passed its wait for compaction since the first check
        if self.closed.load(SeqCst) {
            self.compacting.store(false, SeqCst);
            return Err(crate::Error::Closed);
        }

        let previous = self.compaction_handle.lock().expect("lock is poisoned").take();

        if let Some(previous) = previous {
            if let Err(e) = join_background(previous) {
                log::warn!("Previous compaction failed: {e:?}");
            }
        }

        self.compacted_since_flush.store(true, Release);

        let inner = self.0.clone();

        let handle = std::thread::Builder::new()
            .name("lsm-kv:compaction".to_string())
            .spawn(move || {
                log::debug!("Starting compaction worker");

                let result = inner.run_compaction();

                if let Err(e) = &result {
                    log::error!("Compaction thread error: {e:?}");
                    inner.compacted_since_flush.store(false, Release);
                }

                inner.compacting.store(false, Release);
                drop(inner);

                result
            })
            .inspect_err(|_| {
                self.compacted_since_flush.store(false, Release);
                self.compacting.store(false, Release);
            })?;

        *self.compaction_handle.lock().expect("lock is poisoned") = Some(handle);

        Ok(())
    }

    /// Blocks until the running compaction (if any) is done.
    ///
    /// # Errors
    ///
    /// Returns the error of the compaction, if it failed.
    pub fn wait_for_compaction(&self) -> crate::Result<()> {
        self.join_compaction()
    }

    /// Closes the engine.
    ///
    /// Waits for running background work, then synchronously writes every
    /// memtable to disk. Afterwards, reads and writes return
    /// [`Error::Closed`](crate::Error::Closed). Calling it again does nothing.
    ///
    /// Dropping the last handle closes the engine as well.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn close(&self) -> crate::Result<()> {
        self.0.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn engine_flush_busy_while_flushing() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let engine = Engine::open(folder.path(), u64::MAX)?;

        engine.insert("a", "1")?;

        // Pretend a flush thread is running
        engine.flushing.store(true, SeqCst);

        assert!(matches!(engine.flush(), Err(crate::Error::Busy)));
        assert_eq!(0, engine.sealed_memtable_count());
        assert!(engine.active_memtable_size() > 0);

        engine.flushing.store(false, SeqCst);

        engine.flush()?;
        engine.wait_for_flush()?;

        assert_eq!(1, engine.segment_count());
        assert_eq!(Some(Entry::new("a", "1")), engine.get("a")?);

        Ok(())
    }

    #[test]
    fn engine_compact_while_compacting() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let engine = Engine::open(folder.path(), u64::MAX)?;

        for key in ["a", "b"] {
            engine.insert(key, "")?;
            engine.flush()?;
            engine.wait_for_flush()?;
        }

        engine.compacting.store(true, SeqCst);
        engine.compact()?;
        engine.compacting.store(false, SeqCst);

        assert_eq!(2, engine.segment_count());
        assert!(!engine.compacted_since_flush.load(SeqCst));

        Ok(())
    }
}
