// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    config::Config, manager::SegmentManager, memtable::MemTable, segment_set::SegmentSet,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering::Release, Ordering::SeqCst},
        Arc, Mutex, RwLock,
    },
    thread::JoinHandle,
};

pub type BackgroundHandle = Mutex<Option<JoinHandle<crate::Result<()>>>>;

/// Everything a read needs, swapped under the state lock
pub struct State {
    /// Active memtable that is being written to
    pub(crate) active: Arc<MemTable>,

    /// Frozen memtables that are being flushed, newest first
    pub(crate) sealed: Vec<Arc<MemTable>>,

    /// Disk segments, newest first
    pub(crate) segments: Arc<SegmentSet>,
}

impl State {
    /// Memtables in recency order, active first
    pub(crate) fn memtables(&self) -> Vec<Arc<MemTable>> {
        std::iter::once(&self.active)
            .chain(&self.sealed)
            .cloned()
            .collect()
    }
}

#[allow(clippy::module_name_repetitions)]
pub struct EngineInner {
    /// Engine configuration
    pub(crate) config: Config,

    /// Owner of the segment files
    pub(crate) manager: SegmentManager,

    pub(crate) state: RwLock<State>,

    /// Set while a flush thread is running
    pub(crate) flushing: AtomicBool,

    /// Set while a compaction thread is running
    pub(crate) compacting: AtomicBool,

    /// Set when a compaction started after the most recent flush
    pub(crate) compacted_since_flush: AtomicBool,

    pub(crate) closed: AtomicBool,

    pub(crate) flush_handle: BackgroundHandle,
    pub(crate) compaction_handle: BackgroundHandle,
}

/// Joins a background thread, unless it is the calling thread itself
///
/// The last engine handle may be dropped by a background thread,
/// which then must not wait for itself.
pub(crate) fn join_background(handle: JoinHandle<crate::Result<()>>) -> crate::Result<()> {
    if handle.thread().id() == std::thread::current().id() {
        return Ok(());
    }

    handle
        .join()
        .map_err(|_| crate::Error::Internal("background thread panicked"))?
}

impl EngineInner {
    pub(crate) fn new(config: Config, manager: SegmentManager, segments: SegmentSet) -> Self {
        Self {
            config,
            manager,
            state: RwLock::new(State {
                active: Arc::default(),
                sealed: Vec::new(),
                segments: Arc::new(segments),
            }),
            flushing: AtomicBool::default(),
            compacting: AtomicBool::default(),
            compacted_since_flush: AtomicBool::default(),
            closed: AtomicBool::default(),
            flush_handle: Mutex::default(),
            compaction_handle: Mutex::default(),
        }
    }

    /// Persists sealed memtables, oldest first, until none are left
    ///
    /// Each memtable is swapped for its segment in one step, so readers
    /// always see the data in exactly one place.
    pub(crate) fn flush_sealed(&self) -> crate::Result<()> {
        loop {
            let memtable = {
                let state = self.state.read().expect("lock is poisoned");
                state.sealed.last().cloned()
            };

            let Some(memtable) = memtable else {
                return Ok(());
            };

            log::debug!("flush: writing memtable with {} items", memtable.len());
            let segment = self.manager.flush(&memtable)?;

            log::trace!("flush: acquiring state write lock");
            let mut state = self.state.write().expect("lock is poisoned");

            if let Some(segment) = segment {
                state.segments = Arc::new(state.segments.with_flushed(segment));
            }
            state.sealed.retain(|x| !Arc::ptr_eq(x, &memtable));

            self.compacted_since_flush.store(false, Release);
        }
    }

    /// Merges a snapshot of the current segments and installs the result
    pub(crate) fn run_compaction(&self) -> crate::Result<()> {
        let snapshot = {
            let state = self.state.read().expect("lock is poisoned");

            if self.closed.load(SeqCst) {
                log::debug!("compactor: engine is closed, skipping");
                return Ok(());
            }

            state.segments.clone()
        };

        let Some(outcome) = self.manager.compact(&snapshot)? else {
            return Ok(());
        };

        log::trace!("compactor: acquiring state write lock");
        let mut state = self.state.write().expect("lock is poisoned");
        state.segments = Arc::new(state.segments.with_compacted(&outcome.inputs, outcome.output));

        Ok(())
    }

    /// Blocks until no flush thread is running, surfacing its result
    pub(crate) fn join_flush(&self) -> crate::Result<()> {
        loop {
            let handle = self.flush_handle.lock().expect("lock is poisoned").take();

            if let Some(handle) = handle {
                return join_background(handle);
            }

            // NOTE: The flag is set slightly before the handle is stored
            if !self.flushing.load(SeqCst) {
                return Ok(());
            }

            std::thread::yield_now();
        }
    }

    /// Blocks until no compaction thread is running, surfacing its result
    pub(crate) fn join_compaction(&self) -> crate::Result<()> {
        loop {
            let handle = self.compaction_handle.lock().expect("lock is poisoned").take();

            if let Some(handle) = handle {
                return join_background(handle);
            }

            if !self.compacting.load(SeqCst) {
                return Ok(());
            }

            std::thread::yield_now();
        }
    }

    /// Shuts the engine down, persisting everything still buffered in memory
    ///
    /// Calling it again is a no-op, unless a previous call failed to persist
    /// the buffered memtables, which are then written again.
    pub(crate) fn close(&self) -> crate::Result<()> {
        if self.closed.swap(true, SeqCst) {
            let state = self.state.read().expect("lock is poisoned");

            if state.sealed.is_empty() && state.active.is_empty() {
                return Ok(());
            }

            log::debug!("Retrying to persist memtables of a failed close");
        } else {
            log::debug!("Closing engine at {}", self.config.path.display());
        }

        // NOTE: Memtables of a failed flush are still sealed and get persisted below
        if let Err(e) = self.join_flush() {
            log::warn!("Flush failed before close: {e:?}");
        }

        if let Err(e) = self.join_compaction() {
            log::warn!("Compaction failed before close: {e:?}");
        }

        log::trace!("close: acquiring state write lock");
        let mut state = self.state.write().expect("lock is poisoned");

        let memtables = state
            .sealed
            .iter()
            .rev()
            .chain(std::iter::once(&state.active))
            .cloned()
            .collect::<Vec<_>>();

        for memtable in memtables {
            if let Some(segment) = self.manager.flush(&memtable)? {
                log::debug!("close: persisted memtable as segment {}", segment.priority());
            }

            if Arc::ptr_eq(&memtable, &state.active) {
                state.active = Arc::default();
            } else {
                state.sealed.retain(|x| !Arc::ptr_eq(x, &memtable));
            }
        }

        if !state.sealed.is_empty() || !state.active.is_empty() {
            return Err(crate::Error::Internal("buffered data left after close"));
        }

        state.segments = Arc::default();

        log::info!("Closed engine at {}", self.config.path.display());

        Ok(())
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        log::debug!("Dropping EngineInner");

        if let Err(e) = self.close() {
            log::warn!("Failed to close engine on drop: {e:?}");
        }
    }
}
