// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    file::{
        fsync_directory, parse_file_name, segment_file_path, temp_file_path, FileKind,
        LOWEST_PRIORITY,
    },
    memtable::MemTable,
    merge::{BoxedIterator, MergeIterator},
    priority::{Priority, PriorityCounter},
    segment::{writer::write_segment, Segment},
    segment_set::SegmentSet,
    tombstone::TombstoneFilter,
    Entry,
};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Result of a compaction run
pub struct CompactionOutcome {
    /// Priorities of the segments that were merged and deleted
    pub inputs: Vec<Priority>,

    /// Merged segment, `None` if every entry was deleted
    pub output: Option<Arc<Segment>>,
}

/// Owns the segment files of a store folder
///
/// Every change to the set of files on disk (the final rename of a new segment,
/// and the deletions and rename at the end of a compaction) happens under the
/// rewrite lock, so flushes and compactions can run concurrently.
pub struct SegmentManager {
    folder: PathBuf,
    priority: PriorityCounter,
    rewrite_lock: Mutex<()>,
}

impl SegmentManager {
    /// Recovers all segments of a folder, creating the folder if needed
    ///
    /// Leftovers of interrupted segment writes are deleted.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or a segment is corrupt.
    pub fn load<P: AsRef<Path>>(folder: P) -> crate::Result<(Self, SegmentSet)> {
        let folder = folder.as_ref();
        log::debug!("Recovering disk segments from {}", folder.display());

        std::fs::create_dir_all(folder)?;

        let mut priorities = vec![];
        let mut removed_leftovers = false;

        for dirent in std::fs::read_dir(folder)? {
            let dirent = dirent?;

            if !dirent.file_type()?.is_file() {
                continue;
            }

            let file_name = dirent.file_name();
            let Some(kind) = file_name.to_str().and_then(parse_file_name) else {
                log::trace!("Ignoring foreign file {:?}", dirent.path());
                continue;
            };

            match kind {
                FileKind::Segment(priority) => priorities.push(priority),
                FileKind::Unfinished(_) => {
                    log::warn!("Deleting unfinished segment write {:?}", dirent.path());
                    std::fs::remove_file(dirent.path())?;
                    removed_leftovers = true;
                }
            }
        }

        if removed_leftovers {
            fsync_directory(folder)?;
        }

        priorities.sort_unstable_by(|a, b| b.cmp(a));

        let mut segments = Vec::with_capacity(priorities.len());

        for &priority in &priorities {
            let segment_path = segment_file_path(folder, priority);
            log::debug!("Recovering segment from {}", segment_path.display());

            segments.push(Arc::new(Segment::recover(&segment_path, priority)?));
        }

        log::debug!("Recovered {} segments", segments.len());

        let set = SegmentSet::new(segments);

        let manager = Self {
            folder: folder.to_path_buf(),
            priority: PriorityCounter::after(set.max_priority())?,
            rewrite_lock: Mutex::default(),
        };

        Ok((manager, set))
    }

    /// Returns the store folder
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Peeks at the priority the next saved segment gets
    #[must_use]
    pub fn next_priority(&self) -> Priority {
        self.priority.get()
    }

    /// Writes sorted entries into a new segment with a fresh priority
    ///
    /// The segment is written to a temporary file first and only becomes
    /// visible in the folder once it is fully durable.
    ///
    /// Returns `None` if there is nothing to write.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn save(&self, entries: &[Entry]) -> crate::Result<Option<Arc<Segment>>> {
        if entries.is_empty() {
            return Ok(None);
        }

        let priority = self.priority.next();
        let temp_path = temp_file_path(&self.folder, priority);
        let segment_path = segment_file_path(&self.folder, priority);

        log::debug!(
            "Writing segment {priority} with {} entries to {}",
            entries.len(),
            temp_path.display()
        );

        if let Err(e) = write_segment(&temp_path, entries) {
            log::error!("Failed to write segment {priority}: {e:?}");

            if let Err(e) = std::fs::remove_file(&temp_path) {
                log::warn!("Could not clean up {}: {e:?}", temp_path.display());
            }

            return Err(e);
        }

        {
            log::trace!("save: acquiring rewrite lock");
            let _lock = self.rewrite_lock.lock().expect("lock is poisoned");

            std::fs::rename(&temp_path, &segment_path)?;
            fsync_directory(&self.folder)?;
        }

        log::debug!("Finalized segment write at {}", segment_path.display());

        Ok(Some(Arc::new(Segment::recover(&segment_path, priority)?)))
    }

    /// Persists a sealed memtable as a new segment
    ///
    /// Tombstones are kept, they still need to shadow older segments.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn flush(&self, memtable: &MemTable) -> crate::Result<Option<Arc<Segment>>> {
        let entries = memtable.iter().collect::<Vec<_>>();
        self.save(&entries)
    }

    /// Merges all segments of the given set into one, dropping shadowed versions and tombstones
    ///
    /// The merged segment takes the lowest priority slot, so segments that were
    /// flushed in the meantime stay newer than it. Only the merged input files
    /// are deleted.
    ///
    /// Returns `None` if there was nothing to compact.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or a segment is corrupt.
    pub fn compact(&self, set: &SegmentSet) -> crate::Result<Option<CompactionOutcome>> {
        if set.len() < 2 {
            log::trace!("compactor: nothing to do for {} segment(s)", set.len());
            return Ok(None);
        }

        let inputs = set.priorities();

        log::info!(
            "compactor: merging {} segments ({} bytes)",
            inputs.len(),
            set.disk_space()
        );

        let iterators = set
            .iter()
            .map(|segment| Box::new(segment.iter()) as BoxedIterator<'_>)
            .collect();

        let entries = TombstoneFilter::new(MergeIterator::new(iterators))
            .collect::<crate::Result<Vec<_>>>()?;

        log::debug!("compactor: merged into {} live entries", entries.len());

        let written = self.save(&entries)?;

        log::trace!("compactor: acquiring rewrite lock");
        let _lock = self.rewrite_lock.lock().expect("lock is poisoned");

        for segment in set.iter() {
            log::trace!("Removing segment file {}", segment.path().display());
            std::fs::remove_file(segment.path())?;
        }

        let output = match written {
            Some(segment) => {
                let lowest_path = segment_file_path(&self.folder, LOWEST_PRIORITY);

                log::trace!(
                    "Demoting {} to {}",
                    segment.path().display(),
                    lowest_path.display()
                );
                std::fs::rename(segment.path(), &lowest_path)?;

                Some(Arc::new(Segment::recover(&lowest_path, LOWEST_PRIORITY)?))
            }
            None => None,
        };

        fsync_directory(&self.folder)?;

        log::info!("compactor: done, {} segments replaced", inputs.len());

        Ok(Some(CompactionOutcome { inputs, output }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn file_names(folder: &Path) -> crate::Result<Vec<String>> {
        let mut names = std::fs::read_dir(folder)?
            .map(|x| x.map(|x| x.file_name().to_string_lossy().to_string()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    #[test]
    fn manager_load_empty() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let path = folder.path().join("store");

        let (manager, set) = SegmentManager::load(&path)?;

        assert!(path.try_exists()?);
        assert!(set.is_empty());
        assert_eq!(1, manager.next_priority());

        Ok(())
    }

    #[test]
    fn manager_save_and_reload() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;

        {
            let (manager, _) = SegmentManager::load(folder.path())?;
            assert!(manager.save(&[])?.is_none());

            let segment = manager.save(&[Entry::new("a", "1")])?;
            assert_eq!(Some(1), segment.map(|x| x.priority()));

            manager.save(&[Entry::new("a", "2")])?;
        }

        assert_eq!(vec!["data1.dat", "data2.dat"], file_names(folder.path())?);

        let (manager, set) = SegmentManager::load(folder.path())?;
        assert_eq!(vec![2, 1], set.priorities());
        assert_eq!(3, manager.next_priority());
        assert_eq!(Some(Entry::new("a", "2")), set.get(b"a")?);

        Ok(())
    }

    #[test]
    fn manager_load_cleans_leftovers() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;

        write_segment(segment_file_path(folder.path(), 4), &[Entry::new("a", "")])?;
        std::fs::write(temp_file_path(folder.path(), 5), b"garbage")?;
        std::fs::write(folder.path().join("notes.txt"), b"foreign")?;

        let (manager, set) = SegmentManager::load(folder.path())?;

        assert_eq!(vec![4], set.priorities());
        assert_eq!(5, manager.next_priority());
        assert_eq!(vec!["data4.dat", "notes.txt"], file_names(folder.path())?);

        Ok(())
    }

    #[test]
    fn manager_load_highest_priority() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        write_segment(segment_file_path(folder.path(), u64::MAX), &[Entry::new("a", "")])?;

        assert!(matches!(
            SegmentManager::load(folder.path()),
            Err(crate::Error::Corrupt(crate::CorruptionKind::PriorityExhausted(u64::MAX)))
        ));

        Ok(())
    }

    #[test]
    fn manager_load_corrupt_segment() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        std::fs::write(segment_file_path(folder.path(), 1), [1, 2, 3])?;

        assert!(matches!(
            SegmentManager::load(folder.path()),
            Err(crate::Error::Corrupt(_))
        ));

        Ok(())
    }

    #[test]
    fn manager_compact() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let (manager, set) = SegmentManager::load(folder.path())?;

        let set = (0..3).try_fold(set, |set, idx| -> crate::Result<SegmentSet> {
            let entries = [
                Entry::new("a", format!("{idx}")),
                Entry::new(format!("k{idx}"), "v"),
            ];

            Ok(match manager.save(&entries)? {
                Some(segment) => set.with_flushed(segment),
                None => set,
            })
        })?;

        let set = match manager.save(&[Entry::tombstone("k1")])? {
            Some(segment) => set.with_flushed(segment),
            None => set,
        };

        let outcome = manager.compact(&set)?.ok_or(crate::Error::Internal("no outcome"))?;
        assert_eq!(vec![4, 3, 2, 1], outcome.inputs);

        let set = set.with_compacted(&outcome.inputs, outcome.output);
        assert_eq!(vec![0], set.priorities());
        assert_eq!(vec!["data0.dat"], file_names(folder.path())?);

        let items = set
            .iter()
            .flat_map(|x| x.iter())
            .collect::<crate::Result<Vec<_>>>()?;

        assert_eq!(
            vec![
                Entry::new("a", "2"),
                Entry::new("k0", "v"),
                Entry::new("k2", "v"),
            ],
            items
        );

        // Compacting a single segment is a no-op
        assert!(manager.compact(&set)?.is_none());

        Ok(())
    }

    #[test]
    fn manager_compact_everything_deleted() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let (manager, _) = SegmentManager::load(folder.path())?;

        let old = manager.save(&[Entry::new("a", "1")])?;
        let new = manager.save(&[Entry::tombstone("a")])?;
        let set = SegmentSet::new(old.into_iter().chain(new).collect());

        let outcome = manager.compact(&set)?.ok_or(crate::Error::Internal("no outcome"))?;
        assert!(outcome.output.is_none());
        assert!(file_names(folder.path())?.is_empty());

        Ok(())
    }

    #[test]
    fn manager_compact_keeps_concurrent_flush() -> crate::Result<()> {
        let folder = tempfile::tempdir()?;
        let (manager, _) = SegmentManager::load(folder.path())?;

        let a = manager.save(&[Entry::new("a", "1")])?;
        let b = manager.save(&[Entry::new("a", "2")])?;
        let snapshot = SegmentSet::new(a.into_iter().chain(b).collect());

        // Flushed after the compaction took its snapshot
        let c = manager.save(&[Entry::new("a", "3")])?;

        let outcome = manager.compact(&snapshot)?.ok_or(crate::Error::Internal("no outcome"))?;
        let set = snapshot
            .with_flushed(c.ok_or(crate::Error::Internal("no segment"))?)
            .with_compacted(&outcome.inputs, outcome.output);

        assert_eq!(vec![3, 0], set.priorities());
        assert_eq!(Some(Entry::new("a", "3")), set.get(b"a")?);
        assert_eq!(vec!["data0.dat", "data3.dat"], file_names(folder.path())?);

        Ok(())
    }
}
