// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{path::absolute_path, Engine};
use std::path::{Path, PathBuf};

/// Decides how often [`Engine::compact`] actually merges segments
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CompactionPolicy {
    /// Compact at most once between two flushes
    ///
    /// Without new segments another run would only rewrite the same data.
    #[default]
    OncePerFlush,

    /// Compact whenever there are at least two segments
    Always,
}

/// Engine configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Folder path
    ///
    /// Defaults to `./.lsm.data`
    pub(crate) path: PathBuf,

    /// Size of the active memtable in bytes after which writes trigger a flush
    ///
    /// Defaults to 64 MiB
    pub(crate) flush_threshold: u64,

    /// Compaction gating
    ///
    /// Defaults to [`CompactionPolicy::OncePerFlush`]
    pub(crate) compaction_policy: CompactionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: ".lsm.data".into(),
            flush_threshold: 64 * 1_024 * 1_024,
            compaction_policy: CompactionPolicy::default(),
        }
    }
}

impl Config {
    /// Initializes a new config
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().into(),
            ..Default::default()
        }
    }

    /// Sets the memtable size that triggers a flush (default: 64 MiB)
    #[must_use]
    pub fn flush_threshold(mut self, bytes: u64) -> Self {
        self.flush_threshold = bytes;
        self
    }

    /// Sets the compaction policy (default: once per flush)
    #[must_use]
    pub fn compaction_policy(mut self, policy: CompactionPolicy) -> Self {
        self.compaction_policy = policy;
        self
    }

    /// Opens an engine using the config
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open(mut self) -> crate::Result<Engine> {
        self.path = absolute_path(&self.path)?;
        Engine::open_with_config(self)
    }
}
