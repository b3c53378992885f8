// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::Arc;

/// User defined key
pub type UserKey = Arc<[u8]>;

/// User defined data (blob of bytes)
pub type UserValue = Arc<[u8]>;

/// Represents a record in the store
///
/// `key` and `value` are arbitrary user-defined byte arrays.
/// An entry without a value is a tombstone: it marks the key
/// as deleted and shadows older versions until compaction drops it.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    /// User-defined key - an arbitrary byte array
    pub key: UserKey,

    /// User-defined value - `None` for tombstones
    pub value: Option<UserValue>,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{:?} => {:?}", self.key, value),
            None => write!(f, "{:?} => <tombstone>", self.key),
        }
    }
}

impl Entry {
    /// Creates a new [`Entry`] holding a value.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lsm_kv::Entry;
    /// #
    /// let entry = Entry::new("key-1", "my-value");
    /// assert_eq!(b"key-1", &*entry.key);
    /// assert_eq!(Some(b"my-value".as_slice()), entry.value.as_deref());
    /// assert!(!entry.is_tombstone());
    /// ```
    pub fn new<K: AsRef<[u8]>, V: AsRef<[u8]>>(key: K, value: V) -> Self {
        Self {
            key: key.as_ref().into(),
            value: Some(value.as_ref().into()),
        }
    }

    /// Creates a tombstone for the given key.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lsm_kv::Entry;
    /// #
    /// let entry = Entry::tombstone("key-1");
    /// assert!(entry.is_tombstone());
    /// ```
    pub fn tombstone<K: AsRef<[u8]>>(key: K) -> Self {
        Self {
            key: key.as_ref().into(),
            value: None,
        }
    }

    /// Returns `true` if the entry marks a deletion
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Amount of user bytes the entry accounts for in the write buffer
    ///
    /// Tombstones only count their key.
    #[must_use]
    pub fn size(&self) -> u64 {
        let value_size = self.value.as_ref().map_or(0, |v| v.len());
        (self.key.len() + value_size) as u64
    }
}

impl From<(UserKey, Option<UserValue>)> for Entry {
    fn from((key, value): (UserKey, Option<UserValue>)) -> Self {
        Self { key, value }
    }
}
