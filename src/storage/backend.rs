//! Persistent key-value backends.
//!
//! The contract mirrors an extension storage area: values are JSON,
//! `set` writes a whole mapping atomically, and a write that would push
//! the stored size past the quota fails with [`Error::QuotaExceeded`]
//! and changes nothing.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default quota: 10 MiB, the size of a browser extension's local area.
pub const DEFAULT_QUOTA_BYTES: usize = 10 * 1024 * 1024;

// ============================================================================
// Types
// ============================================================================

/// Key-value mapping exchanged with a backend.
pub type StorageMap = FxHashMap<String, Value>;

// ============================================================================
// PersistentStore
// ============================================================================

/// Quota-bearing key-value storage.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Reads the given keys. Missing keys are absent from the result.
    async fn get(&self, keys: &[String]) -> Result<StorageMap>;

    /// Reads every stored entry.
    async fn get_all(&self) -> Result<StorageMap>;

    /// Writes all entries or none.
    ///
    /// # Errors
    ///
    /// - [`Error::QuotaExceeded`] if the result would exceed the quota
    /// - [`Error::StorageUnavailable`] on backend failure
    async fn set(&self, items: StorageMap) -> Result<()>;

    /// Removes the given keys. Missing keys are ignored.
    async fn remove(&self, keys: &[String]) -> Result<()>;

    /// Bytes currently counted against the quota.
    async fn bytes_in_use(&self) -> Result<usize>;
}

// ============================================================================
// Size Accounting
// ============================================================================

/// Size of one entry as counted against the quota: key plus JSON value.
pub(crate) fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + value.to_string().len()
}

/// Total size of a map.
pub(crate) fn map_size(map: &StorageMap) -> usize {
    map.iter().map(|(k, v)| entry_size(k, v)).sum()
}

/// Size `current` would have after overwriting/adding `items`.
pub(crate) fn size_after_set(current: &StorageMap, items: &StorageMap) -> usize {
    let replaced: usize = items
        .keys()
        .filter_map(|k| current.get(k).map(|v| entry_size(k, v)))
        .sum();
    map_size(current) - replaced + map_size(items)
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-process backend with a byte quota.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<StorageMap>,
    quota_bytes: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with the default quota.
    #[must_use]
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    /// Creates an empty store with a custom quota in bytes.
    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(StorageMap::default()),
            quota_bytes,
        }
    }

    /// Returns the quota in bytes.
    #[inline]
    #[must_use]
    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    /// Returns the number of stored keys.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, keys: &[String]) -> Result<StorageMap> {
        let entries = self.entries.read();
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn get_all(&self) -> Result<StorageMap> {
        Ok(self.entries.read().clone())
    }

    async fn set(&self, items: StorageMap) -> Result<()> {
        let mut entries = self.entries.write();
        let requested = size_after_set(&entries, &items);
        if requested > self.quota_bytes {
            return Err(Error::quota_exceeded(requested, self.quota_bytes));
        }

        trace!(keys = items.len(), bytes = requested, "MemoryStore set");
        entries.extend(items);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn bytes_in_use(&self) -> Result<usize> {
        Ok(map_size(&self.entries.read()))
    }
}

// ============================================================================
// Tests
// ============================================================================
