//! Single-file JSON backend.
//!
//! Entries live in memory and every mutation rewrites the whole document
//! (write to a sibling temp file, then rename). Quota semantics match
//! [`MemoryStore`](super::MemoryStore).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::backend::{DEFAULT_QUOTA_BYTES, PersistentStore, StorageMap, map_size, size_after_set};

// ============================================================================
// JsonFileStore
// ============================================================================

/// Backend persisted as one JSON object on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    quota_bytes: usize,
    entries: Mutex<StorageMap>,
}

impl JsonFileStore {
    /// Opens (or creates on first write) the store at `path`.
    ///
    /// # Errors
    ///
    /// - [`Error::StorageUnavailable`] if the file exists but cannot be read
    /// - [`Error::Json`] if the file is not a JSON object
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_quota(path, DEFAULT_QUOTA_BYTES).await
    }

    /// Opens the store with a custom quota in bytes.
    pub async fn open_with_quota(path: impl AsRef<Path>, quota_bytes: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => StorageMap::default(),
            Ok(bytes) => serde_json::from_slice::<StorageMap>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StorageMap::default(),
            Err(e) => {
                return Err(Error::storage_unavailable(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        debug!(path = %path.display(), keys = entries.len(), "JsonFileStore opened");

        Ok(Self {
            path,
            quota_bytes,
            entries: Mutex::new(entries),
        })
    }

    /// Returns the backing file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the full document to disk.
    async fn flush(&self, entries: &StorageMap) -> Result<()> {
        let bytes = serde_json::to_vec(entries)?;
        let tmp = self.path.with_extension("json.tmp");

        let write = async {
            fs::write(&tmp, &bytes).await?;
            fs::rename(&tmp, &self.path).await
        };

        write.await.map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "JsonFileStore flush failed");
            Error::storage_unavailable(format!("cannot write {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn get(&self, keys: &[String]) -> Result<StorageMap> {
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn get_all(&self) -> Result<StorageMap> {
        Ok(self.entries.lock().await.clone())
    }

    async fn set(&self, items: StorageMap) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let requested = size_after_set(&entries, &items);
        if requested > self.quota_bytes {
            return Err(Error::quota_exceeded(requested, self.quota_bytes));
        }

        let mut next = entries.clone();
        next.extend(items);
        self.flush(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if !keys.iter().any(|k| entries.contains_key(k)) {
            return Ok(());
        }

        let mut next = entries.clone();
        for key in keys {
            next.remove(key);
        }
        self.flush(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn bytes_in_use(&self) -> Result<usize> {
        Ok(map_size(&*self.entries.lock().await))
    }
}

// ============================================================================
// Tests
// ============================================================================
