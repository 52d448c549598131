//! Bounded snapshot store.
//!
//! Policy layer over a [`PersistentStore`]: one snapshot per unit, at most
//! `capacity` snapshots overall, and a fixed eviction order when room is
//! needed:
//!
//! 1. snapshots of units the host no longer lists,
//! 2. the oldest remaining snapshots by insertion sequence,
//! 3. never the unit currently being written.
//!
//! # Key Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `screenshot_{id}` | image as a base64 data URL |
//! | `lastUrl_{id}` | source locator at capture time |
//! | `seq_{id}` | insertion sequence number |
//!
//! The three keys of a unit are always written in one `set` call, so a
//! failed write leaves the previous snapshot intact.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::host::HostSurface;
use crate::identifiers::UnitId;
use crate::imaging::{Raster, SnapshotFormat};

use super::backend::{PersistentStore, StorageMap};

// ============================================================================
// Constants
// ============================================================================

/// Key prefix for the encoded image.
const SCREENSHOT_PREFIX: &str = "screenshot_";

/// Key prefix for the source locator.
const LOCATOR_PREFIX: &str = "lastUrl_";

/// Key prefix for the insertion sequence.
const SEQUENCE_PREFIX: &str = "seq_";

/// Default Storage Budget.
pub const DEFAULT_CAPACITY: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// A stored snapshot, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Owning unit.
    pub unit_id: UnitId,
    /// Captured image.
    pub image: Raster,
    /// Locator at capture time. Diagnostic only.
    pub locator: String,
    /// Insertion sequence; larger is newer.
    pub sequence: u64,
}

/// Metadata of a stored snapshot, without decoding the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    /// Owning unit.
    pub unit_id: UnitId,
    /// Locator at capture time, if recorded.
    pub locator: Option<String>,
    /// Insertion sequence.
    pub sequence: u64,
    /// Size of the stored data URL.
    pub encoded_bytes: usize,
}

/// What an eviction pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Snapshots of units that no longer exist.
    pub stale: Vec<UnitId>,
    /// Live snapshots removed oldest-first.
    pub oldest: Vec<UnitId>,
}

impl EvictionReport {
    /// Number of snapshots removed.
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.stale.len() + self.oldest.len()
    }

    /// Returns `true` if nothing was removed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Which room-making rule a pass applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Before a write: bring occupancy below the bound.
    Capacity,
    /// After a quota failure: free at least one more slot.
    Quota,
}

// ============================================================================
// SnapshotStore
// ============================================================================

/// Bounded mapping from unit id to its latest snapshot.
///
/// Writes for one unit are serialized; different units proceed
/// independently up to the write itself. Eviction passes and writes are
/// serialized against each other.
pub struct SnapshotStore {
    /// Underlying key-value backend.
    backend: Arc<dyn PersistentStore>,
    /// Source of the live-unit set.
    host: Arc<dyn HostSurface>,
    /// Maximum number of snapshots.
    capacity: usize,
    /// Encoding for stored images.
    format: SnapshotFormat,
    /// Next insertion sequence.
    next_sequence: AtomicU64,
    /// Per-unit write locks.
    unit_locks: Mutex<FxHashMap<UnitId, Arc<AsyncMutex<()>>>>,
    /// Serializes eviction passes.
    maintenance: AsyncMutex<()>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("capacity", &self.capacity)
            .field("format", &self.format)
            .field("next_sequence", &self.next_sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SnapshotStore - Constructor
// ============================================================================

impl SnapshotStore {
    /// Opens the store over an existing backend.
    ///
    /// Scans the backend once so that sequence numbers keep increasing
    /// across restarts.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `capacity` is zero
    /// - [`Error::StorageUnavailable`] if the backend cannot be read
    pub async fn open(
        backend: Arc<dyn PersistentStore>,
        host: Arc<dyn HostSurface>,
        capacity: usize,
        format: SnapshotFormat,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("snapshot capacity must be at least 1"));
        }

        let store = Self {
            backend,
            host,
            capacity,
            format,
            next_sequence: AtomicU64::new(1),
            unit_locks: Mutex::new(FxHashMap::default()),
            maintenance: AsyncMutex::new(()),
        };

        let index = store.index().await?;
        let next = index.iter().map(|(_, seq)| *seq).max().unwrap_or(0) + 1;
        store.next_sequence.store(next, Ordering::SeqCst);

        debug!(
            capacity,
            existing = index.len(),
            next_sequence = next,
            "SnapshotStore opened"
        );
        Ok(store)
    }
}

// ============================================================================
// SnapshotStore - Public API
// ============================================================================

impl SnapshotStore {
    /// Returns the Storage Budget.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stores or overwrites the snapshot for a unit.
    ///
    /// Makes room first if the store is full. If the backend still reports
    /// a quota failure, one more full eviction pass runs and the write is
    /// retried once. Returns the snapshot's insertion sequence.
    ///
    /// # Errors
    ///
    /// - [`Error::StorageExhausted`] if the retried write also hit the quota
    /// - [`Error::StorageUnavailable`] on backend failure
    pub async fn put(&self, unit_id: UnitId, image: Raster, locator: &str) -> Result<u64> {
        let lock = self.unit_lock(unit_id);
        let _guard = lock.lock().await;

        let format = self.format;
        let data_url = task::spawn_blocking(move || image.to_data_url(format))
            .await
            .map_err(|e| Error::invalid_image(format!("encoder worker failed: {e}")))??;

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let items = entry_items(unit_id, data_url, locator, sequence);

        // Room-making and the write form one maintenance section, otherwise
        // two new units could both claim the last free slot.
        let _maintenance = self.maintenance.lock().await;
        self.make_room(unit_id, Pass::Capacity).await?;

        match self.backend.set(items.clone()).await {
            Ok(()) => {}
            Err(e) if e.is_quota_exceeded() => {
                warn!(unit_id = %unit_id, error = %e, "Storage quota exceeded, evicting and retrying");
                self.make_room(unit_id, Pass::Quota).await?;

                match self.backend.set(items).await {
                    Ok(()) => {
                        info!(unit_id = %unit_id, sequence, "Snapshot stored after eviction retry");
                    }
                    Err(e) if e.is_quota_exceeded() => {
                        warn!(unit_id = %unit_id, error = %e, "Snapshot dropped, storage exhausted");
                        return Err(Error::storage_exhausted(unit_id));
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }

        debug!(unit_id = %unit_id, sequence, locator = %locator, "Snapshot stored");
        Ok(sequence)
    }

    /// Returns the stored snapshot for a unit, if any.
    ///
    /// # Errors
    ///
    /// - [`Error::StorageUnavailable`] on backend failure
    /// - [`Error::InvalidImage`] if the stored image cannot be decoded
    pub async fn get(&self, unit_id: UnitId) -> Result<Option<Snapshot>> {
        let mut found = self.backend.get(&unit_keys(unit_id)).await?;

        let Some(image) = found.remove(&screenshot_key(unit_id)) else {
            return Ok(None);
        };
        let Value::String(data_url) = image else {
            return Err(Error::invalid_image(format!(
                "stored snapshot for unit {unit_id} is not a data URL"
            )));
        };

        let image = task::spawn_blocking(move || Raster::from_data_url(&data_url))
            .await
            .map_err(|e| Error::invalid_image(format!("decoder worker failed: {e}")))??;

        let locator = found
            .remove(&locator_key(unit_id))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let sequence = found
            .get(&sequence_key(unit_id))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Ok(Some(Snapshot {
            unit_id,
            image,
            locator,
            sequence,
        }))
    }

    /// Returns `true` if a snapshot is stored for the unit.
    pub async fn contains(&self, unit_id: UnitId) -> Result<bool> {
        let found = self.backend.get(&[screenshot_key(unit_id)]).await?;
        Ok(!found.is_empty())
    }

    /// Removes a unit's snapshot. Removing a missing snapshot is a no-op.
    pub async fn remove(&self, unit_id: UnitId) -> Result<()> {
        {
            let lock = self.unit_lock(unit_id);
            let _guard = lock.lock().await;
            self.backend.remove(&unit_keys(unit_id)).await?;
        }
        self.prune_lock(unit_id);

        debug!(unit_id = %unit_id, "Snapshot removed");
        Ok(())
    }

    /// Brings the store back within its bound.
    ///
    /// Does nothing while occupancy is within capacity. Otherwise removes
    /// every snapshot of a unit outside `live`, then the oldest remaining
    /// ones until the bound holds.
    pub async fn evict_excess(&self, live: &FxHashSet<UnitId>) -> Result<EvictionReport> {
        self.evict(live, self.capacity, None).await
    }

    /// Like [`evict_excess`](Self::evict_excess), never touching `requested`.
    pub async fn evict_excess_for(
        &self,
        live: &FxHashSet<UnitId>,
        requested: UnitId,
    ) -> Result<EvictionReport> {
        self.evict(live, self.capacity, Some(requested)).await
    }

    /// Number of stored snapshots.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.index().await?.len())
    }

    /// Returns `true` if no snapshot is stored.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Lists stored snapshots, oldest first.
    pub async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        let all = self.backend.get_all().await?;

        let mut summaries: Vec<SnapshotSummary> = all
            .iter()
            .filter_map(|(key, value)| {
                let unit_id = parse_unit(key, SCREENSHOT_PREFIX)?;
                Some(SnapshotSummary {
                    unit_id,
                    locator: all
                        .get(&locator_key(unit_id))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    sequence: all
                        .get(&sequence_key(unit_id))
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                    encoded_bytes: value.as_str().map_or(0, str::len),
                })
            })
            .collect();

        summaries.sort_by_key(|s| (s.sequence, s.unit_id));
        Ok(summaries)
    }
}

// ============================================================================
// SnapshotStore - Eviction
// ============================================================================

impl SnapshotStore {
    /// Makes room before (or after a failed) write for `unit_id`.
    ///
    /// The caller holds the maintenance lock. The live set is re-read on
    /// every pass since units may have closed in between.
    async fn make_room(&self, unit_id: UnitId, pass: Pass) -> Result<EvictionReport> {
        let live: FxHashSet<UnitId> = self.host.live_units().await?.into_iter().collect();
        let index = self.index().await?;

        let occupancy = index.len();
        let has_entry = index.iter().any(|(id, _)| *id == unit_id);
        // An overwrite does not grow the store; a new entry needs one slot.
        let room_target = if has_entry {
            self.capacity
        } else {
            self.capacity - 1
        };

        let target = match pass {
            Pass::Capacity => room_target,
            Pass::Quota => room_target.min(occupancy.saturating_sub(1)),
        };

        let plan = plan_eviction(&index, &live, target, Some(unit_id));
        self.apply(&plan).await?;

        if !plan.is_empty() {
            debug!(
                unit_id = %unit_id,
                pass = ?pass,
                stale = plan.stale.len(),
                oldest = plan.oldest.len(),
                "Made room for snapshot"
            );
        }
        Ok(plan)
    }

    /// Evicts down to `target` entries.
    async fn evict(
        &self,
        live: &FxHashSet<UnitId>,
        target: usize,
        protect: Option<UnitId>,
    ) -> Result<EvictionReport> {
        let _maintenance = self.maintenance.lock().await;
        let index = self.index().await?;

        let plan = plan_eviction(&index, live, target, protect);
        self.apply(&plan).await?;

        if !plan.is_empty() {
            info!(
                stale = plan.stale.len(),
                oldest = plan.oldest.len(),
                remaining = index.len() - plan.total(),
                "Evicted excess snapshots"
            );
        }
        Ok(plan)
    }

    /// Removes every unit named in the plan in one backend call.
    async fn apply(&self, plan: &EvictionReport) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = plan
            .stale
            .iter()
            .chain(plan.oldest.iter())
            .flat_map(|id| unit_keys(*id))
            .collect();
        self.backend.remove(&keys).await?;

        for unit_id in plan.stale.iter().chain(plan.oldest.iter()) {
            self.prune_lock(*unit_id);
        }
        Ok(())
    }

    /// `(unit, sequence)` for every stored snapshot.
    async fn index(&self) -> Result<Vec<(UnitId, u64)>> {
        let all = self.backend.get_all().await?;
        Ok(all
            .keys()
            .filter_map(|key| parse_unit(key, SCREENSHOT_PREFIX))
            .map(|id| {
                let seq = all
                    .get(&sequence_key(id))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                (id, seq)
            })
            .collect())
    }

    /// Returns the write lock for a unit.
    fn unit_lock(&self, unit_id: UnitId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.unit_locks.lock().entry(unit_id).or_default())
    }

    /// Drops a unit's lock entry once no task holds or waits on it.
    ///
    /// Clones are handed out under the registry mutex, so a count of one
    /// means the map holds the only reference.
    fn prune_lock(&self, unit_id: UnitId) {
        let mut locks = self.unit_locks.lock();
        if locks
            .get(&unit_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&unit_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.unit_locks.lock().len()
    }
}

// ============================================================================
// Eviction Planning
// ============================================================================

/// Chooses which snapshots to remove so at most `target` remain.
///
/// Non-live units go first (all of them), then live ones oldest-first.
/// `protect` is never chosen.
pub(crate) fn plan_eviction(
    index: &[(UnitId, u64)],
    live: &FxHashSet<UnitId>,
    target: usize,
    protect: Option<UnitId>,
) -> EvictionReport {
    let mut report = EvictionReport::default();
    if index.len() <= target {
        return report;
    }

    let evictable = |id: &UnitId| Some(*id) != protect;

    report.stale = index
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| evictable(id) && !live.contains(id))
        .collect();
    report.stale.sort();

    let mut remaining = index.len() - report.stale.len();
    if remaining <= target {
        return report;
    }

    let mut candidates: Vec<(u64, UnitId)> = index
        .iter()
        .filter(|(id, _)| evictable(id) && live.contains(id))
        .map(|(id, seq)| (*seq, *id))
        .collect();
    candidates.sort();

    for (_, id) in candidates {
        if remaining <= target {
            break;
        }
        report.oldest.push(id);
        remaining -= 1;
    }
    report
}

// ============================================================================
// Key Helpers
// ============================================================================

fn screenshot_key(unit_id: UnitId) -> String {
    format!("{SCREENSHOT_PREFIX}{unit_id}")
}

fn locator_key(unit_id: UnitId) -> String {
    format!("{LOCATOR_PREFIX}{unit_id}")
}

fn sequence_key(unit_id: UnitId) -> String {
    format!("{SEQUENCE_PREFIX}{unit_id}")
}

fn unit_keys(unit_id: UnitId) -> [String; 3] {
    [
        screenshot_key(unit_id),
        locator_key(unit_id),
        sequence_key(unit_id),
    ]
}

fn parse_unit(key: &str, prefix: &str) -> Option<UnitId> {
    key.strip_prefix(prefix)?.parse().ok()
}

fn entry_items(unit_id: UnitId, data_url: String, locator: &str, sequence: u64) -> StorageMap {
    let mut items = StorageMap::default();
    items.insert(screenshot_key(unit_id), Value::String(data_url));
    items.insert(locator_key(unit_id), Value::String(locator.to_string()));
    items.insert(sequence_key(unit_id), Value::from(sequence));
    items
}

// ============================================================================
// Tests
// ============================================================================
