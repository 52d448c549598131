//! In-crate fakes for the host collaborators.

use std::io;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing_subscriber::EnvFilter;

use crate::detection::{ComparisonResult, Severity, Status};
use crate::error::{Error, Result};
use crate::host::{CapturePrimitive, HostSurface, ResultSink, UnitInfo};
use crate::identifiers::UnitId;
use crate::imaging::Raster;
use crate::storage::{MemoryStore, PersistentStore, StorageMap};

// ============================================================================
// Helpers
// ============================================================================

/// Installs a test subscriber once; honours `RUST_LOG`.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn unit(id: u32) -> UnitId {
    UnitId::new(id).expect("test unit ids are non-zero")
}

/// Small solid image whose color depends on `seed`.
pub(crate) fn image(seed: u8) -> Raster {
    Raster::solid(
        16,
        16,
        [
            seed.wrapping_mul(47),
            seed.wrapping_mul(101),
            seed.wrapping_mul(29),
            255,
        ],
    )
}

// ============================================================================
// FakeHost
// ============================================================================

pub(crate) struct FakeHost {
    units: Mutex<FxHashMap<UnitId, UnitInfo>>,
}

impl FakeHost {
    /// Host with live, focused units on ordinary pages.
    pub(crate) fn with_live(ids: &[u32]) -> Arc<Self> {
        init_tracing();
        let units = ids
            .iter()
            .map(|id| (unit(*id), Self::page(*id)))
            .collect();
        Arc::new(Self {
            units: Mutex::new(units),
        })
    }

    fn page(id: u32) -> UnitInfo {
        UnitInfo::new(unit(id), format!("https://unit{id}.example/"))
            .with_title(format!("Page {id}"))
    }

    pub(crate) fn insert(&self, info: UnitInfo) {
        self.units.lock().insert(info.id, info);
    }

    pub(crate) fn close(&self, unit_id: UnitId) {
        if let Some(info) = self.units.lock().get_mut(&unit_id) {
            info.is_live = false;
        }
    }

    pub(crate) fn open(&self, unit_id: UnitId) {
        self.units
            .lock()
            .entry(unit_id)
            .or_insert_with(|| Self::page(unit_id.as_u32()))
            .is_live = true;
    }

    pub(crate) fn set_focused(&self, unit_id: UnitId, focused: bool) {
        if let Some(info) = self.units.lock().get_mut(&unit_id) {
            info.is_focused = focused;
        }
    }

    pub(crate) fn set_locator(&self, unit_id: UnitId, locator: &str) {
        if let Some(info) = self.units.lock().get_mut(&unit_id) {
            info.locator = locator.to_string();
        }
    }
}

#[async_trait]
impl HostSurface for FakeHost {
    async fn unit(&self, unit_id: UnitId) -> Result<Option<UnitInfo>> {
        Ok(self.units.lock().get(&unit_id).cloned())
    }

    async fn live_units(&self) -> Result<Vec<UnitId>> {
        let mut ids: Vec<UnitId> = self
            .units
            .lock()
            .values()
            .filter(|info| info.is_live)
            .map(|info| info.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// FakeCapture
// ============================================================================

pub(crate) struct FakeCapture {
    image: Mutex<Raster>,
    calls: AtomicUsize,
    refuse: AtomicBool,
    fail_hard: AtomicBool,
}

impl FakeCapture {
    pub(crate) fn new(image: Raster) -> Arc<Self> {
        Arc::new(Self {
            image: Mutex::new(image),
            calls: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            fail_hard: AtomicBool::new(false),
        })
    }

    /// Image returned by later captures.
    pub(crate) fn set_image(&self, image: Raster) {
        *self.image.lock() = image;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail with `NotCapturable`.
    pub(crate) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Fail with an I/O error.
    pub(crate) fn fail_hard(&self, fail: bool) {
        self.fail_hard.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CapturePrimitive for FakeCapture {
    async fn capture_visible(&self, unit_id: UnitId) -> Result<Raster> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_hard.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::other("capture backend crashed")));
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::not_capturable(unit_id, "tab is mid-transition"));
        }
        Ok(self.image.lock().clone())
    }
}

// ============================================================================
// RecordingSink
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SinkCall {
    Deliver(UnitId, Severity, usize),
    Indicate(UnitId, Status),
    Clear(UnitId),
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn deliver(&self, unit_id: UnitId, result: &ComparisonResult) -> Result<()> {
        self.calls.lock().push(SinkCall::Deliver(
            unit_id,
            result.severity,
            result.changed_cells.len(),
        ));
        Ok(())
    }

    async fn indicate(&self, unit_id: UnitId, status: Status) -> Result<()> {
        self.calls.lock().push(SinkCall::Indicate(unit_id, status));
        Ok(())
    }

    async fn clear(&self, unit_id: UnitId) -> Result<()> {
        self.calls.lock().push(SinkCall::Clear(unit_id));
        Ok(())
    }
}

// ============================================================================
// FlakyStore
// ============================================================================

/// Memory backend that can fail on demand.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    failing_sets: AtomicUsize,
    unavailable: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The next `count` writes fail with `QuotaExceeded`.
    pub(crate) fn fail_next_sets(&self, count: usize) {
        self.failing_sets.store(count, Ordering::SeqCst);
    }

    /// Every operation fails with `StorageUnavailable`.
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::storage_unavailable("backend offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for FlakyStore {
    async fn get(&self, keys: &[String]) -> Result<StorageMap> {
        self.check()?;
        self.inner.get(keys).await
    }

    async fn get_all(&self) -> Result<StorageMap> {
        self.check()?;
        self.inner.get_all().await
    }

    async fn set(&self, items: StorageMap) -> Result<()> {
        self.check()?;
        let failing = self
            .failing_sets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::quota_exceeded(usize::MAX, self.inner.quota_bytes()));
        }
        self.inner.set(items).await
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        self.check()?;
        self.inner.remove(keys).await
    }

    async fn bytes_in_use(&self) -> Result<usize> {
        self.check()?;
        self.inner.bytes_in_use().await
    }
}
