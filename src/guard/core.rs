//! Guard coordinator.
//!
//! Wires host lifecycle events to the capture scheduler and the comparison
//! orchestrator, and forwards results to the sink.
//!
//! # Event Handling
//!
//! | Event | Action |
//! |-------|--------|
//! | `FocusChanged` | stop every other unit's job; compare after settle if a snapshot exists, else start capturing |
//! | `UnitLoaded` | restart the job if the unit is focused and no check is pending |
//! | `UnitDestroyed` | stop the job, cancel any pending check, drop the snapshot |
//!
//! On focus regain the unit's job starts only after the comparison, so the
//! job's immediate first capture cannot replace the prior snapshot before
//! it is compared.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::capture::{CaptureOutcome, CaptureScheduler};
use crate::detection::{ComparisonOrchestrator, ComparisonResult, Evaluation, Status};
use crate::error::Result;
use crate::host::{CapturePrimitive, HostEvent, HostSurface, ResultSink};
use crate::identifiers::UnitId;
use crate::imaging::ImageComparator;
use crate::storage::{PersistentStore, SnapshotStore, SnapshotSummary};

use super::builder::GuardBuilder;
use super::options::GuardOptions;

// ============================================================================
// Types
// ============================================================================

/// Outcome of [`Guard::force_check`].
#[derive(Debug, Clone, PartialEq)]
pub enum ForceCheckOutcome {
    /// No snapshot existed; one capture was attempted instead.
    Bootstrapped(CaptureOutcome),
    /// Stored snapshot was compared with a fresh capture.
    Checked(ComparisonResult),
}

/// A focus-regain comparison waiting for its settle delay or running.
struct PendingCheck {
    token: u64,
    handle: JoinHandle<()>,
}

// ============================================================================
// Guard
// ============================================================================

/// Tabnabbing guard.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Guard {
    inner: Arc<GuardInner>,
}

struct GuardInner {
    sink: Arc<dyn ResultSink>,
    store: Arc<SnapshotStore>,
    scheduler: CaptureScheduler,
    orchestrator: ComparisonOrchestrator,
    options: GuardOptions,
    /// Lock order: `pending` before `focused` when both are needed.
    focused: Mutex<Option<UnitId>>,
    pending: Mutex<FxHashMap<UnitId, PendingCheck>>,
    next_token: AtomicU64,
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending_checks = self.inner.pending.lock().len();
        let focused = *self.inner.focused.lock();
        f.debug_struct("Guard")
            .field("focused", &focused)
            .field("pending_checks", &pending_checks)
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Guard - Constructor
// ============================================================================

impl Guard {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> GuardBuilder {
        GuardBuilder::new()
    }

    pub(crate) async fn new(
        host: Arc<dyn HostSurface>,
        capture: Arc<dyn CapturePrimitive>,
        storage: Arc<dyn PersistentStore>,
        sink: Arc<dyn ResultSink>,
        comparator: ImageComparator,
        options: GuardOptions,
    ) -> Result<Self> {
        let store = Arc::new(
            SnapshotStore::open(
                storage,
                Arc::clone(&host),
                options.capacity,
                options.snapshot_format,
            )
            .await?,
        );

        let scheduler = CaptureScheduler::new(
            Arc::clone(&host),
            Arc::clone(&capture),
            Arc::clone(&store),
            options.restricted_schemes.clone(),
            options.cadence(),
        );

        let orchestrator = ComparisonOrchestrator::new(host, capture, Arc::clone(&store))
            .with_comparator(comparator)
            .with_grid(options.grid_size, options.cell_threshold);

        info!(
            cadence_ms = options.cadence_ms,
            capacity = options.capacity,
            grid_size = options.grid_size,
            "Guard started"
        );

        Ok(Self {
            inner: Arc::new(GuardInner {
                sink,
                store,
                scheduler,
                orchestrator,
                options,
                focused: Mutex::new(None),
                pending: Mutex::new(FxHashMap::default()),
                next_token: AtomicU64::new(1),
            }),
        })
    }
}

// ============================================================================
// Guard - Accessors
// ============================================================================

impl Guard {
    /// Returns the capture scheduler.
    #[inline]
    #[must_use]
    pub fn scheduler(&self) -> &CaptureScheduler {
        &self.inner.scheduler
    }

    /// Returns the snapshot store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.inner.store
    }

    /// Returns the options in effect.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &GuardOptions {
        &self.inner.options
    }

    /// Returns the unit that last gained focus.
    #[inline]
    #[must_use]
    pub fn focused(&self) -> Option<UnitId> {
        *self.inner.focused.lock()
    }

    /// Returns `true` if a focus-regain comparison is pending for the unit.
    #[must_use]
    pub fn is_check_pending(&self, unit_id: UnitId) -> bool {
        self.inner.pending.lock().contains_key(&unit_id)
    }

    /// Returns `true` if a snapshot is stored for the unit.
    pub async fn has_snapshot(&self, unit_id: UnitId) -> Result<bool> {
        self.inner.store.contains(unit_id).await
    }

    /// Lists stored snapshots, oldest first.
    pub async fn snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        self.inner.store.list().await
    }
}

// ============================================================================
// Guard - Events
// ============================================================================

impl Guard {
    /// Applies one host event.
    ///
    /// # Errors
    ///
    /// Storage failures while checking for or removing a snapshot.
    pub async fn handle_event(&self, event: HostEvent) -> Result<()> {
        debug!(event = ?event, "Host event");
        match event {
            HostEvent::FocusChanged { previous, current } => {
                self.on_focus_changed(previous, current).await
            }
            HostEvent::UnitLoaded { unit_id } => {
                self.on_unit_loaded(unit_id);
                Ok(())
            }
            HostEvent::UnitDestroyed { unit_id } => self.on_unit_destroyed(unit_id).await,
        }
    }

    /// Consumes events from a channel until it closes.
    pub fn spawn_event_loop(&self, mut events: mpsc::UnboundedReceiver<HostEvent>) -> JoinHandle<()> {
        let guard = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = guard.handle_event(event).await {
                    warn!(unit_id = %event.unit_id(), error = %e, "Host event handling failed");
                }
            }
            debug!("Host event channel closed");
        })
    }

    async fn on_focus_changed(&self, previous: Option<UnitId>, current: UnitId) -> Result<()> {
        *self.inner.focused.lock() = Some(current);

        self.inner.scheduler.stop_all_except(current);
        self.inner.cancel_pending_except(current);

        if let Some(previous) = previous {
            debug!(previous = %previous, current = %current, "Focus moved");
        }

        let has_prior = match self.inner.store.contains(current).await {
            Ok(found) => found,
            Err(e) => {
                warn!(unit_id = %current, error = %e, "Cannot read snapshot store, capturing without check");
                self.inner.scheduler.start(current);
                return Err(e);
            }
        };

        if has_prior {
            self.schedule_regain_check(current);
        } else {
            self.inner.scheduler.start(current);
        }
        Ok(())
    }

    fn on_unit_loaded(&self, unit_id: UnitId) {
        if self.focused() != Some(unit_id) {
            return;
        }
        if self.is_check_pending(unit_id) {
            debug!(unit_id = %unit_id, "Unit loaded during pending check, job starts after it");
            return;
        }
        self.inner.scheduler.start(unit_id);
    }

    async fn on_unit_destroyed(&self, unit_id: UnitId) -> Result<()> {
        self.inner.scheduler.stop(unit_id);
        if let Some(check) = self.inner.pending.lock().remove(&unit_id) {
            check.handle.abort();
        }
        {
            let mut focused = self.inner.focused.lock();
            if *focused == Some(unit_id) {
                *focused = None;
            }
        }

        self.inner.store.remove(unit_id).await?;
        info!(unit_id = %unit_id, "Unit destroyed, snapshot dropped");
        Ok(())
    }

    fn schedule_regain_check(&self, unit_id: UnitId) {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);

        let mut pending = self.inner.pending.lock();
        if let Some(old) = pending.remove(&unit_id) {
            old.handle.abort();
        }
        let handle = tokio::spawn(GuardInner::run_regain_check(inner, unit_id, token));
        pending.insert(unit_id, PendingCheck { token, handle });

        debug!(unit_id = %unit_id, settle_ms = self.inner.options.settle_delay_ms, "Regain check scheduled");
    }
}

// ============================================================================
// Guard - Explicit Checks
// ============================================================================

impl Guard {
    /// Compares the unit now, or bootstraps it if nothing is stored.
    ///
    /// Unlike the focus-regain path, every failure is returned, including
    /// an unreachable sink.
    ///
    /// # Errors
    ///
    /// Capture, storage, comparison, and delivery failures.
    pub async fn force_check(&self, unit_id: UnitId) -> Result<ForceCheckOutcome> {
        if !self.inner.store.contains(unit_id).await? {
            return self.bootstrap(unit_id).await;
        }

        match self.inner.orchestrator.evaluate(unit_id).await? {
            Evaluation::NoPriorSnapshot => self.bootstrap(unit_id).await,
            Evaluation::Compared(result) => {
                self.inner.publish(unit_id, &result).await?;
                Ok(ForceCheckOutcome::Checked(result))
            }
        }
    }

    async fn bootstrap(&self, unit_id: UnitId) -> Result<ForceCheckOutcome> {
        let outcome = self.inner.scheduler.capture_now(unit_id).await?;
        info!(unit_id = %unit_id, outcome = ?outcome, "No prior snapshot, bootstrap capture");
        Ok(ForceCheckOutcome::Bootstrapped(outcome))
    }

    /// Stops every job and pending check.
    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
        let pending: Vec<PendingCheck> = self.inner.pending.lock().drain().map(|(_, c)| c).collect();
        for check in pending {
            check.handle.abort();
        }
        info!("Guard shut down");
    }
}

// ============================================================================
// GuardInner
// ============================================================================

impl GuardInner {
    /// Settle, compare, publish, then start capturing if still focused.
    async fn run_regain_check(inner: Arc<Self>, unit_id: UnitId, token: u64) {
        time::sleep(inner.options.settle_delay()).await;

        match inner.orchestrator.evaluate(unit_id).await {
            Ok(Evaluation::Compared(result)) => {
                if let Err(e) = inner.publish(unit_id, &result).await {
                    warn!(unit_id = %unit_id, error = %e, "Result not delivered");
                }
            }
            Ok(Evaluation::NoPriorSnapshot) => {
                debug!(unit_id = %unit_id, "Snapshot gone before regain check");
            }
            Err(e) => {
                warn!(unit_id = %unit_id, error = %e, "Regain check unavailable, treating as safe");
                if let Err(e) = inner.sink.indicate(unit_id, Status::Safe).await {
                    warn!(unit_id = %unit_id, error = %e, "Indicator not updated");
                }
            }
        }

        let mut pending = inner.pending.lock();
        if pending.get(&unit_id).is_some_and(|c| c.token == token) {
            pending.remove(&unit_id);
            if *inner.focused.lock() == Some(unit_id) {
                inner.scheduler.start(unit_id);
            }
        }
    }

    /// Sends a result to the sink.
    async fn publish(&self, unit_id: UnitId, result: &ComparisonResult) -> Result<()> {
        if result.severity.is_safe() {
            self.sink.clear(unit_id).await?;
        } else {
            self.sink.deliver(unit_id, result).await?;
        }
        self.sink.indicate(unit_id, result.status()).await
    }

    fn cancel_pending_except(&self, keep: UnitId) {
        let mut pending = self.pending.lock();
        pending.retain(|unit_id, check| {
            let keep_it = *unit_id == keep;
            if !keep_it {
                check.handle.abort();
            }
            keep_it
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::capture::SkipReason;
    use crate::detection::Severity;
    use crate::host::DetachedSink;
    use crate::imaging::Raster;
    use crate::testing::{FakeCapture, FakeHost, RecordingSink, SinkCall, unit};

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn white() -> Raster {
        Raster::solid(45, 45, WHITE)
    }

    fn black() -> Raster {
        Raster::solid(45, 45, BLACK)
    }

    async fn guard(
        host: Arc<FakeHost>,
        capture: Arc<FakeCapture>,
        sink: Arc<dyn ResultSink>,
    ) -> Guard {
        Guard::builder()
            .host(host)
            .capture(capture)
            .sink(sink)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_debug_never_holds_focus_while_waiting_on_checks() {
        let host = FakeHost::with_live(&[1]);
        let guard = guard(host, FakeCapture::new(white()), RecordingSink::new()).await;
        *guard.inner.focused.lock() = Some(unit(1));

        let pending = guard.inner.pending.lock();
        let formatter = {
            let guard = guard.clone();
            std::thread::spawn(move || format!("{guard:?}"))
        };
        std::thread::sleep(Duration::from_millis(50));

        // A finishing regain check takes `pending` then `focused`.
        assert!(guard.inner.focused.try_lock().is_some());
        drop(pending);

        let text = formatter.join().unwrap();
        assert!(text.contains("pending_checks: 0"));
        assert!(text.contains("focused: Some("));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_focus_starts_capture() {
        let host = FakeHost::with_live(&[1]);
        let capture = FakeCapture::new(white());
        let guard = guard(host, capture.clone(), RecordingSink::new()).await;

        guard
            .handle_event(HostEvent::FocusChanged { previous: None, current: unit(1) })
            .await
            .unwrap();
        time::sleep(Duration::from_millis(100)).await;

        assert!(guard.scheduler().is_running(unit(1)));
        assert!(guard.has_snapshot(unit(1)).await.unwrap());
        assert_eq!(capture.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regain_compares_before_capturing() {
        let host = FakeHost::with_live(&[1, 2]);
        let capture = FakeCapture::new(black());
        let sink = RecordingSink::new();
        let guard = guard(host, capture.clone(), sink.clone()).await;

        guard.store().put(unit(1), white(), "https://a.example").await.unwrap();
        guard
            .handle_event(HostEvent::FocusChanged { previous: Some(unit(2)), current: unit(1) })
            .await
            .unwrap();

        assert!(guard.is_check_pending(unit(1)));
        assert!(!guard.scheduler().is_running(unit(1)));

        time::sleep(Duration::from_millis(1_500)).await;

        assert!(!guard.is_check_pending(unit(1)));
        assert!(guard.scheduler().is_running(unit(1)));
        let calls = sink.calls();
        assert!(calls.contains(&SinkCall::Deliver(unit(1), Severity::High, 225)));
        assert!(calls.contains(&SinkCall::Indicate(unit(1), Status::Danger)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_regain_clears_highlights() {
        let host = FakeHost::with_live(&[1]);
        let capture = FakeCapture::new(white());
        let sink = RecordingSink::new();
        let guard = guard(host, capture, sink.clone()).await;

        guard.store().put(unit(1), white(), "https://a.example").await.unwrap();
        guard
            .handle_event(HostEvent::FocusChanged { previous: None, current: unit(1) })
            .await
            .unwrap();
        time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(
            sink.calls(),
            vec![SinkCall::Clear(unit(1)), SinkCall::Indicate(unit(1), Status::Safe)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_change_stops_other_jobs() {
        let host = FakeHost::with_live(&[1, 2]);
        let capture = FakeCapture::new(white());
        let guard = guard(host, capture, RecordingSink::new()).await;

        guard
            .handle_event(HostEvent::FocusChanged { previous: None, current: unit(1) })
            .await
            .unwrap();
        guard
            .handle_event(HostEvent::FocusChanged { previous: Some(unit(1)), current: unit(2) })
            .await
            .unwrap();
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(guard.scheduler().running_units(), vec![unit(2)]);
        assert_eq!(guard.focused(), Some(unit(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_during_settle_cancels_check() {
        let host = FakeHost::with_live(&[1, 2]);
        let capture = FakeCapture::new(black());
        let sink = RecordingSink::new();
        let guard = guard(host, capture, sink.clone()).await;

        guard.store().put(unit(1), white(), "https://a.example").await.unwrap();
        guard
            .handle_event(HostEvent::FocusChanged { previous: None, current: unit(1) })
            .await
            .unwrap();
        guard
            .handle_event(HostEvent::FocusChanged { previous: Some(unit(1)), current: unit(2) })
            .await
            .unwrap();
        time::sleep(Duration::from_secs(2)).await;

        assert!(!guard.is_check_pending(unit(1)));
        assert!(!guard.scheduler().is_running(unit(1)));
        assert!(sink.calls().iter().all(|c| !matches!(c, SinkCall::Deliver(..))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_loaded_restarts_only_focused() {
        let host = FakeHost::with_live(&[1, 2]);
        let capture = FakeCapture::new(white());
        let guard = guard(host, capture, RecordingSink::new()).await;

        guard
            .handle_event(HostEvent::FocusChanged { previous: None, current: unit(1) })
            .await
            .unwrap();
        guard.handle_event(HostEvent::UnitLoaded { unit_id: unit(2) }).await.unwrap();
        guard.handle_event(HostEvent::UnitLoaded { unit_id: unit(1) }).await.unwrap();

        assert_eq!(guard.scheduler().running_units(), vec![unit(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cleans_up() {
        let host = FakeHost::with_live(&[1]);
        let capture = FakeCapture::new(white());
        let guard = guard(host.clone(), capture, RecordingSink::new()).await;

        guard
            .handle_event(HostEvent::FocusChanged { previous: None, current: unit(1) })
            .await
            .unwrap();
        time::sleep(Duration::from_millis(100)).await;
        assert!(guard.has_snapshot(unit(1)).await.unwrap());

        host.close(unit(1));
        guard.handle_event(HostEvent::UnitDestroyed { unit_id: unit(1) }).await.unwrap();

        assert!(!guard.scheduler().is_running(unit(1)));
        assert!(!guard.has_snapshot(unit(1)).await.unwrap());
        assert_eq!(guard.focused(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regain_fails_open_when_capture_refused() {
        let host = FakeHost::with_live(&[1]);
        let capture = FakeCapture::new(white());
        let sink = RecordingSink::new();
        let guard = guard(host, capture.clone(), sink.clone()).await;

        guard.store().put(unit(1), white(), "https://a.example").await.unwrap();
        capture.refuse(true);
        guard
            .handle_event(HostEvent::FocusChanged { previous: None, current: unit(1) })
            .await
            .unwrap();
        time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(sink.calls(), vec![SinkCall::Indicate(unit(1), Status::Safe)]);
        assert!(guard.scheduler().is_running(unit(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_regain_survives_detached_sink() {
        let host = FakeHost::with_live(&[1]);
        let capture = FakeCapture::new(black());
        let guard = guard(host, capture, Arc::new(DetachedSink)).await;

        guard.store().put(unit(1), white(), "https://a.example").await.unwrap();
        guard
            .handle_event(HostEvent::FocusChanged { previous: None, current: unit(1) })
            .await
            .unwrap();
        time::sleep(Duration::from_millis(1_500)).await;

        assert!(guard.scheduler().is_running(unit(1)));
    }

    #[tokio::test]
    async fn test_force_check_bootstraps_then_checks() {
        let host = FakeHost::with_live(&[1]);
        let capture = FakeCapture::new(white());
        let sink = RecordingSink::new();
        let guard = guard(host, capture.clone(), sink.clone()).await;

        let first = guard.force_check(unit(1)).await.unwrap();
        assert!(matches!(
            first,
            ForceCheckOutcome::Bootstrapped(CaptureOutcome::Stored { .. })
        ));

        capture.set_image(black());
        let ForceCheckOutcome::Checked(result) = guard.force_check(unit(1)).await.unwrap() else {
            panic!("expected a comparison");
        };
        assert_eq!(result.severity, Severity::High);
        assert!(sink.calls().contains(&SinkCall::Indicate(unit(1), Status::Danger)));
    }

    #[tokio::test]
    async fn test_force_check_bootstrap_on_restricted_page() {
        let host = FakeHost::with_live(&[1]);
        host.set_locator(unit(1), "chrome://settings");
        let capture = FakeCapture::new(white());
        let guard = guard(host, capture, RecordingSink::new()).await;

        assert_eq!(
            guard.force_check(unit(1)).await.unwrap(),
            ForceCheckOutcome::Bootstrapped(CaptureOutcome::Skipped {
                reason: SkipReason::Restricted
            })
        );
    }

    #[tokio::test]
    async fn test_force_check_surfaces_unreachable_sink() {
        let host = FakeHost::with_live(&[1]);
        let capture = FakeCapture::new(white());
        let guard = guard(host, capture, Arc::new(DetachedSink)).await;

        guard.store().put(unit(1), white(), "https://a.example").await.unwrap();
        let err = guard.force_check(unit(1)).await.unwrap_err();
        assert!(matches!(err, crate::Error::Unreachable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_loop_consumes_channel() {
        let host = FakeHost::with_live(&[1]);
        let capture = FakeCapture::new(white());
        let guard = guard(host, capture, RecordingSink::new()).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = guard.spawn_event_loop(rx);
        tx.send(HostEvent::FocusChanged { previous: None, current: unit(1) }).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(guard.scheduler().is_running(unit(1)));
        guard.shutdown();
        assert!(guard.scheduler().running_units().is_empty());
    }
}
