//! Per-unit periodic capture.
//!
//! Each running job owns a tokio task driven by an [`Interval`]. The first
//! tick fires immediately, later ones every cadence. A tick that finds the
//! unit gone, hidden, blank or restricted, or that the capture primitive
//! refuses, is skipped quietly and the job keeps running. Jobs end only
//! through [`CaptureScheduler::stop`] and friends.
//!
//! [`Interval`]: tokio::time::Interval

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::host::{Capturability, CapturePrimitive, HostSurface};
use crate::identifiers::UnitId;
use crate::storage::SnapshotStore;

// ============================================================================
// Constants
// ============================================================================

/// Default Capture Cadence.
pub const DEFAULT_CADENCE: Duration = Duration::from_secs(5);

/// Shortest cadence a job runs at.
pub const MIN_CADENCE: Duration = Duration::from_millis(1);

// ============================================================================
// Types
// ============================================================================

/// Why a capture attempt stored nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// Host no longer knows the unit.
    Gone,
    /// Unit is not the visible one.
    Hidden,
    /// Internal browser page.
    Restricted,
    /// Empty or `about:blank` page.
    Blank,
    /// Capture primitive refused (permission, transition).
    Refused,
    /// Job was stopped while the capture was in flight.
    Cancelled,
}

impl SkipReason {
    fn from_capturability(capturability: Capturability) -> Option<Self> {
        match capturability {
            Capturability::Capturable => None,
            Capturability::Destroyed => Some(Self::Gone),
            Capturability::Hidden => Some(Self::Hidden),
            Capturability::Restricted => Some(Self::Restricted),
            Capturability::Blank => Some(Self::Blank),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Gone => "unit gone",
            Self::Hidden => "unit hidden",
            Self::Restricted => "restricted page",
            Self::Blank => "blank page",
            Self::Refused => "capture refused",
            Self::Cancelled => "job cancelled",
        };
        f.write_str(text)
    }
}

/// Result of one capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum CaptureOutcome {
    /// A snapshot was stored with this sequence.
    Stored {
        /// Insertion sequence of the new snapshot.
        sequence: u64,
    },
    /// Nothing was stored.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
}

impl CaptureOutcome {
    /// Returns `true` if a snapshot was stored.
    #[inline]
    #[must_use]
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// Scheduler view of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// No job.
    Idle,
    /// Job running at the given cadence.
    Running {
        /// Interval between captures.
        cadence: Duration,
    },
}

/// A running capture job.
struct CaptureJob {
    cadence: Duration,
    cancelled: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CaptureJob {
    fn is_live(&self) -> bool {
        !self.handle.is_finished() && !self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ============================================================================
// CaptureScheduler
// ============================================================================

/// Starts and stops periodic capture jobs, at most one per unit.
///
/// Cheap to clone; clones share the same job table.
#[derive(Clone)]
pub struct CaptureScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    host: Arc<dyn HostSurface>,
    capture: Arc<dyn CapturePrimitive>,
    store: Arc<SnapshotStore>,
    restricted_schemes: Vec<String>,
    cadence: Duration,
    jobs: Mutex<FxHashMap<UnitId, CaptureJob>>,
}

impl fmt::Debug for CaptureScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureScheduler")
            .field("cadence", &self.inner.cadence)
            .field("jobs", &self.inner.jobs.lock().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CaptureScheduler - Constructor
// ============================================================================

impl CaptureScheduler {
    /// Creates a scheduler with no running jobs.
    #[must_use]
    pub fn new(
        host: Arc<dyn HostSurface>,
        capture: Arc<dyn CapturePrimitive>,
        store: Arc<SnapshotStore>,
        restricted_schemes: Vec<String>,
        cadence: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                host,
                capture,
                store,
                restricted_schemes,
                cadence,
                jobs: Mutex::new(FxHashMap::default()),
            }),
        }
    }
}

// ============================================================================
// CaptureScheduler - Public API
// ============================================================================

impl CaptureScheduler {
    /// Returns the default cadence.
    #[inline]
    #[must_use]
    pub fn cadence(&self) -> Duration {
        self.inner.cadence
    }

    /// Starts a job at the default cadence.
    ///
    /// Restarts the unit's job if one is already running.
    pub fn start(&self, unit_id: UnitId) {
        self.start_with_cadence(unit_id, self.inner.cadence);
    }

    /// Starts a job at `cadence`, replacing any running job for the unit.
    ///
    /// The first capture happens right away, not one cadence later.
    /// A cadence below [`MIN_CADENCE`] is raised to it.
    pub fn start_with_cadence(&self, unit_id: UnitId, cadence: Duration) {
        if cadence < MIN_CADENCE {
            warn!(unit_id = %unit_id, cadence = ?cadence, "Cadence too short, using minimum");
        }
        let cadence = cadence.max(MIN_CADENCE);

        let mut jobs = self.inner.jobs.lock();

        if let Some(old) = jobs.remove(&unit_id) {
            old.cancel();
            trace!(unit_id = %unit_id, "Replacing running capture job");
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::run_job(
            Arc::clone(&self.inner),
            unit_id,
            cadence,
            Arc::clone(&cancelled),
            stop_rx,
        ));

        jobs.insert(
            unit_id,
            CaptureJob {
                cadence,
                cancelled,
                stop_tx: Some(stop_tx),
                handle,
            },
        );

        info!(unit_id = %unit_id, cadence_ms = cadence.as_millis() as u64, "Capture job started");
    }

    /// Stops the unit's job. No-op if none is running.
    ///
    /// No tick begins after this returns. A capture already in flight is
    /// discarded before it reaches the store.
    pub fn stop(&self, unit_id: UnitId) {
        let job = self.inner.jobs.lock().remove(&unit_id);
        if let Some(job) = job {
            job.cancel();
            info!(unit_id = %unit_id, "Capture job stopped");
        }
    }

    /// Stops every job except `keep`'s. Returns the stopped units.
    pub fn stop_all_except(&self, keep: UnitId) -> Vec<UnitId> {
        let stopped: Vec<(UnitId, CaptureJob)> = {
            let mut jobs = self.inner.jobs.lock();
            let ids: Vec<UnitId> = jobs.keys().copied().filter(|id| *id != keep).collect();
            ids.into_iter()
                .filter_map(|id| jobs.remove(&id).map(|job| (id, job)))
                .collect()
        };

        let mut ids = Vec::with_capacity(stopped.len());
        for (id, job) in stopped {
            job.cancel();
            ids.push(id);
        }

        if !ids.is_empty() {
            debug!(keep = %keep, stopped = ids.len(), "Stopped background capture jobs");
        }
        ids.sort();
        ids
    }

    /// Returns `true` if a job is running for the unit.
    #[must_use]
    pub fn is_running(&self, unit_id: UnitId) -> bool {
        self.inner
            .jobs
            .lock()
            .get(&unit_id)
            .is_some_and(CaptureJob::is_live)
    }

    /// Returns the job state of a unit.
    #[must_use]
    pub fn state(&self, unit_id: UnitId) -> JobState {
        match self.inner.jobs.lock().get(&unit_id) {
            Some(job) if job.is_live() => JobState::Running {
                cadence: job.cadence,
            },
            _ => JobState::Idle,
        }
    }

    /// Units with a running job, sorted.
    #[must_use]
    pub fn running_units(&self) -> Vec<UnitId> {
        let mut ids: Vec<UnitId> = self
            .inner
            .jobs
            .lock()
            .iter()
            .filter(|(_, job)| job.is_live())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Captures the unit once, outside any job.
    ///
    /// # Errors
    ///
    /// Host, capture, and storage failures other than the benign skips
    /// reported as [`CaptureOutcome::Skipped`].
    pub async fn capture_now(&self, unit_id: UnitId) -> Result<CaptureOutcome> {
        self.inner.tick(unit_id, None).await
    }

    /// Stops every job.
    pub fn shutdown(&self) {
        let jobs: Vec<CaptureJob> = self.inner.jobs.lock().drain().map(|(_, job)| job).collect();
        let count = jobs.len();
        for job in jobs {
            job.cancel();
        }
        info!(stopped = count, "CaptureScheduler shut down");
    }
}

// ============================================================================
// CaptureScheduler - Job Loop
// ============================================================================

impl CaptureScheduler {
    async fn run_job(
        inner: Arc<SchedulerInner>,
        unit_id: UnitId,
        cadence: Duration,
        cancelled: Arc<AtomicBool>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = time::interval(cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }

            if cancelled.load(Ordering::Acquire) {
                break;
            }

            // Skips never end the job; only `stop` does.
            match inner.tick(unit_id, Some(cancelled.as_ref())).await {
                Ok(CaptureOutcome::Skipped { reason }) => {
                    trace!(unit_id = %unit_id, reason = %reason, "Capture tick skipped");
                }
                Ok(CaptureOutcome::Stored { sequence }) => {
                    trace!(unit_id = %unit_id, sequence, "Capture tick stored");
                }
                Err(e) => {
                    warn!(unit_id = %unit_id, error = %e, "Capture tick failed");
                }
            }
        }

        trace!(unit_id = %unit_id, "Capture job loop exited");
    }
}

// ============================================================================
// SchedulerInner
// ============================================================================

impl SchedulerInner {
    /// One capture: opportunistic eviction, then capture and store.
    async fn tick(
        &self,
        unit_id: UnitId,
        cancelled: Option<&AtomicBool>,
    ) -> Result<CaptureOutcome> {
        match self.host.live_units().await {
            Ok(live) => {
                let live: FxHashSet<UnitId> = live.into_iter().collect();
                if let Err(e) = self.store.evict_excess_for(&live, unit_id).await {
                    warn!(unit_id = %unit_id, error = %e, "Opportunistic eviction failed");
                }
            }
            Err(e) => {
                warn!(unit_id = %unit_id, error = %e, "Cannot list live units");
            }
        }

        self.capture_once(unit_id, cancelled).await
    }

    async fn capture_once(
        &self,
        unit_id: UnitId,
        cancelled: Option<&AtomicBool>,
    ) -> Result<CaptureOutcome> {
        let Some(info) = self.host.unit(unit_id).await? else {
            return Ok(skipped(SkipReason::Gone));
        };

        if let Some(reason) =
            SkipReason::from_capturability(info.capturability(&self.restricted_schemes))
        {
            return Ok(skipped(reason));
        }

        let image = match self.capture.capture_visible(unit_id).await {
            Ok(image) => image,
            Err(e) if e.is_benign_capture_failure() => {
                trace!(unit_id = %unit_id, error = %e, "Capture refused");
                return Ok(skipped(SkipReason::Refused));
            }
            Err(e) => return Err(e),
        };

        if cancelled.is_some_and(|c| c.load(Ordering::Acquire)) {
            return Ok(skipped(SkipReason::Cancelled));
        }

        let sequence = self.store.put(unit_id, image, &info.locator).await?;
        debug!(unit_id = %unit_id, sequence, page = %info.label(), "Captured snapshot");
        Ok(CaptureOutcome::Stored { sequence })
    }
}

#[inline]
fn skipped(reason: SkipReason) -> CaptureOutcome {
    CaptureOutcome::Skipped { reason }
}

// ============================================================================
// Tests
// ============================================================================
