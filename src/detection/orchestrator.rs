//! One-shot comparison of a unit's stored snapshot with a fresh capture.
//!
//! # Flow
//!
//! 1. Read the prior snapshot. None stored: [`Evaluation::NoPriorSnapshot`].
//! 2. Capture the unit once, outside the scheduler.
//! 3. Score the whole image and classify.
//! 4. Safe: done, no grid pass.
//! 5. Otherwise localize with the grid differ.
//!
//! The orchestrator never writes to the store. The prior reference keeps
//! being refreshed by the capture scheduler alone.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::task;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::host::{CapturePrimitive, HostSurface, Viewport};
use crate::identifiers::UnitId;
use crate::imaging::{DEFAULT_CELL_THRESHOLD, DEFAULT_GRID_SIZE, GridDiffer, ImageComparator};
use crate::storage::SnapshotStore;

use super::severity::{ComparisonResult, Severity};

// ============================================================================
// Evaluation
// ============================================================================

/// Outcome of [`ComparisonOrchestrator::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// First visit: nothing to compare against.
    NoPriorSnapshot,
    /// Prior and fresh captures were compared.
    Compared(ComparisonResult),
}

impl Evaluation {
    /// Returns the comparison result, if one was produced.
    #[inline]
    #[must_use]
    pub fn result(&self) -> Option<&ComparisonResult> {
        match self {
            Self::NoPriorSnapshot => None,
            Self::Compared(result) => Some(result),
        }
    }
}

// ============================================================================
// ComparisonOrchestrator
// ============================================================================

/// Runs the two-pass comparison for a unit.
#[derive(Clone)]
pub struct ComparisonOrchestrator {
    host: Arc<dyn HostSurface>,
    capture: Arc<dyn CapturePrimitive>,
    store: Arc<SnapshotStore>,
    comparator: ImageComparator,
    grid_size: u32,
    cell_threshold: f64,
}

impl fmt::Debug for ComparisonOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparisonOrchestrator")
            .field("comparator", &self.comparator)
            .field("grid_size", &self.grid_size)
            .field("cell_threshold", &self.cell_threshold)
            .finish_non_exhaustive()
    }
}

impl ComparisonOrchestrator {
    /// Creates an orchestrator with the default grid (15 x 15, 5 %).
    #[must_use]
    pub fn new(
        host: Arc<dyn HostSurface>,
        capture: Arc<dyn CapturePrimitive>,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            host,
            capture,
            store,
            comparator: ImageComparator::new(),
            grid_size: DEFAULT_GRID_SIZE,
            cell_threshold: DEFAULT_CELL_THRESHOLD,
        }
    }

    /// Sets the grid size and per-cell threshold.
    #[must_use]
    pub fn with_grid(mut self, grid_size: u32, cell_threshold: f64) -> Self {
        self.grid_size = grid_size;
        self.cell_threshold = cell_threshold;
        self
    }

    /// Sets the comparator used for both passes.
    #[must_use]
    pub fn with_comparator(mut self, comparator: ImageComparator) -> Self {
        self.comparator = comparator;
        self
    }

    /// Returns the grid size.
    #[inline]
    #[must_use]
    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Compares the unit's stored snapshot against a fresh capture.
    ///
    /// # Errors
    ///
    /// - [`Error::UnitNotFound`] if the host no longer knows the unit
    /// - capture failures, unchanged ([`Error::NotCapturable`], [`Error::PermissionDenied`] ...)
    /// - [`Error::ComparisonUnavailable`] if the stored image cannot be decoded or a
    ///   comparison worker fails
    /// - [`Error::StorageUnavailable`] if the store cannot be read
    pub async fn evaluate(&self, unit_id: UnitId) -> Result<Evaluation> {
        let prior = match self.store.get(unit_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(unit_id = %unit_id, "No prior snapshot");
                return Ok(Evaluation::NoPriorSnapshot);
            }
            Err(e @ (Error::InvalidImage { .. } | Error::Image(_))) => {
                return Err(Error::comparison_unavailable(format!(
                    "stored snapshot unusable: {e}"
                )));
            }
            Err(e) => return Err(e),
        };

        let info = self
            .host
            .unit(unit_id)
            .await?
            .ok_or_else(|| Error::unit_not_found(unit_id))?;

        let fresh = self.capture.capture_visible(unit_id).await?;
        let viewport = info.viewport.unwrap_or_else(|| Viewport::of(&fresh));

        let prior = Arc::new(prior.image);
        let fresh = Arc::new(fresh);

        let comparator = self.comparator;
        let whole = {
            let (a, b) = (Arc::clone(&prior), Arc::clone(&fresh));
            task::spawn_blocking(move || comparator.compare(&a, &b))
                .await
                .map_err(|e| {
                    Error::comparison_unavailable(format!("comparison worker failed: {e}"))
                })?
        };

        let severity = Severity::classify(whole.mismatch_percent);
        let changed_cells = if severity.is_safe() {
            Vec::new()
        } else {
            GridDiffer::new(comparator)
                .diff(prior, fresh, viewport, self.grid_size, self.cell_threshold)
                .await?
        };

        let result = ComparisonResult {
            mismatch_percent: whole.mismatch_percent,
            same_dimensions: whole.same_dimensions,
            severity,
            changed_cells,
            grid_size: self.grid_size,
        };

        if severity.is_safe() {
            debug!(unit_id = %unit_id, mismatch = result.mismatch_percent, "Unit unchanged");
        } else {
            info!(
                unit_id = %unit_id,
                severity = %severity,
                mismatch = result.mismatch_percent,
                changed_cells = result.changed_cells.len(),
                total_cells = result.total_cells(),
                "Visual change detected"
            );
        }

        Ok(Evaluation::Compared(result))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Value;

    use crate::imaging::{Raster, SnapshotFormat};
    use crate::storage::{MemoryStore, PersistentStore, StorageMap};
    use crate::testing::{FakeCapture, FakeHost, unit};

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    async fn setup(
        backend: Arc<dyn PersistentStore>,
        capture: Arc<FakeCapture>,
    ) -> (ComparisonOrchestrator, Arc<SnapshotStore>) {
        let host = FakeHost::with_live(&[1]);
        let store = Arc::new(
            SnapshotStore::open(backend, host.clone(), 10, SnapshotFormat::Png)
                .await
                .unwrap(),
        );
        let orchestrator = ComparisonOrchestrator::new(host, capture, Arc::clone(&store));
        (orchestrator, store)
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let img_a = Raster::solid(60, 60, WHITE);
        let capture = FakeCapture::new(img_a.clone());
        let (orchestrator, store) = setup(Arc::new(MemoryStore::new()), capture.clone()).await;

        assert_eq!(
            orchestrator.evaluate(unit(1)).await.unwrap(),
            Evaluation::NoPriorSnapshot
        );

        store.put(unit(1), img_a, "https://a.example").await.unwrap();

        let Evaluation::Compared(result) = orchestrator.evaluate(unit(1)).await.unwrap() else {
            panic!("expected comparison");
        };
        assert_eq!(result.severity, Severity::Safe);
        assert!(result.changed_cells.is_empty());

        capture.set_image(Raster::solid(60, 60, BLACK));
        let Evaluation::Compared(result) = orchestrator.evaluate(unit(1)).await.unwrap() else {
            panic!("expected comparison");
        };
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.changed_cells.len(), 225);
        assert!(result.same_dimensions);
    }

    #[tokio::test]
    async fn test_evaluate_does_not_touch_store() {
        let capture = FakeCapture::new(Raster::solid(30, 30, WHITE));
        let (orchestrator, store) = setup(Arc::new(MemoryStore::new()), capture.clone()).await;

        let seq = store
            .put(unit(1), Raster::solid(30, 30, WHITE), "https://a.example")
            .await
            .unwrap();
        capture.set_image(Raster::solid(30, 30, BLACK));
        orchestrator.evaluate(unit(1)).await.unwrap();

        let snapshot = store.get(unit(1)).await.unwrap().unwrap();
        assert_eq!(snapshot.sequence, seq);
        assert_eq!(snapshot.image, Raster::solid(30, 30, WHITE));
    }

    #[tokio::test]
    async fn test_partial_change_is_localized() {
        let before = Raster::solid(60, 60, WHITE);
        let mut after = before.clone();
        // Top-left quarter. Cells are 4 px, so column/row 7 is half covered.
        after.fill_rect(0, 0, 30, 30, BLACK);

        let capture = FakeCapture::new(after);
        let (orchestrator, store) = setup(Arc::new(MemoryStore::new()), capture).await;
        store.put(unit(1), before, "https://a.example").await.unwrap();

        let evaluation = orchestrator.evaluate(unit(1)).await.unwrap();
        let result = evaluation.result().unwrap();

        assert_eq!(result.severity, Severity::Medium);
        assert_eq!(result.changed_cells.len(), 64);
        assert!(result.changed_cells.iter().all(|c| c.row < 8 && c.col < 8));

        let first = result.changed_cells[0];
        assert_eq!((first.row, first.col), (0, 0));
        assert_eq!(first.rect.width, 4.0);
    }

    #[tokio::test]
    async fn test_capture_failure_propagates() {
        let capture = FakeCapture::new(Raster::solid(30, 30, WHITE));
        let (orchestrator, store) = setup(Arc::new(MemoryStore::new()), capture.clone()).await;
        store
            .put(unit(1), Raster::solid(30, 30, WHITE), "https://a.example")
            .await
            .unwrap();

        capture.refuse(true);
        let err = orchestrator.evaluate(unit(1)).await.unwrap_err();
        assert!(err.is_benign_capture_failure());
    }

    #[tokio::test]
    async fn test_unknown_unit_is_not_captured() {
        let capture = FakeCapture::new(Raster::solid(30, 30, WHITE));
        let (orchestrator, store) = setup(Arc::new(MemoryStore::new()), capture.clone()).await;
        store
            .put(unit(7), Raster::solid(30, 30, WHITE), "https://gone.example")
            .await
            .unwrap();

        let err = orchestrator.evaluate(unit(7)).await.unwrap_err();
        assert!(matches!(err, Error::UnitNotFound { unit_id } if unit_id == unit(7)));
        assert_eq!(capture.calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_prior_is_comparison_unavailable() {
        let backend = Arc::new(MemoryStore::new());
        let capture = FakeCapture::new(Raster::solid(30, 30, WHITE));
        let (orchestrator, _store) = setup(backend.clone(), capture).await;

        let mut items = StorageMap::default();
        items.insert(
            "screenshot_1".into(),
            Value::String("data:image/png;base64,bm90IGFuIGltYWdl".into()),
        );
        backend.set(items).await.unwrap();

        let err = orchestrator.evaluate(unit(1)).await.unwrap_err();
        assert!(matches!(err, Error::ComparisonUnavailable { .. }));
    }
}
