//! Grid localization of visual changes.
//!
//! Both images are cut into the same `N x N` grid over the shared
//! viewport coordinate space. Each image is sliced by its own pixel size,
//! so a cell covers the same region of the page even when the two
//! captures differ in resolution. Every cell pair is scored by the [`ImageComparator`] on a
//! blocking worker; all cells are issued at once and joined together.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::debug;

use crate::error::{Error, Result};
use crate::host::Viewport;

use super::comparator::ImageComparator;
use super::raster::Raster;

// ============================================================================
// Constants
// ============================================================================

/// Default grid size (15 x 15 = 225 cells).
pub const DEFAULT_GRID_SIZE: u32 = 15;

/// Default per-cell mismatch threshold, in percent.
pub const DEFAULT_CELL_THRESHOLD: f64 = 5.0;

// ============================================================================
// Types
// ============================================================================

/// A rectangle in viewport coordinates (CSS pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellRect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

/// A grid cell whose mismatch exceeded the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangedCell {
    /// Row index, 0-based from the top.
    pub row: u32,
    /// Column index, 0-based from the left.
    pub col: u32,
    /// Cell placement in viewport coordinates.
    pub rect: CellRect,
    /// Mismatch score of this cell alone.
    pub mismatch_percent: f64,
}

// ============================================================================
// GridDiffer
// ============================================================================

/// Scores every cell of an `N x N` grid and reports the changed ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridDiffer {
    comparator: ImageComparator,
}

impl GridDiffer {
    /// Creates a grid differ backed by the given comparator.
    #[inline]
    #[must_use]
    pub const fn new(comparator: ImageComparator) -> Self {
        Self { comparator }
    }

    /// Diffs two images, evaluating all cells concurrently.
    ///
    /// A cell is reported iff its mismatch strictly exceeds `threshold`.
    /// The result is ordered by row, then column.
    ///
    /// # Errors
    ///
    /// - [`Error::ComparisonUnavailable`] if a cell worker panicked or was cancelled
    pub async fn diff(
        &self,
        a: Arc<Raster>,
        b: Arc<Raster>,
        viewport: Viewport,
        grid_size: u32,
        threshold: f64,
    ) -> Result<Vec<ChangedCell>> {
        if grid_size == 0 {
            return Ok(Vec::new());
        }

        let workers = (0..grid_size).flat_map(|row| {
            (0..grid_size).map(move |col| (row, col))
        });

        let handles: Vec<_> = workers
            .map(|(row, col)| {
                let a = Arc::clone(&a);
                let b = Arc::clone(&b);
                let comparator = self.comparator;
                task::spawn_blocking(move || {
                    score_cell(&comparator, &a, &b, viewport, grid_size, row, col)
                })
            })
            .collect();

        let mut changed = Vec::new();
        for joined in join_all(handles).await {
            let cell = joined.map_err(|e| {
                Error::comparison_unavailable(format!("grid cell worker failed: {e}"))
            })?;
            if cell.mismatch_percent > threshold {
                changed.push(cell);
            }
        }

        changed.sort_by_key(|c| (c.row, c.col));
        debug!(
            grid_size,
            threshold,
            changed = changed.len(),
            total = grid_size * grid_size,
            "Grid diff complete"
        );
        Ok(changed)
    }

    /// Diffs two images on the calling thread.
    #[must_use]
    pub fn diff_blocking(
        &self,
        a: &Raster,
        b: &Raster,
        viewport: Viewport,
        grid_size: u32,
        threshold: f64,
    ) -> Vec<ChangedCell> {
        let mut changed = Vec::new();
        for row in 0..grid_size {
            for col in 0..grid_size {
                let cell = score_cell(&self.comparator, a, b, viewport, grid_size, row, col);
                if cell.mismatch_percent > threshold {
                    changed.push(cell);
                }
            }
        }
        changed
    }
}

// ============================================================================
// Cell Geometry
// ============================================================================

/// Scores one cell, returning it regardless of threshold.
fn score_cell(
    comparator: &ImageComparator,
    a: &Raster,
    b: &Raster,
    viewport: Viewport,
    grid_size: u32,
    row: u32,
    col: u32,
) -> ChangedCell {
    let cell_a = slice(a, grid_size, row, col);
    let cell_b = slice(b, grid_size, row, col);
    let comparison = comparator.compare(&cell_a, &cell_b);

    ChangedCell {
        row,
        col,
        rect: viewport_rect(viewport, grid_size, row, col),
        mismatch_percent: comparison.mismatch_percent,
    }
}

/// Extracts the pixels of one cell from an image.
fn slice(image: &Raster, grid_size: u32, row: u32, col: u32) -> Raster {
    let (x, width) = span(col, grid_size, image.width());
    let (y, height) = span(row, grid_size, image.height());
    image.crop(x, y, width, height)
}

/// Pixel span `(start, len)` of cell `index` along an axis of `extent`.
///
/// Every cell gets at least one pixel when the axis is non-empty, even if
/// the axis is narrower than the grid.
fn span(index: u32, grid_size: u32, extent: u32) -> (u32, u32) {
    if extent == 0 {
        return (0, 0);
    }
    let start = (u64::from(index) * u64::from(extent) / u64::from(grid_size)) as u32;
    let end = (u64::from(index + 1) * u64::from(extent) / u64::from(grid_size)) as u32;
    let end = end.max(start + 1).min(extent);
    (start, end - start)
}

/// Cell rectangle in viewport coordinates.
fn viewport_rect(viewport: Viewport, grid_size: u32, row: u32, col: u32) -> CellRect {
    let width = viewport.width / f64::from(grid_size);
    let height = viewport.height / f64::from(grid_size);
    CellRect {
        x: f64::from(col) * width,
        y: f64::from(row) * height,
        width,
        height,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn viewport() -> Viewport {
        Viewport::new(1500.0, 750.0)
    }

    #[test]
    fn test_span_covers_axis_exactly() {
        let mut next = 0;
        for i in 0..15 {
            let (start, len) = span(i, 15, 1000);
            assert_eq!(start, next);
            assert!(len > 0);
            next = start + len;
        }
        assert_eq!(next, 1000);
    }

    #[test]
    fn test_span_on_narrow_axis() {
        for i in 0..15 {
            let (start, len) = span(i, 15, 4);
            assert_eq!(len, 1);
            assert!(start < 4);
        }
        assert_eq!(span(3, 15, 0), (0, 0));
    }

    #[test]
    fn test_viewport_rect_uses_viewport_space() {
        let rect = viewport_rect(viewport(), 15, 2, 3);
        assert_eq!(rect.x, 300.0);
        assert_eq!(rect.y, 100.0);
        assert_eq!(rect.width, 100.0);
        assert_eq!(rect.height, 50.0);
    }

    #[tokio::test]
    async fn test_full_frame_change_marks_every_cell() {
        let a = Arc::new(Raster::solid(300, 150, WHITE));
        let b = Arc::new(Raster::solid(300, 150, BLACK));

        let changed = GridDiffer::default()
            .diff(a, b, viewport(), DEFAULT_GRID_SIZE, DEFAULT_CELL_THRESHOLD)
            .await
            .unwrap();

        assert_eq!(changed.len(), 225);
        assert!(changed.iter().all(|c| c.row < 15 && c.col < 15));
    }

    #[tokio::test]
    async fn test_identical_images_mark_nothing() {
        let a = Arc::new(Raster::solid(300, 150, WHITE));

        let changed = GridDiffer::default()
            .diff(Arc::clone(&a), a, viewport(), DEFAULT_GRID_SIZE, DEFAULT_CELL_THRESHOLD)
            .await
            .unwrap();

        assert!(changed.is_empty());
    }

    #[tokio::test]
    async fn test_localized_change_reports_its_cells() {
        let a = Raster::solid(300, 300, WHITE);
        let mut b = a.clone();
        // Top-left 3x3 block of cells (each cell is 20x20 px).
        b.fill_rect(0, 0, 60, 60, BLACK);

        let changed = GridDiffer::default()
            .diff(
                Arc::new(a),
                Arc::new(b),
                Viewport::new(300.0, 300.0),
                15,
                5.0,
            )
            .await
            .unwrap();

        let cells: Vec<_> = changed.iter().map(|c| (c.row, c.col)).collect();
        let expected: Vec<_> = (0..3).flat_map(|r| (0..3).map(move |c| (r, c))).collect();
        assert_eq!(cells, expected);
        assert_eq!(changed[4].rect.x, 20.0);
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let a = Raster::solid(20, 20, WHITE);
        let mut b = a.clone();
        // Exactly 5% of the single cell.
        b.fill_rect(0, 0, 20, 1, BLACK);

        let differ = GridDiffer::default();
        let at_threshold = differ
            .diff(
                Arc::new(a.clone()),
                Arc::new(b.clone()),
                Viewport::new(20.0, 20.0),
                1,
                5.0,
            )
            .await
            .unwrap();
        let below_threshold = differ
            .diff(Arc::new(a), Arc::new(b), Viewport::new(20.0, 20.0), 1, 4.9)
            .await
            .unwrap();

        assert!(at_threshold.is_empty());
        assert_eq!(below_threshold.len(), 1);
    }

    #[tokio::test]
    async fn test_blocking_and_concurrent_agree() {
        let a = Raster::solid(90, 90, WHITE);
        let mut b = a.clone();
        b.fill_rect(30, 45, 40, 20, BLACK);

        let differ = GridDiffer::default();
        let sequential = differ.diff_blocking(&a, &b, Viewport::new(90.0, 90.0), 9, 5.0);
        let concurrent = differ
            .diff(Arc::new(a), Arc::new(b), Viewport::new(90.0, 90.0), 9, 5.0)
            .await
            .unwrap();

        assert_eq!(sequential, concurrent);
    }
}
