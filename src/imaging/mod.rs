//! Image decoding, comparison and grid localization.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `raster` | Decoded RGBA images, data-URL codec |
//! | `comparator` | Whole-image mismatch score |
//! | `grid` | `N x N` change localization |

// ============================================================================
// Submodules
// ============================================================================

/// Whole-image mismatch scoring.
pub mod comparator;

/// Grid-based change localization.
pub mod grid;

/// Decoded raster images.
pub mod raster;

// ============================================================================
// Re-exports
// ============================================================================

pub use comparator::{Comparison, ImageComparator, Tolerance};
pub use grid::{CellRect, ChangedCell, DEFAULT_CELL_THRESHOLD, DEFAULT_GRID_SIZE, GridDiffer};
pub use raster::{Raster, SnapshotFormat};
