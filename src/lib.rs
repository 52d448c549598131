//! Tabnab Guard - Visual tabnabbing detection core.
//!
//! Detects a background tab that silently swaps its visible content
//! (login form, branding) while the user looks elsewhere. The focused tab
//! is sampled periodically; when the user comes back, the last sample is
//! compared with a fresh capture and the change is classified and located.
//!
//! # Architecture
//!
//! The core sits between a host browser and a renderer:
//!
//! - **Host (collaborator)**: enumerates tabs, captures the visible one, emits focus events
//! - **Core (this crate)**: schedules captures, keeps a bounded snapshot store, compares
//! - **Renderer (collaborator)**: draws overlays, banners and the badge
//!
//! Key design principles:
//!
//! - At most one capture job per unit, only the focused unit samples
//! - Snapshot storage is bounded and recovers from quota pressure
//! - Comparison is two-pass: whole-image severity, then a grid for location
//! - Background paths fail open, explicit checks surface every error
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tabnab_guard::{Guard, HostEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let guard = Guard::builder()
//!         .host(Arc::new(MyHost::connect()?))
//!         .capture(Arc::new(MyCapture::new()))
//!         .build()
//!         .await?;
//!
//!     let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<HostEvent>();
//!     guard.spawn_event_loop(rx);
//!
//!     // Relay host events into `tx`...
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`capture`] | Per-unit capture scheduler |
//! | [`detection`] | Severity tiers and the comparison orchestrator |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`guard`] | Event-driven coordinator, builder and options |
//! | [`host`] | Collaborator traits and host events |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`imaging`] | Raster images, comparator, grid differ |
//! | [`storage`] | Persistent backends and the bounded snapshot store |

// ============================================================================
// Modules
// ============================================================================

/// Periodic capture of the focused unit.
pub mod capture;

/// Severity classification and the stored-vs-fresh comparison.
pub mod detection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Guard coordinator.
///
/// Use [`Guard::builder()`] to create a configured guard.
pub mod guard;

/// Host collaborator interfaces.
pub mod host;

/// Type-safe identifiers.
pub mod identifiers;

/// Image decoding, comparison and grid localization.
pub mod imaging;

/// Snapshot persistence.
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Capture types
pub use capture::{CaptureOutcome, CaptureScheduler, JobState, SkipReason};

// Detection types
pub use detection::{ComparisonOrchestrator, ComparisonResult, Evaluation, Severity, Status};

// Error types
pub use error::{Error, Result};

// Guard types
pub use guard::{ForceCheckOutcome, Guard, GuardBuilder, GuardOptions};

// Host types
pub use host::{
    Capturability, CapturePrimitive, DetachedSink, HostEvent, HostSurface, LogSink, ResultSink,
    UnitInfo, Viewport,
};

// Identifier types
pub use identifiers::UnitId;

// Imaging types
pub use imaging::{ChangedCell, CellRect, GridDiffer, ImageComparator, Raster, SnapshotFormat, Tolerance};

// Storage types
pub use storage::{JsonFileStore, MemoryStore, PersistentStore, Snapshot, SnapshotStore, SnapshotSummary};
