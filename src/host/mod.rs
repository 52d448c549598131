//! Host collaborator interfaces.
//!
//! The core never talks to a browser directly. It consumes a tab
//! enumerator and a capture primitive, receives lifecycle events, and
//! hands results to a sink.
//!
//! ```text
//! ┌────────────────┐  HostEvent   ┌─────────────────────────────┐
//! │  Host browser  │─────────────►│  Guard                      │
//! │                │              │   ├─ CaptureScheduler       │
//! │  HostSurface   │◄─────────────│   ├─ SnapshotStore          │
//! │  Capture       │◄─────────────│   └─ ComparisonOrchestrator │
//! └────────────────┘              └──────────────┬──────────────┘
//!                                                │ ResultSink
//!                                                ▼
//!                                      overlays / banner / badge
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Collaborator traits.
pub mod collaborators;

/// Host lifecycle events.
pub mod event;

/// Unit description.
pub mod unit;

// ============================================================================
// Re-exports
// ============================================================================

pub use collaborators::{CapturePrimitive, DetachedSink, HostSurface, LogSink, ResultSink};
pub use event::HostEvent;
pub use unit::{Capturability, UnitInfo, Viewport};
