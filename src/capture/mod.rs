//! Periodic capture of the focused unit.
//!
//! See [`CaptureScheduler`].

// ============================================================================
// Submodules
// ============================================================================

/// Capture job scheduler.
pub mod scheduler;

// ============================================================================
// Re-exports
// ============================================================================

pub use scheduler::{CaptureOutcome, CaptureScheduler, DEFAULT_CADENCE, JobState, MIN_CADENCE, SkipReason};
