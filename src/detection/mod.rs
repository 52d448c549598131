//! Change detection: severity classification and the comparison flow.

// ============================================================================
// Submodules
// ============================================================================

/// Stored-vs-fresh comparison.
pub mod orchestrator;

/// Severity tiers and results.
pub mod severity;

// ============================================================================
// Re-exports
// ============================================================================

pub use orchestrator::{ComparisonOrchestrator, Evaluation};
pub use severity::{
    ComparisonResult, HIGH_THRESHOLD, LOW_THRESHOLD, MEDIUM_THRESHOLD, Severity, Status,
};
