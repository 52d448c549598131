//! Interfaces the core consumes from, and exposes to, the host.
//!
//! Transport is up to the embedder (native messaging, a WebSocket relay,
//! in-process calls). Every method returns an explicit [`Result`]; a
//! receiver that is not ready reports [`Error::Unreachable`] instead of
//! being silently ignored, and each call site decides whether to fail
//! open or fail loud.

use async_trait::async_trait;
use tracing::info;

use crate::detection::{ComparisonResult, Status};
use crate::error::{Error, Result};
use crate::identifiers::UnitId;
use crate::imaging::Raster;

use super::unit::UnitInfo;

// ============================================================================
// HostSurface
// ============================================================================

/// Host tab/window enumeration.
#[async_trait]
pub trait HostSurface: Send + Sync {
    /// Looks up a unit. `Ok(None)` if the host no longer knows it.
    async fn unit(&self, unit_id: UnitId) -> Result<Option<UnitInfo>>;

    /// Ids of every unit that currently exists.
    async fn live_units(&self) -> Result<Vec<UnitId>>;
}

// ============================================================================
// CapturePrimitive
// ============================================================================

/// Visible-surface capture.
#[async_trait]
pub trait CapturePrimitive: Send + Sync {
    /// Captures what the unit currently shows.
    ///
    /// # Errors
    ///
    /// - [`Error::NotCapturable`] for internal pages or units mid-transition
    /// - [`Error::PermissionDenied`] when the host refuses capture access
    async fn capture_visible(&self, unit_id: UnitId) -> Result<Raster>;
}

// ============================================================================
// ResultSink
// ============================================================================

/// Receiver of detection results (overlay renderer, banner, badge).
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Delivers a non-safe result for overlay and banner rendering.
    async fn deliver(&self, unit_id: UnitId, result: &ComparisonResult) -> Result<()>;

    /// Updates the ambient indicator (badge color) for a unit.
    async fn indicate(&self, unit_id: UnitId, status: Status) -> Result<()>;

    /// Removes any highlights previously drawn for a unit.
    async fn clear(&self, unit_id: UnitId) -> Result<()>;
}

/// Sink that only writes results to the log.
///
/// Used when no renderer is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn deliver(&self, unit_id: UnitId, result: &ComparisonResult) -> Result<()> {
        info!(
            unit_id = %unit_id,
            severity = %result.severity,
            mismatch = result.mismatch_percent,
            changed_cells = result.changed_cells.len(),
            "{}",
            result.message()
        );
        Ok(())
    }

    async fn indicate(&self, unit_id: UnitId, status: Status) -> Result<()> {
        info!(unit_id = %unit_id, status = %status, badge = status.badge_text(), "Indicator updated");
        Ok(())
    }

    async fn clear(&self, _unit_id: UnitId) -> Result<()> {
        Ok(())
    }
}

/// Sink with no receiving side, every call is unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSink;

#[async_trait]
impl ResultSink for DetachedSink {
    async fn deliver(&self, unit_id: UnitId, _result: &ComparisonResult) -> Result<()> {
        Err(Error::unreachable(format!("result renderer for unit {unit_id}")))
    }

    async fn indicate(&self, unit_id: UnitId, _status: Status) -> Result<()> {
        Err(Error::unreachable(format!("indicator for unit {unit_id}")))
    }

    async fn clear(&self, unit_id: UnitId) -> Result<()> {
        Err(Error::unreachable(format!("result renderer for unit {unit_id}")))
    }
}
