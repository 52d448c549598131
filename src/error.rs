//! Error types for the tabnabbing guard.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use tabnab_guard::{Error, Result};
//!
//! async fn example(guard: &Guard, unit_id: UnitId) -> Result<()> {
//!     let outcome = guard.force_check(unit_id).await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | Capture | [`Error::NotCapturable`], [`Error::PermissionDenied`] | benign, skipped by the scheduler |
//! | Storage | [`Error::QuotaExceeded`], [`Error::StorageExhausted`], [`Error::StorageUnavailable`] | evict-and-retry, then surfaced |
//! | Detection | [`Error::ComparisonUnavailable`], [`Error::InvalidImage`] | fail-open to `safe` |
//! | Delivery | [`Error::Unreachable`] | caller decides fail-open or fail-loud |
//! | Host | [`Error::UnitNotFound`], [`Error::Config`] | surfaced |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Image`] | surfaced |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use image::ImageError;
use thiserror::Error;

use crate::identifiers::UnitId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Capture Errors
    // ========================================================================
    /// Unit cannot be captured right now.
    ///
    /// Internal pages, units mid-transition, hidden units. Expected steady
    /// state for the scheduler, never worth an error log.
    #[error("Unit {unit_id} not capturable: {reason}")]
    NotCapturable {
        /// Unit that was asked for.
        unit_id: UnitId,
        /// Why the host refused.
        reason: String,
    },

    /// Host denied the capture permission.
    #[error("Capture permission denied for unit {unit_id}")]
    PermissionDenied {
        /// Unit that was asked for.
        unit_id: UnitId,
    },

    // ========================================================================
    // Storage Errors
    // ========================================================================
    /// Persistent backend refused a write for lack of space.
    ///
    /// The only failure that triggers the evict-and-retry cycle.
    #[error("Storage quota exceeded: {requested_bytes} bytes requested, quota {quota_bytes} bytes")]
    QuotaExceeded {
        /// Bytes the backend would hold after the write.
        requested_bytes: usize,
        /// Backend quota in bytes.
        quota_bytes: usize,
    },

    /// Snapshot could not be stored even after two eviction passes.
    ///
    /// The previous snapshot for the unit, if any, is left intact.
    #[error("Storage exhausted while storing snapshot for unit {unit_id}")]
    StorageExhausted {
        /// Unit whose snapshot was dropped.
        unit_id: UnitId,
    },

    /// Persistent backend failed with an I/O-level error.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable {
        /// Description of the backend failure.
        message: String,
    },

    // ========================================================================
    // Detection Errors
    // ========================================================================
    /// Comparison could not run.
    ///
    /// Callers treat this as `safe`: a missed detection is preferable to a
    /// false alarm.
    #[error("Comparison unavailable: {message}")]
    ComparisonUnavailable {
        /// Why the comparison could not run.
        message: String,
    },

    /// Image data could not be decoded.
    #[error("Invalid image: {message}")]
    InvalidImage {
        /// Description of the decoding failure.
        message: String,
    },

    // ========================================================================
    // Delivery Errors
    // ========================================================================
    /// Receiving side is not ready.
    #[error("Unreachable: {target}")]
    Unreachable {
        /// Receiver that could not be reached.
        target: String,
    },

    // ========================================================================
    // Host Errors
    // ========================================================================
    /// Unit does not exist (anymore).
    #[error("Unit not found: {unit_id}")]
    UnitNotFound {
        /// The missing unit id.
        unit_id: UnitId,
    },

    /// Configuration error.
    ///
    /// Returned when guard configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image codec error.
    #[error("Image error: {0}")]
    Image(#[from] ImageError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a not-capturable error.
    #[inline]
    pub fn not_capturable(unit_id: UnitId, reason: impl Into<String>) -> Self {
        Self::NotCapturable {
            unit_id,
            reason: reason.into(),
        }
    }

    /// Creates a permission denied error.
    #[inline]
    pub fn permission_denied(unit_id: UnitId) -> Self {
        Self::PermissionDenied { unit_id }
    }

    /// Creates a quota exceeded error.
    #[inline]
    pub fn quota_exceeded(requested_bytes: usize, quota_bytes: usize) -> Self {
        Self::QuotaExceeded {
            requested_bytes,
            quota_bytes,
        }
    }

    /// Creates a storage exhausted error.
    #[inline]
    pub fn storage_exhausted(unit_id: UnitId) -> Self {
        Self::StorageExhausted { unit_id }
    }

    /// Creates a storage unavailable error.
    #[inline]
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    /// Creates a comparison unavailable error.
    #[inline]
    pub fn comparison_unavailable(message: impl Into<String>) -> Self {
        Self::ComparisonUnavailable {
            message: message.into(),
        }
    }

    /// Creates an invalid image error.
    #[inline]
    pub fn invalid_image(message: impl Into<String>) -> Self {
        Self::InvalidImage {
            message: message.into(),
        }
    }

    /// Creates an unreachable error.
    #[inline]
    pub fn unreachable(target: impl Into<String>) -> Self {
        Self::Unreachable {
            target: target.into(),
        }
    }

    /// Creates a unit not found error.
    #[inline]
    pub fn unit_not_found(unit_id: UnitId) -> Self {
        Self::UnitNotFound { unit_id }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` for capture failures that are expected and benign.
    #[inline]
    #[must_use]
    pub fn is_benign_capture_failure(&self) -> bool {
        matches!(
            self,
            Self::NotCapturable { .. } | Self::PermissionDenied { .. } | Self::UnitNotFound { .. }
        )
    }

    /// Returns `true` if this is the backend's quota signal.
    #[inline]
    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Returns `true` if this is a storage error.
    #[inline]
    #[must_use]
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. }
                | Self::StorageExhausted { .. }
                | Self::StorageUnavailable { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on the next tick or retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotCapturable { .. }
                | Self::PermissionDenied { .. }
                | Self::QuotaExceeded { .. }
                | Self::StorageExhausted { .. }
                | Self::StorageUnavailable { .. }
                | Self::ComparisonUnavailable { .. }
                | Self::Unreachable { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
