//! Severity tiers and the result of one comparison.
//!
//! | Mismatch % | Severity | Status | Badge |
//! |------------|----------|--------|-------|
//! | `< 1` | [`Severity::Safe`] | [`Status::Safe`] | `✓` green |
//! | `[1, 10)` | [`Severity::Low`] | [`Status::Warning`] | `!` orange |
//! | `[10, 30)` | [`Severity::Medium`] | [`Status::Warning`] | `!` orange |
//! | `>= 30` | [`Severity::High`] | [`Status::Danger`] | `!` red |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::imaging::ChangedCell;

// ============================================================================
// Constants
// ============================================================================

/// Lowest mismatch reported as [`Severity::Low`].
pub const LOW_THRESHOLD: f64 = 1.0;

/// Lowest mismatch reported as [`Severity::Medium`].
pub const MEDIUM_THRESHOLD: f64 = 10.0;

/// Lowest mismatch reported as [`Severity::High`].
pub const HIGH_THRESHOLD: f64 = 30.0;

// ============================================================================
// Severity
// ============================================================================

/// How much a unit changed while it was out of focus.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Below 1 %.
    Safe,
    /// Minor change.
    Low,
    /// Moderate change, possible tabnabbing.
    Medium,
    /// Major change, tabnabbing likely.
    High,
}

impl Severity {
    /// Classifies a whole-image mismatch percentage.
    ///
    /// Lower bounds are inclusive. Anything that is not a number at or
    /// above 1 (including NaN) is safe.
    #[must_use]
    pub fn classify(mismatch_percent: f64) -> Self {
        if !(mismatch_percent >= LOW_THRESHOLD) {
            Self::Safe
        } else if mismatch_percent < MEDIUM_THRESHOLD {
            Self::Low
        } else if mismatch_percent < HIGH_THRESHOLD {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Returns `true` for [`Severity::Safe`].
    #[inline]
    #[must_use]
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }

    /// Coarse status for ambient indicators.
    #[inline]
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Safe => Status::Safe,
            Self::Low | Self::Medium => Status::Warning,
            Self::High => Status::Danger,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Safe => "safe",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(text)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Three-state indicator value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No relevant change.
    Safe,
    /// Some change.
    Warning,
    /// Major change.
    Danger,
}

impl Status {
    /// Badge text.
    #[inline]
    #[must_use]
    pub fn badge_text(&self) -> &'static str {
        match self {
            Self::Safe => "✓",
            Self::Warning | Self::Danger => "!",
        }
    }

    /// Badge background color as `#RRGGBB`.
    #[inline]
    #[must_use]
    pub fn badge_color(&self) -> &'static str {
        match self {
            Self::Safe => "#00FF00",
            Self::Warning => "#FFA500",
            Self::Danger => "#FF0000",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Safe => "safe",
            Self::Warning => "warning",
            Self::Danger => "danger",
        };
        f.write_str(text)
    }
}

// ============================================================================
// ComparisonResult
// ============================================================================

/// Outcome of comparing a unit's stored snapshot with a fresh capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    /// Whole-image mismatch in `[0, 100]`.
    pub mismatch_percent: f64,
    /// Whether both captures had the same pixel dimensions.
    pub same_dimensions: bool,
    /// Tier derived from `mismatch_percent`.
    pub severity: Severity,
    /// Cells above the cell threshold, in viewport coordinates.
    ///
    /// Always empty when `severity` is safe.
    pub changed_cells: Vec<ChangedCell>,
    /// Grid size used for `changed_cells`.
    pub grid_size: u32,
}

impl ComparisonResult {
    /// Indicator status for this result.
    #[inline]
    #[must_use]
    pub fn status(&self) -> Status {
        self.severity.status()
    }

    /// Total number of grid cells.
    #[inline]
    #[must_use]
    pub fn total_cells(&self) -> u32 {
        self.grid_size * self.grid_size
    }

    /// Human-readable summary for banners and logs.
    #[must_use]
    pub fn message(&self) -> String {
        let pct = self.mismatch_percent;
        match self.severity {
            Severity::Safe => {
                format!("Screenshots match ({pct:.2}% difference), no tabnabbing detected")
            }
            Severity::Low => format!("Minor changes detected ({pct:.2}% difference)"),
            Severity::Medium => format!(
                "Moderate changes detected ({pct:.2}% difference), possible tabnabbing"
            ),
            Severity::High => format!(
                "Major changes detected ({pct:.2}% difference), tabnabbing attack likely"
            ),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
