//! Guard configuration.
//!
//! Every field has a default; JSON input may name any subset of them.
//!
//! # Example
//!
//! ```ignore
//! use tabnab_guard::GuardOptions;
//!
//! let options = GuardOptions::new()
//!     .with_cadence_ms(2_000)
//!     .with_capacity(20)
//!     .with_restricted_scheme("edge");
//!
//! let options = GuardOptions::from_json(r#"{ "gridSize": 10 }"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::imaging::{DEFAULT_CELL_THRESHOLD, DEFAULT_GRID_SIZE, SnapshotFormat};
use crate::storage::{DEFAULT_CAPACITY, DEFAULT_QUOTA_BYTES};

// ============================================================================
// Constants
// ============================================================================

/// Default capture cadence in milliseconds.
pub const DEFAULT_CADENCE_MS: u64 = 5_000;

/// Default settle delay before a focus-regain comparison, in milliseconds.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1_000;

/// Upper bound on the settle delay.
pub const MAX_SETTLE_DELAY_MS: u64 = 10_000;

/// Largest accepted grid size.
pub const MAX_GRID_SIZE: u32 = 100;

/// Schemes of internal pages that are never captured.
pub const DEFAULT_RESTRICTED_SCHEMES: [&str; 4] =
    ["chrome", "chrome-extension", "about", "moz-extension"];

// ============================================================================
// GuardOptions
// ============================================================================

/// Tunables for a [`Guard`](crate::Guard).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuardOptions {
    /// Interval between background captures of the focused unit.
    pub cadence_ms: u64,

    /// Maximum number of retained snapshots.
    pub capacity: usize,

    /// Grid is `grid_size x grid_size` cells.
    pub grid_size: u32,

    /// Percent a cell must exceed to be reported as changed.
    pub cell_threshold: f64,

    /// Wait after focus regain before comparing.
    pub settle_delay_ms: u64,

    /// URL schemes that are never captured.
    pub restricted_schemes: Vec<String>,

    /// Encoding for stored snapshots.
    pub snapshot_format: SnapshotFormat,

    /// Quota of the default in-memory backend.
    pub storage_quota_bytes: usize,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl GuardOptions {
    /// Creates options with the default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cadence_ms: DEFAULT_CADENCE_MS,
            capacity: DEFAULT_CAPACITY,
            grid_size: DEFAULT_GRID_SIZE,
            cell_threshold: DEFAULT_CELL_THRESHOLD,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            restricted_schemes: DEFAULT_RESTRICTED_SCHEMES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            snapshot_format: SnapshotFormat::Png,
            storage_quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }

    /// Parses options from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] on malformed input
    /// - [`Error::Config`] if the parsed values are invalid
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate().map_err(Error::config)?;
        Ok(options)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl GuardOptions {
    /// Sets the capture cadence.
    #[inline]
    #[must_use]
    pub fn with_cadence_ms(mut self, cadence_ms: u64) -> Self {
        self.cadence_ms = cadence_ms;
        self
    }

    /// Sets the snapshot capacity.
    #[inline]
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets grid size and cell threshold.
    #[inline]
    #[must_use]
    pub fn with_grid(mut self, grid_size: u32, cell_threshold: f64) -> Self {
        self.grid_size = grid_size;
        self.cell_threshold = cell_threshold;
        self
    }

    /// Sets the settle delay.
    #[inline]
    #[must_use]
    pub fn with_settle_delay_ms(mut self, settle_delay_ms: u64) -> Self {
        self.settle_delay_ms = settle_delay_ms;
        self
    }

    /// Adds a restricted URL scheme.
    #[inline]
    #[must_use]
    pub fn with_restricted_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.restricted_schemes.push(scheme.into());
        self
    }

    /// Sets the snapshot encoding.
    #[inline]
    #[must_use]
    pub fn with_snapshot_format(mut self, format: SnapshotFormat) -> Self {
        self.snapshot_format = format;
        self
    }

    /// Sets the default backend's quota.
    #[inline]
    #[must_use]
    pub fn with_storage_quota_bytes(mut self, quota_bytes: usize) -> Self {
        self.storage_quota_bytes = quota_bytes;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl GuardOptions {
    /// Capture cadence as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    /// Settle delay as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns error message if validation fails.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.cadence_ms == 0 {
            return Err("Capture cadence must be greater than zero".to_string());
        }
        if self.capacity == 0 {
            return Err("Snapshot capacity must be at least 1".to_string());
        }
        if self.grid_size == 0 || self.grid_size > MAX_GRID_SIZE {
            return Err(format!("Grid size must be between 1 and {MAX_GRID_SIZE}"));
        }
        if !(0.0..100.0).contains(&self.cell_threshold) {
            return Err("Cell threshold must be in [0, 100)".to_string());
        }
        if self.settle_delay_ms > MAX_SETTLE_DELAY_MS {
            return Err(format!(
                "Settle delay must not exceed {MAX_SETTLE_DELAY_MS} ms"
            ));
        }
        if self.storage_quota_bytes == 0 {
            return Err("Storage quota must be greater than zero".to_string());
        }
        if let SnapshotFormat::Jpeg(quality) = self.snapshot_format
            && quality > 100
        {
            return Err("JPEG quality must be at most 100".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
