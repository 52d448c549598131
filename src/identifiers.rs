//! Type-safe identifiers for monitored units.
//!
//! The host hands out opaque, non-zero numeric ids for its focusable
//! surfaces (browser tabs). Wrapping them prevents mixing a unit id with
//! sequence numbers or pixel counts.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// UnitId
// ============================================================================

/// Identifier of a monitored unit (tab).
///
/// Stable for as long as the unit exists. Zero is reserved by hosts as
/// "no tab", so it is rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(NonZeroU32);

impl UnitId {
    /// Creates a unit id, returning `None` for zero.
    #[inline]
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UnitId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u32 = s
            .parse()
            .map_err(|_| format!("invalid unit id: {s:?}"))?;
        Self::new(raw).ok_or_else(|| "unit id must be non-zero".to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
