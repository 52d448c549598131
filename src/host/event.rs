//! Host lifecycle notifications.
//!
//! The host pushes these over a channel subscribed once at start-up (see
//! [`Guard::spawn_event_loop`](crate::Guard::spawn_event_loop)). The JSON
//! form matches what a browser-side relay would send:
//!
//! ```json
//! { "type": "focusChanged", "previous": 4, "current": 7 }
//! { "type": "unitLoaded", "unitId": 7 }
//! { "type": "unitDestroyed", "unitId": 4 }
//! ```

use serde::{Deserialize, Serialize};

use crate::identifiers::UnitId;

// ============================================================================
// HostEvent
// ============================================================================

/// A lifecycle event from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    /// The user switched to another unit.
    #[serde(rename_all = "camelCase")]
    FocusChanged {
        /// Unit that lost focus, if the host knows it.
        #[serde(default)]
        previous: Option<UnitId>,
        /// Unit that gained focus.
        current: UnitId,
    },

    /// A unit finished loading a page.
    #[serde(rename_all = "camelCase")]
    UnitLoaded {
        /// Unit that loaded.
        unit_id: UnitId,
    },

    /// A unit was closed.
    #[serde(rename_all = "camelCase")]
    UnitDestroyed {
        /// Unit that was closed.
        unit_id: UnitId,
    },
}

impl HostEvent {
    /// Returns the unit the event is primarily about.
    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        match self {
            Self::FocusChanged { current, .. } => *current,
            Self::UnitLoaded { unit_id } | Self::UnitDestroyed { unit_id } => *unit_id,
        }
    }

    /// Parses an event from its JSON form.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
