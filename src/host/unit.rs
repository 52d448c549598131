//! What the host reports about a unit.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::identifiers::UnitId;
use crate::imaging::Raster;

// ============================================================================
// Viewport
// ============================================================================

/// Logical size of a unit's visible area, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels.
    pub width: f64,
    /// Height in CSS pixels.
    pub height: f64,
}

impl Viewport {
    /// Creates a viewport.
    #[inline]
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Viewport matching an image's pixel size (device pixel ratio 1).
    #[inline]
    #[must_use]
    pub fn of(image: &Raster) -> Self {
        Self::new(f64::from(image.width()), f64::from(image.height()))
    }
}

// ============================================================================
// Capturability
// ============================================================================

/// Whether a unit's surface can be captured right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capturability {
    /// Live, focused, ordinary page.
    Capturable,
    /// Host reports the unit as closed.
    Destroyed,
    /// Unit exists but is not the visible one.
    Hidden,
    /// Internal browser page (`chrome://`, `about:` ...).
    Restricted,
    /// Empty locator or `about:blank`.
    Blank,
}

impl Capturability {
    /// Returns `true` if a capture may be attempted.
    #[inline]
    #[must_use]
    pub fn is_capturable(&self) -> bool {
        matches!(self, Self::Capturable)
    }
}

impl fmt::Display for Capturability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Capturable => "capturable",
            Self::Destroyed => "destroyed",
            Self::Hidden => "hidden",
            Self::Restricted => "restricted page",
            Self::Blank => "blank page",
        };
        f.write_str(text)
    }
}

// ============================================================================
// UnitInfo
// ============================================================================

/// Host-side description of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitInfo {
    /// Unit identifier.
    pub id: UnitId,
    /// Current locator (URL).
    pub locator: String,
    /// Page title, if known.
    #[serde(default)]
    pub title: Option<String>,
    /// `false` once the host has closed the unit.
    pub is_live: bool,
    /// `true` for the unit the user is looking at.
    pub is_focused: bool,
    /// Visible area in CSS pixels, if the host knows it.
    #[serde(default)]
    pub viewport: Option<Viewport>,
}

impl UnitInfo {
    /// Creates a live, focused unit.
    #[must_use]
    pub fn new(id: UnitId, locator: impl Into<String>) -> Self {
        Self {
            id,
            locator: locator.into(),
            title: None,
            is_live: true,
            is_focused: true,
            viewport: None,
        }
    }

    /// Sets the page title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the focus flag.
    #[must_use]
    pub fn with_focused(mut self, focused: bool) -> Self {
        self.is_focused = focused;
        self
    }

    /// Sets the viewport.
    #[must_use]
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    /// Classifies whether this unit may be captured.
    ///
    /// `restricted_schemes` are compared case-insensitively against the
    /// locator's URL scheme.
    #[must_use]
    pub fn capturability(&self, restricted_schemes: &[String]) -> Capturability {
        if !self.is_live {
            return Capturability::Destroyed;
        }
        if self.is_restricted(restricted_schemes) {
            return Capturability::Restricted;
        }
        if self.locator.is_empty() || self.locator == "about:blank" {
            return Capturability::Blank;
        }
        if !self.is_focused {
            return Capturability::Hidden;
        }
        Capturability::Capturable
    }

    /// Returns `true` for internal pages that are never monitored.
    #[must_use]
    pub fn is_restricted(&self, restricted_schemes: &[String]) -> bool {
        if self.locator == "about:blank" {
            return false;
        }
        match Url::parse(&self.locator) {
            Ok(url) => restricted_schemes
                .iter()
                .any(|scheme| scheme.eq_ignore_ascii_case(url.scheme())),
            Err(_) => false,
        }
    }

    /// Short human label for logs: `title [host]`, or the full locator for
    /// pages without a host.
    #[must_use]
    pub fn label(&self) -> String {
        let title = self.title.as_deref().unwrap_or("Untitled");
        match Url::parse(&self.locator) {
            Ok(url) => match url.host_str() {
                Some(host) if !host.is_empty() => format!("{title} [{host}]"),
                _ => format!("{title} ({})", self.locator),
            },
            Err(_) if !self.locator.is_empty() => format!("{title} ({})", self.locator),
            Err(_) => format!("Unit {}", self.id),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
