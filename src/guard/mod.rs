//! Guard coordinator and its configuration.
//!
//! # Example
//!
//! ```ignore
//! use tabnab_guard::{Guard, GuardOptions, HostEvent};
//!
//! let guard = Guard::builder()
//!     .host(host)
//!     .capture(capture)
//!     .options(GuardOptions::from_json(config_json)?)
//!     .build()
//!     .await?;
//!
//! guard
//!     .handle_event(HostEvent::FocusChanged { previous: None, current: tab })
//!     .await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Builder for guard configuration.
pub mod builder;

/// Guard coordinator.
pub mod core;

/// Guard options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::GuardBuilder;
pub use core::{ForceCheckOutcome, Guard};
pub use options::GuardOptions;
