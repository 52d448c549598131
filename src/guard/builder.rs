//! Builder pattern for guard configuration.
//!
//! # Example
//!
//! ```ignore
//! use tabnab_guard::{Guard, GuardOptions};
//!
//! let guard = Guard::builder()
//!     .host(host)
//!     .capture(capture)
//!     .sink(renderer)
//!     .options(GuardOptions::new().with_capacity(20))
//!     .build()
//!     .await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::host::{CapturePrimitive, HostSurface, LogSink, ResultSink};
use crate::imaging::ImageComparator;
use crate::storage::{MemoryStore, PersistentStore};

use super::core::Guard;
use super::options::GuardOptions;

// ============================================================================
// GuardBuilder
// ============================================================================

/// Builder for configuring a [`Guard`].
///
/// Use [`Guard::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct GuardBuilder {
    /// Tab enumeration.
    host: Option<Arc<dyn HostSurface>>,
    /// Visible-surface capture.
    capture: Option<Arc<dyn CapturePrimitive>>,
    /// Persistent backend; in-memory if unset.
    storage: Option<Arc<dyn PersistentStore>>,
    /// Result receiver; log-only if unset.
    sink: Option<Arc<dyn ResultSink>>,
    /// Comparator override.
    comparator: Option<ImageComparator>,
    /// Tunables.
    options: GuardOptions,
}

impl fmt::Debug for GuardBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardBuilder")
            .field("host", &self.host.is_some())
            .field("capture", &self.capture.is_some())
            .field("storage", &self.storage.is_some())
            .field("sink", &self.sink.is_some())
            .field("comparator", &self.comparator)
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// GuardBuilder Implementation
// ============================================================================

impl GuardBuilder {
    /// Creates a builder with no collaborators.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the host tab enumerator. Required.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: Arc<dyn HostSurface>) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets the capture primitive. Required.
    #[inline]
    #[must_use]
    pub fn capture(mut self, capture: Arc<dyn CapturePrimitive>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Sets the persistent backend.
    #[inline]
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn PersistentStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the result sink.
    #[inline]
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Overrides the image comparator.
    #[inline]
    #[must_use]
    pub fn comparator(mut self, comparator: ImageComparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Sets the options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: GuardOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the guard with validation.
    ///
    /// Opens the snapshot store, so this is async.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if host or capture is not set, or options are invalid
    /// - [`Error::StorageUnavailable`] if the backend cannot be scanned
    pub async fn build(self) -> Result<Guard> {
        self.options.validate().map_err(Error::config)?;
        let host = self.validate_host()?;
        let capture = self.validate_capture()?;

        let storage: Arc<dyn PersistentStore> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(MemoryStore::with_quota(self.options.storage_quota_bytes)),
        };
        let sink: Arc<dyn ResultSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(LogSink),
        };
        let comparator = self.comparator.unwrap_or_default();

        Guard::new(host, capture, storage, sink, comparator, self.options).await
    }
}

// ============================================================================
// Validation
// ============================================================================

impl GuardBuilder {
    /// Validates the host configuration.
    fn validate_host(&self) -> Result<Arc<dyn HostSurface>> {
        self.host.clone().ok_or_else(|| {
            Error::config(
                "Host surface is required. Use .host() to set it.\n\
                 Example: Guard::builder().host(Arc::new(my_host))",
            )
        })
    }

    /// Validates the capture configuration.
    fn validate_capture(&self) -> Result<Arc<dyn CapturePrimitive>> {
        self.capture.clone().ok_or_else(|| {
            Error::config(
                "Capture primitive is required. Use .capture() to set it.\n\
                 Example: Guard::builder().capture(Arc::new(my_capture))",
            )
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
