//! Snapshot persistence.
//!
//! | Layer | Type | Role |
//! |-------|------|------|
//! | Policy | [`SnapshotStore`] | one snapshot per unit, bound, eviction |
//! | Backend | [`PersistentStore`] | quota-bearing key-value area |
//! | Backend impl | [`MemoryStore`] | in-process, default |
//! | Backend impl | [`JsonFileStore`] | one JSON document on disk |

// ============================================================================
// Submodules
// ============================================================================

/// Backend trait and in-memory implementation.
pub mod backend;

/// JSON file backend.
pub mod file;

/// Bounded snapshot store.
pub mod snapshot;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{DEFAULT_QUOTA_BYTES, MemoryStore, PersistentStore, StorageMap};
pub use file::JsonFileStore;
pub use snapshot::{DEFAULT_CAPACITY, EvictionReport, Snapshot, SnapshotStore, SnapshotSummary};
