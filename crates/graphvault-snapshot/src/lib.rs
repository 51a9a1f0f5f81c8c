//! GraphVault snapshot layer
//!
//! Turns streaming collections into immutable, content-addressed
//! snapshots in an S3-compatible object store, and back:
//! - [`stream`] - version-prefixed item framing
//! - [`builder`] - collections to a virtual snapshot tree
//! - [`progress`] - per-item accounting and details assembly
//! - [`repository`] - the [`graphvault_core::ports::SnapshotStore`] facade
//! - [`store`] - the `(schema, id)` model store for backup records

pub mod builder;
pub mod progress;
pub mod repository;
pub mod store;
pub mod stream;

use thiserror::Error;

/// Errors specific to the snapshot layer.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Collections spanning more than one tenant in a single backup.
    #[error("collections span multiple tenants: {0:?} and {1:?}")]
    MultipleRoots(String, String),

    /// A non-deleted collection with no current path.
    #[error("collection has neither a current nor a previous path")]
    MissingPath,

    /// The version prefix on a restored stream did not match.
    #[error("stream version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Snapshot or model lookup failed.
    #[error("{0} not found")]
    NotFound(String),
}

pub use repository::SnapshotRepository;
pub use store::ObjectModelStore;
