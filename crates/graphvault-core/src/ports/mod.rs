//! Port definitions (driven interfaces)
//!
//! Traits the adapter crates implement: the connector supplies
//! [`source::CollectionSource`], the snapshot crate supplies
//! [`snapshot::SnapshotStore`] and [`model_store::ModelStore`]. Ports
//! use `anyhow::Result` because errors at these boundaries are
//! adapter-specific; the operations layer classifies what it must.

pub mod model_store;
pub mod snapshot;
pub mod source;

pub use model_store::ModelStore;
pub use snapshot::SnapshotStore;
pub use source::CollectionSource;
