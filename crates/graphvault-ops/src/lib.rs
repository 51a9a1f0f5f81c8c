//! GraphVault operations - end-to-end backup and restore runs
//!
//! Composes the connector, snapshot store, and model store ports into
//! complete operations with progress accounting and error policy:
//! read errors aggregate into the results, snapshot write errors abort
//! the run, and invalid delta tokens are handled inside the connector.

pub mod backup;
pub mod restore;

pub use backup::BackupOperation;
pub use restore::{RestoreOperation, RestoreResults};
