//! Domain entities and value types
//!
//! Everything here is independent of the remote API and of the snapshot
//! backend. The `path` module is the namespace backbone: every other
//! entity refers to locations through [`path::RepoPath`].

pub mod backup;
pub mod collection;
pub mod details;
pub mod errors;
pub mod item;
pub mod path;
