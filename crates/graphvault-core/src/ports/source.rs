//! Collection source port
//!
//! Implemented by the remote connector. Backup asks it to enumerate one
//! (owner, category) into streaming collections; restore hands it
//! collections to replay against the remote side.

use tokio_util::sync::CancellationToken;

use crate::domain::backup::CategoryMetadata;
use crate::domain::collection::{Collection, StatusSender};
use crate::domain::path::Category;

/// One (owner, category) enumeration request.
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    pub tenant: String,
    pub owner: String,
    pub category: Category,
    /// Delta tokens and folder paths recovered from the prior backup;
    /// empty on a fresh start.
    pub prior: CategoryMetadata,
}

/// Counters reported by a restore replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreCounts {
    pub items_written: u64,
    pub items_failed: u64,
    pub bytes_written: u64,
}

/// Port trait for producing and consuming collections against the
/// remote service.
#[async_trait::async_trait]
pub trait CollectionSource: Send + Sync {
    /// Enumerates folders and item deltas for the request and returns
    /// the resulting collections, with the category's metadata
    /// collection appended last. Completion statuses flow through
    /// `statuses` as each collection finishes producing.
    async fn produce_backup_collections(
        &self,
        request: CollectionRequest,
        statuses: StatusSender,
        cancel: CancellationToken,
    ) -> anyhow::Result<Vec<Box<dyn Collection>>>;

    /// Replays restored collections back to the remote service,
    /// re-creating items under their collection paths. Per-item failures
    /// are counted, not fatal.
    async fn consume_restore_collections(
        &self,
        collections: Vec<Box<dyn Collection>>,
        cancel: CancellationToken,
    ) -> anyhow::Result<RestoreCounts>;
}
