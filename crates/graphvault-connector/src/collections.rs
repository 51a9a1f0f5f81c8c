//! Metadata collection construction and recovery
//!
//! The per-category metadata collection is a synthetic
//! [`StreamCollection`] at the reserved metadata path holding two JSON
//! items: the folder delta tokens and the folder path map. On restore,
//! [`parse_metadata_collections`] recovers the maps and enforces the
//! one-file-per-name protocol.

use graphvault_core::domain::backup::{
    CategoryMetadata, DELTA_URLS_FILE, PREVIOUS_PATH_FILE,
};
use graphvault_core::domain::collection::{Status, StatusSender, StreamCollection};
use graphvault_core::domain::item::ItemStream;
use graphvault_core::domain::path::RepoPath;

use crate::errors::ConnectorError;

pub use graphvault_core::domain::backup::parse_metadata_collections;

/// Builds the synthetic metadata collection for one category.
///
/// The collection holds two JSON items, [`DELTA_URLS_FILE`] and
/// [`PREVIOUS_PATH_FILE`], pre-loaded into the channel. A completion
/// status is reported immediately through `statuses`.
pub fn metadata_collection(
    path: RepoPath,
    metadata: &CategoryMetadata,
    statuses: &StatusSender,
) -> Result<StreamCollection, ConnectorError> {
    let category = path.category();
    let (collection, tx) = StreamCollection::new(path, None);

    let mut bytes_total = 0u64;
    for (name, map) in [
        (DELTA_URLS_FILE, &metadata.deltas),
        (PREVIOUS_PATH_FILE, &metadata.paths),
    ] {
        let bytes = serde_json::to_vec(map)
            .map_err(|e| ConnectorError::NonRecoverable(e.into()))?;
        debug_assert!(!bytes.is_empty());
        if bytes.is_empty() {
            return Err(ConnectorError::NonRecoverable(anyhow::anyhow!(
                "serialised metadata item {name} is empty"
            )));
        }

        bytes_total += bytes.len() as u64;
        tx.try_send(ItemStream::opaque(name, bytes))
            .map_err(|e| ConnectorError::NonRecoverable(anyhow::anyhow!(e.to_string())))?;
    }
    drop(tx);

    let _ = statuses.send(Status {
        object_type: category,
        items_processed: 2,
        items_failed: 0,
        bytes: bytes_total,
        is_complete: true,
    });

    Ok(collection)
}
