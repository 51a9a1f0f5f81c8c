//! The restore orchestrator
//!
//! Looks up a backup by ID, reduces its details through the selector,
//! streams the chosen item paths out of the snapshot, and hands the
//! collections to the connector for replay. Per-item failures are
//! reported; the operation completes as much as it can.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use graphvault_core::domain::backup::{Backup, OpStatus, BACKUP_SCHEMA, DETAILS_SCHEMA};
use graphvault_core::domain::details::DetailsModel;
use graphvault_core::domain::path::RepoPath;
use graphvault_core::ports::model_store::get_model;
use graphvault_core::ports::{CollectionSource, ModelStore, SnapshotStore};
use graphvault_core::selectors::Selector;

/// Accounting for one restore run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResults {
    pub backup_id: String,
    pub items_requested: u64,
    pub items_written: u64,
    pub items_failed: u64,
    pub bytes_written: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: OpStatus,
}

/// Composes the ports into a runnable restore.
pub struct RestoreOperation {
    source: Arc<dyn CollectionSource>,
    snapshots: Arc<dyn SnapshotStore>,
    models: Arc<dyn ModelStore>,
}

impl RestoreOperation {
    pub fn new(
        source: Arc<dyn CollectionSource>,
        snapshots: Arc<dyn SnapshotStore>,
        models: Arc<dyn ModelStore>,
    ) -> Self {
        Self {
            source,
            snapshots,
            models,
        }
    }

    /// Restores the selector-chosen subset of one backup.
    ///
    /// A missing backup or details record is fatal; individual item
    /// failures are counted and the run completes.
    pub async fn run(
        &self,
        backup_id: &str,
        selector: &Selector,
        cancel: CancellationToken,
    ) -> anyhow::Result<RestoreResults> {
        let started_at = Utc::now();

        let backup: Backup = get_model(self.models.as_ref(), BACKUP_SCHEMA, backup_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("backup {backup_id} not found"))?;
        let details: DetailsModel =
            get_model(self.models.as_ref(), DETAILS_SCHEMA, &backup.details_id)
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!("details {} for backup {backup_id} not found", backup.details_id)
                })?;

        let reduced = selector.reduce(&details);
        let paths: Vec<RepoPath> = reduced
            .items()
            .filter_map(|entry| RepoPath::from_escaped(&entry.repo_ref, true).ok())
            .collect();

        info!(
            backup_id,
            selected = paths.len(),
            of = details.items().count(),
            "Restoring selected items"
        );

        if paths.is_empty() {
            warn!(backup_id, "Selector matched no items; nothing to restore");
            let now = Utc::now();
            return Ok(RestoreResults {
                backup_id: backup_id.to_string(),
                items_requested: 0,
                items_written: 0,
                items_failed: 0,
                bytes_written: 0,
                started_at,
                completed_at: now,
                status: OpStatus::Completed,
            });
        }

        let collections = self
            .snapshots
            .restore_multiple_items(&backup.snapshot_id, &paths, cancel.clone())
            .await?;

        let counts = self
            .source
            .consume_restore_collections(collections, cancel)
            .await?;

        let status = if counts.items_failed > 0 {
            OpStatus::CompletedWithErrors
        } else {
            OpStatus::Completed
        };

        let results = RestoreResults {
            backup_id: backup_id.to_string(),
            items_requested: paths.len() as u64,
            items_written: counts.items_written,
            items_failed: counts.items_failed,
            bytes_written: counts.bytes_written,
            started_at,
            completed_at: Utc::now(),
            status,
        };

        info!(
            backup_id,
            written = results.items_written,
            failed = results.items_failed,
            status = %results.status,
            "Restore finished"
        );
        Ok(results)
    }
}
