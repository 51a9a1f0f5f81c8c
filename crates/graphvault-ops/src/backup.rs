//! The backup orchestrator
//!
//! One run: resolve the selector into (owner, category) units, discover
//! each unit's prior manifest, recover its delta/path metadata, fan the
//! units out to the connector on a task set, upload everything through
//! the snapshot store, and persist the backup record with its details
//! and results.
//!
//! Error policy: remote read failures aggregate into the results and
//! never halt the run; a failing unit is skipped whole. Snapshot write
//! failures abort the run. Invalid delta tokens never surface here at
//! all; the connector falls back locally.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use graphvault_core::domain::backup::{
    parse_metadata_collections, Backup, CategoryMetadata, Reason, Results, BACKUP_SCHEMA,
    DELTA_URLS_FILE, DETAILS_SCHEMA, PREVIOUS_PATH_FILE, TAG_BACKUP_CATEGORY, TAG_BACKUP_ID,
};
use graphvault_core::domain::collection::Collection;
use graphvault_core::domain::path::{Category, RepoPath, Service};
use graphvault_core::ports::model_store::put_model;
use graphvault_core::ports::source::CollectionRequest;
use graphvault_core::ports::{CollectionSource, ModelStore, SnapshotStore};
use graphvault_core::selectors::Selector;

/// Composes the ports into a runnable backup.
pub struct BackupOperation {
    source: Arc<dyn CollectionSource>,
    snapshots: Arc<dyn SnapshotStore>,
    models: Arc<dyn ModelStore>,
}

impl BackupOperation {
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

    /// Runs one backup for the selector and returns the persisted
    /// record. The record carries a backup ID and error counts even
    /// when parts of the run failed.
    pub async fn run(
        &self,
        selector: &Selector,
        cancel: CancellationToken,
    ) -> anyhow::Result<Backup> {
        let started_at = Utc::now();
        let backup_id = Uuid::new_v4().to_string();
        let mut results = Results::started(started_at);

        // Step 1: resolve the selector into concrete units.
        let owners = selector.included_owners();
        anyhow::ensure!(
            !owners.is_empty() && !owners.iter().any(|o| o == "*"),
            "backup requires concrete resource owners in the selector"
        );
        let categories = selector.included_categories();
        anyhow::ensure!(!categories.is_empty(), "selector names no data categories");

        let service = selector.service;
        let units: Vec<(String, Category)> = owners
            .iter()
            .flat_map(|owner| categories.iter().map(|c| (owner.clone(), *c)))
            .collect();
        let reasons: Vec<Reason> = units
            .iter()
            .map(|(owner, category)| Reason {
                resource_owner: owner.clone(),
                service,
                category: *category,
            })
            .collect();

        info!(
            backup_id,
            owners = owners.len(),
            categories = categories.len(),
            "Starting backup"
        );

        // Step 2: discover prior manifests per reason. A failure here
        // degrades to a full (fresh) backup rather than aborting.
        let mut manifest_by_reason: HashMap<Reason, String> = HashMap::new();
        match self
            .snapshots
            .fetch_prev_manifests(&reasons, &BTreeMap::new())
            .await
        {
            Ok(manifests) => {
                for manifest in manifests {
                    for reason in &manifest.reasons {
                        manifest_by_reason
                            .entry(reason.clone())
                            .or_insert_with(|| manifest.id.clone());
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "Prior manifest discovery failed; running full backup");
            }
        }

        // Steps 3 and 4: per unit, recover metadata and produce
        // collections on the task set.
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let mut tasks: JoinSet<
            Result<Vec<Box<dyn Collection>>, (String, Category, anyhow::Error)>,
        > = JoinSet::new();

        for (owner, category) in units {
            let reason = Reason {
                resource_owner: owner.clone(),
                service,
                category,
            };
            let manifest_id = manifest_by_reason.get(&reason).cloned();

            let source = self.source.clone();
            let snapshots = self.snapshots.clone();
            let tenant = selector.tenant.clone();
            let statuses = status_tx.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let prior = match manifest_id {
                    Some(id) => {
                        restore_category_metadata(
                            snapshots.as_ref(),
                            &id,
                            &tenant,
                            &owner,
                            service,
                            category,
                            cancel.clone(),
                        )
                        .await
                    }
                    None => CategoryMetadata::default(),
                };

                let request = CollectionRequest {
                    tenant,
                    owner: owner.clone(),
                    category,
                    prior,
                };
                source
                    .produce_backup_collections(request, statuses, cancel)
                    .await
                    .map_err(|err| (owner, category, err))
            });
        }
        drop(status_tx);

        let mut collections: Vec<Box<dyn Collection>> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(unit_collections)) => collections.extend(unit_collections),
                Ok(Err((owner, category, err))) => {
                    error!(owner, %category, error = %err, "Unit enumeration failed");
                    results.read_errors += 1;
                }
                Err(err) => {
                    error!(error = %err, "Enumeration task panicked");
                    results.read_errors += 1;
                }
            }
        }

        anyhow::ensure!(
            !collections.is_empty(),
            "no collections were produced; every unit failed"
        );

        // Step 5: upload. Snapshot write errors are fatal.
        let tags = BTreeMap::from([
            (TAG_BACKUP_ID.to_string(), backup_id.clone()),
            (
                TAG_BACKUP_CATEGORY.to_string(),
                categories
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        ]);
        let outcome = self
            .snapshots
            .backup_collections(collections, reasons.clone(), tags.clone(), cancel.clone())
            .await?;

        // Step 6: fold completion statuses into the results. Producers
        // have all finished once the upload drained their channels.
        while let Some(status) = status_rx.recv().await {
            results.items_read += status.items_processed;
            results.read_errors += status.items_failed;
            results.bytes_read += status.bytes;
            if !status.is_complete {
                debug!(%status, "Collection finished incomplete");
            }
        }

        results.items_written = outcome.stats.items_written + outcome.stats.items_carried;
        results.bytes_uploaded = outcome.stats.bytes_uploaded;
        results.read_errors += outcome.stats.read_errors;
        results.write_errors += outcome.stats.write_errors;
        results.resource_owners = owners.into_iter().collect();
        results.complete(Utc::now());

        // Step 7: persist details, then the backup record.
        let details_id = Uuid::new_v4().to_string();
        put_model(
            self.models.as_ref(),
            DETAILS_SCHEMA,
            &details_id,
            &outcome.details,
        )
        .await?;

        let backup = Backup {
            id: backup_id,
            snapshot_id: outcome.snapshot_id,
            details_id,
            reasons,
            completed_at: results.completed_at,
            started_at,
            tags,
            results,
        };
        put_model(self.models.as_ref(), BACKUP_SCHEMA, &backup.id, &backup).await?;

        info!(
            backup_id = backup.id,
            status = %backup.results.status,
            items_read = backup.results.items_read,
            items_written = backup.results.items_written,
            read_errors = backup.results.read_errors,
            "Backup finished"
        );
        Ok(backup)
    }
}

/// Recovers one category's delta tokens and folder paths from its prior
/// snapshot. Any failure, including a metadata protocol conflict, makes
/// this category start fresh rather than failing the run.
async fn restore_category_metadata(
    snapshots: &dyn SnapshotStore,
    manifest_id: &str,
    tenant: &str,
    owner: &str,
    service: Service,
    category: Category,
    cancel: CancellationToken,
) -> CategoryMetadata {
    let paths = match metadata_item_paths(tenant, owner, service, category) {
        Ok(paths) => paths,
        Err(err) => {
            warn!(owner, %category, error = %err, "Invalid metadata path");
            return CategoryMetadata::default();
        }
    };

    let collections = match snapshots
        .restore_multiple_items(manifest_id, &paths, cancel)
        .await
    {
        Ok(collections) => collections,
        Err(err) => {
            debug!(owner, %category, error = %err, "No prior metadata; starting fresh");
            return CategoryMetadata::default();
        }
    };

    match parse_metadata_collections(collections).await {
        Ok(metadata) => {
            debug!(
                owner,
                %category,
                folders = metadata.paths.len(),
                "Recovered prior metadata"
            );
            metadata
        }
        Err(err) => {
            warn!(owner, %category, error = %err, "Prior metadata unusable; starting fresh");
            CategoryMetadata::default()
        }
    }
}

fn metadata_item_paths(
    tenant: &str,
    owner: &str,
    service: Service,
    category: Category,
) -> anyhow::Result<Vec<RepoPath>> {
    let dir = RepoPath::metadata(tenant, owner, service, category)?;
    Ok(vec![
        dir.append(DELTA_URLS_FILE, true)?,
        dir.append(PREVIOUS_PATH_FILE, true)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_item_paths_live_under_the_reserved_dir() {
        let paths =
            metadata_item_paths("t", "u", Service::Exchange, Category::Email).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.is_metadata() && p.is_item()));
        assert_eq!(paths[0].item(), Some(DELTA_URLS_FILE));
        assert_eq!(paths[1].item(), Some(PREVIOUS_PATH_FILE));
    }
}
