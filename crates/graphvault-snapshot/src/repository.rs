//! Content-addressed snapshot repository over an S3-compatible store
//!
//! Layout inside the bucket (under the configured prefix):
//! - `blobs/<sha256>` - version-prefixed item payloads, deduplicated
//! - `manifests/<snapshot-id>.json` - one manifest per backup run
//! - `models/<schema>/<id>.json` - model-store records (see `store`)
//!
//! Uploads drain collection channels; unchanged items of `Moved` and
//! `NotMoved` collections are carried forward from the prior manifest
//! by path without re-reading their content.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;

use anyhow::Context;
use chrono::{DateTime, Utc};
use opendal::services::S3;
use opendal::Operator;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use graphvault_core::config::RepoConfig;
use graphvault_core::domain::backup::Reason;
use graphvault_core::domain::collection::{Collection, CollectionState, StreamCollection};
use graphvault_core::domain::item::{ItemInfo, ItemStream};
use graphvault_core::domain::path::RepoPath;
use graphvault_core::ports::snapshot::{
    BackupOutcome, ManifestInfo, SnapshotStats, SnapshotStore,
};

use crate::builder::plan_backup;
use crate::progress::{ItemDetails, ProgressRecorder};
use crate::stream::{BackupStreamReader, RestoreStreamReader, SERIALIZATION_VERSION};
use crate::SnapshotError;

/// Marker object proving a repository was initialised.
const REPO_MARKER: &str = ".graphvault";

// ============================================================================
// Manifest model
// ============================================================================

/// One stored item: its repository path and content address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub path: String,
    pub blob: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ItemInfo>,
}

/// The persisted record of one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub reasons: Vec<Reason>,
    pub tags: BTreeMap<String, String>,
    pub completed_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn info(&self) -> ManifestInfo {
        ManifestInfo {
            id: self.id.clone(),
            reasons: self.reasons.clone(),
            tags: self.tags.clone(),
            completed_at: self.completed_at,
        }
    }
}

/// True when every tag filter entry matches and the manifest's reasons
/// intersect the queried set.
pub(crate) fn manifest_matches(
    manifest: &Manifest,
    reasons: &[Reason],
    tags: &BTreeMap<String, String>,
) -> bool {
    let tags_match = tags
        .iter()
        .all(|(k, v)| manifest.tags.get(k).map(String::as_str) == Some(v));
    let reasons_match = manifest.reasons.iter().any(|r| reasons.contains(r));
    tags_match && reasons_match
}

/// Keeps, per queried reason, the matching manifest with the latest
/// completion time; manifests covering several reasons appear once.
pub(crate) fn latest_per_reason(
    manifests: &[Manifest],
    reasons: &[Reason],
    tags: &BTreeMap<String, String>,
) -> Vec<Manifest> {
    let mut picked: Vec<&Manifest> = Vec::new();

    for reason in reasons {
        let best = manifests
            .iter()
            .filter(|m| manifest_matches(m, std::slice::from_ref(reason), tags))
            .max_by_key(|m| m.completed_at);

        if let Some(best) = best {
            if !picked.iter().any(|m| m.id == best.id) {
                picked.push(best);
            }
        }
    }

    picked.into_iter().cloned().collect()
}

// ============================================================================
// Repository
// ============================================================================

fn blob_key(hash: &str) -> String {
    format!("blobs/{hash}")
}

fn manifest_key(id: &str) -> String {
    format!("manifests/{id}.json")
}

/// The snapshot store facade, backed by an opendal S3 operator.
#[derive(Clone)]
pub struct SnapshotRepository {
    op: Operator,
}

impl SnapshotRepository {
    /// Builds the operator from the repo config. Storage credentials
    /// are read from the environment by the S3 service itself.
    pub fn open(config: &RepoConfig) -> anyhow::Result<Self> {
        let mut builder = S3::default()
            .bucket(&config.bucket)
            .root(&config.prefix)
            .region("us-east-1");

        if !config.endpoint.is_empty() {
            builder = builder.endpoint(&config.endpoint);
        }

        let op = Operator::new(builder)
            .context("configuring snapshot repository backend")?
            .finish();
        Ok(Self { op })
    }

    /// Wraps an existing operator (tests use a memory backend).
    pub fn with_operator(op: Operator) -> Self {
        Self { op }
    }

    /// The underlying operator, shared with the model store.
    pub fn operator(&self) -> Operator {
        self.op.clone()
    }

    async fn load_manifest(&self, id: &str) -> anyhow::Result<Manifest> {
        let key = manifest_key(id);
        if !self.op.exists(&key).await? {
            return Err(SnapshotError::NotFound(format!("snapshot {id}")).into());
        }

        let bytes = self.op.read(&key).await?.to_vec();
        serde_json::from_slice(&bytes).with_context(|| format!("parsing manifest {id}"))
    }

    async fn list_manifests(&self) -> anyhow::Result<Vec<Manifest>> {
        let mut manifests = Vec::new();
        for entry in self.op.list("manifests/").await? {
            if !entry.path().ends_with(".json") {
                continue;
            }
            let bytes = self.op.read(entry.path()).await?.to_vec();
            match serde_json::from_slice::<Manifest>(&bytes) {
                Ok(manifest) => manifests.push(manifest),
                Err(err) => warn!(path = entry.path(), error = %err, "Skipping unreadable manifest"),
            }
        }
        Ok(manifests)
    }

    /// Uploads one payload blob if its content address is new.
    async fn write_blob(&self, payload: &[u8]) -> anyhow::Result<String> {
        use sha2::{Digest, Sha256};
        let hash = hex::encode(Sha256::digest(payload));
        let key = blob_key(&hash);

        if !self.op.exists(&key).await? {
            self.op
                .write(&key, payload.to_vec())
                .await
                .with_context(|| format!("writing blob {hash}"))?;
        }
        Ok(hash)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for SnapshotRepository {
    async fn initialize(&self) -> anyhow::Result<()> {
        if !self.op.exists(REPO_MARKER).await? {
            self.op
                .write(REPO_MARKER, b"graphvault snapshot repository\n".to_vec())
                .await
                .context("writing repository marker")?;
            info!("Initialised snapshot repository");
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        // Object stores need no teardown; writes are already durable.
        Ok(())
    }

    async fn backup_collections(
        &self,
        collections: Vec<Box<dyn Collection>>,
        reasons: Vec<Reason>,
        tags: BTreeMap<String, String>,
        cancel: CancellationToken,
    ) -> anyhow::Result<BackupOutcome> {
        let plan = plan_backup(collections)?;

        // Prior manifests feed unchanged-item carry-forward by path.
        let all_manifests = self.list_manifests().await?;
        let prior = latest_per_reason(&all_manifests, &plan.reasons, &BTreeMap::new());
        let prev_entries: HashMap<String, ManifestEntry> = prior
            .into_iter()
            .flat_map(|m| m.entries)
            .map(|e| (e.path.clone(), e))
            .collect();

        let recorder = ProgressRecorder::new();
        let mut entries: Vec<ManifestEntry> = Vec::new();
        let mut stats = SnapshotStats::default();

        for mut planned in plan.collections {
            if cancel.is_cancelled() {
                anyhow::bail!("backup cancelled");
            }
            if planned.state == CollectionState::Deleted {
                // Prune: the prior path is simply not carried forward.
                continue;
            }

            let full_path = planned
                .collection
                .full_path()
                .ok_or(SnapshotError::MissingPath)?
                .clone();
            let mut seen_ids: HashSet<String> = HashSet::new();

            if let Some(mut rx) = planned.collection.take_items() {
                while let Some(item) = rx.recv().await {
                    if cancel.is_cancelled() {
                        anyhow::bail!("backup cancelled");
                    }

                    let item_path = full_path.append(&item.id, true)?;
                    let key = item_path.to_string();
                    seen_ids.insert(item.id.clone());

                    recorder.put(
                        &key,
                        ItemDetails {
                            info: item.info.clone(),
                            repo_path: item_path,
                        },
                    );

                    let mut payload = Vec::new();
                    let mut reader =
                        BackupStreamReader::new(SERIALIZATION_VERSION, item.data);
                    if let Err(err) = reader.read_to_end(&mut payload) {
                        let err = anyhow::Error::from(err);
                        recorder.finished_file(&key, Err(&err));
                        continue;
                    }

                    recorder.finished_hashing(&key, payload.len() as u64);

                    // Snapshot write failures are fatal for the run.
                    let hash = self.write_blob(&payload).await?;

                    recorder.finished_file(&key, Ok(()));
                    stats.items_written += 1;
                    stats.bytes_uploaded += payload.len() as u64;

                    entries.push(ManifestEntry {
                        path: key,
                        blob: hash,
                        size: payload.len() as u64,
                        info: item.info,
                    });
                }
            }

            // Unchanged items: sourced from the prior snapshot by path.
            if matches!(
                planned.state,
                CollectionState::Moved | CollectionState::NotMoved
            ) {
                let prev_path = planned
                    .collection
                    .previous_path()
                    .ok_or(SnapshotError::MissingPath)?;
                let prev_prefix = format!("{prev_path}/");
                let excluded: HashSet<&str> = planned
                    .collection
                    .excluded_items()
                    .iter()
                    .map(String::as_str)
                    .collect();

                for (path, prev_entry) in &prev_entries {
                    let Some(rest) = path.strip_prefix(&prev_prefix) else {
                        continue;
                    };
                    // Direct children only; deeper paths belong to
                    // other collections.
                    if rest.is_empty() || rest.contains('/') {
                        continue;
                    }

                    let Ok(prev_item) = RepoPath::from_escaped(path, true) else {
                        continue;
                    };
                    let Some(id) = prev_item.item() else {
                        continue;
                    };
                    if seen_ids.contains(id) || excluded.contains(id) {
                        continue;
                    }

                    let new_item_path = full_path.append(id, true)?;
                    let new_key = new_item_path.to_string();

                    recorder.put(
                        &new_key,
                        ItemDetails {
                            info: prev_entry.info.clone(),
                            repo_path: new_item_path,
                        },
                    );
                    recorder.finished_file(&new_key, Ok(()));
                    stats.items_carried += 1;

                    entries.push(ManifestEntry {
                        path: new_key,
                        blob: prev_entry.blob.clone(),
                        size: prev_entry.size,
                        info: prev_entry.info.clone(),
                    });
                }
            }
        }

        let snapshot_id = uuid::Uuid::new_v4().to_string();
        let manifest = Manifest {
            id: snapshot_id.clone(),
            reasons,
            tags,
            completed_at: Utc::now(),
            entries,
        };

        self.op
            .write(
                &manifest_key(&snapshot_id),
                serde_json::to_vec(&manifest).context("serialising manifest")?,
            )
            .await
            .context("writing manifest")?;

        let (details, recorder_stats) = recorder.finish();
        stats.read_errors = recorder_stats.items_failed;

        info!(
            snapshot_id,
            items = stats.items_written,
            carried = stats.items_carried,
            bytes = stats.bytes_uploaded,
            "Snapshot upload complete"
        );

        Ok(BackupOutcome {
            snapshot_id,
            details,
            stats,
        })
    }

    async fn restore_multiple_items(
        &self,
        snapshot_id: &str,
        paths: &[RepoPath],
        cancel: CancellationToken,
    ) -> anyhow::Result<Vec<Box<dyn Collection>>> {
        let manifest = self.load_manifest(snapshot_id).await?;
        let entry_map: HashMap<&str, &ManifestEntry> = manifest
            .entries
            .iter()
            .map(|e| (e.path.as_str(), e))
            .collect();

        // Group requested items by their containing folder.
        let mut groups: BTreeMap<String, Vec<ManifestEntry>> = BTreeMap::new();
        for path in paths {
            let key = path.to_string();
            match entry_map.get(key.as_str()) {
                Some(entry) => {
                    let dir = path.dir()?.to_string();
                    groups.entry(dir).or_default().push((*entry).clone());
                }
                None => {
                    warn!(path = key, "Requested item not present in snapshot");
                }
            }
        }

        let mut collections: Vec<Box<dyn Collection>> = Vec::new();
        for (dir, group) in groups {
            let folder = RepoPath::from_escaped(&dir, false)?;
            let (collection, tx) = StreamCollection::new(folder, None);
            collections.push(Box::new(collection));

            let op = self.op.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for entry in group {
                    if cancel.is_cancelled() {
                        break;
                    }

                    let id = match RepoPath::from_escaped(&entry.path, true) {
                        Ok(p) => p.item().unwrap_or_default().to_string(),
                        Err(_) => continue,
                    };

                    let raw = match op.read(&blob_key(&entry.blob)).await {
                        Ok(buffer) => buffer.to_vec(),
                        Err(err) => {
                            warn!(path = entry.path, error = %err, "Blob read failed");
                            continue;
                        }
                    };

                    // Verify and strip the version prefix; a mismatch
                    // is fatal for the item, not the restore.
                    let mut reader = RestoreStreamReader::new(
                        SERIALIZATION_VERSION,
                        std::io::Cursor::new(raw),
                    );
                    let mut payload = Vec::new();
                    if let Err(err) = reader.read_to_end(&mut payload) {
                        warn!(path = entry.path, error = %err, "Version check failed");
                        continue;
                    }

                    let item = match entry.info.clone() {
                        Some(info) => ItemStream::from_bytes(id, info, payload),
                        None => ItemStream::opaque(id, payload),
                    };
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
            });
        }

        debug!(
            snapshot_id,
            collections = collections.len(),
            "Restore collections prepared"
        );
        Ok(collections)
    }

    async fn fetch_prev_manifests(
        &self,
        reasons: &[Reason],
        tags: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<ManifestInfo>> {
        let manifests = self.list_manifests().await?;
        Ok(latest_per_reason(&manifests, reasons, tags)
            .into_iter()
            .map(|m| m.info())
            .collect())
    }
}
