//! Snapshot store port
//!
//! The facade over the content-addressed snapshot engine. The core
//! treats uploads, restores, and manifest queries as a black box; the
//! snapshot crate provides the object-store-backed implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::backup::Reason;
use crate::domain::collection::Collection;
use crate::domain::details::DetailsModel;
use crate::domain::path::RepoPath;

/// Summary of a stored snapshot manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestInfo {
    pub id: String,
    pub reasons: Vec<Reason>,
    pub tags: BTreeMap<String, String>,
    pub completed_at: DateTime<Utc>,
}

/// Upload-side counters from one `backup_collections` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub items_written: u64,
    pub bytes_uploaded: u64,
    /// Items whose payload stream failed mid-read and were dropped.
    pub read_errors: u64,
    pub write_errors: u64,
    /// Items sourced unchanged from the prior snapshot.
    pub items_carried: u64,
}

/// Result of uploading one set of collections.
#[derive(Debug)]
pub struct BackupOutcome {
    pub snapshot_id: String,
    pub details: DetailsModel,
    pub stats: SnapshotStats,
}

/// Port trait for the snapshot repository facade.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Verifies the backing store is reachable and lays down any
    /// bootstrap state.
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Flushes and releases the backing store.
    async fn close(&self) -> anyhow::Result<()>;

    /// Inflates the collections into a snapshot tree, uploads it, and
    /// returns the new snapshot ID with its details and stats.
    async fn backup_collections(
        &self,
        collections: Vec<Box<dyn Collection>>,
        reasons: Vec<Reason>,
        tags: BTreeMap<String, String>,
        cancel: CancellationToken,
    ) -> anyhow::Result<BackupOutcome>;

    /// Streams the named item paths out of a snapshot as collections,
    /// grouped by containing folder.
    async fn restore_multiple_items(
        &self,
        snapshot_id: &str,
        paths: &[RepoPath],
        cancel: CancellationToken,
    ) -> anyhow::Result<Vec<Box<dyn Collection>>>;

    /// Finds prior manifests. A manifest matches when every entry of
    /// `tags` matches and its reasons intersect `reasons`; only the
    /// latest match per reason (by completion time) is returned.
    async fn fetch_prev_manifests(
        &self,
        reasons: &[Reason],
        tags: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<ManifestInfo>>;
}
