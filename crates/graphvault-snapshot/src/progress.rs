//! Upload progress and details assembly
//!
//! The recorder tracks in-flight items keyed by the uploader-supplied
//! path string. When an item lands, its details entry is appended and
//! the folder-entry chain above it is synthesised idempotently. A
//! single mutex guards all internal state; completion callbacks may
//! arrive from any upload task.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::warn;

use graphvault_core::domain::details::{DetailsEntry, DetailsModel, FolderInfo};
use graphvault_core::domain::item::ItemInfo;
use graphvault_core::domain::path::RepoPath;

/// Details pending for one in-flight item.
#[derive(Debug, Clone)]
pub struct ItemDetails {
    pub info: Option<ItemInfo>,
    pub repo_path: RepoPath,
}

#[derive(Debug, Default)]
struct RecorderInner {
    pending: HashMap<String, ItemDetails>,
    details: DetailsModel,
    /// Short-refs of folder entries already synthesised.
    folder_refs: HashSet<String>,
    total_bytes: u64,
    items_recorded: u64,
    items_failed: u64,
}

/// Concurrent-safe progress recorder for one snapshot upload.
#[derive(Debug, Default)]
pub struct ProgressRecorder {
    inner: Mutex<RecorderInner>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an item before its upload begins.
    pub fn put(&self, item_key: impl Into<String>, details: ItemDetails) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.insert(item_key.into(), details);
    }

    /// Marks an upload finished.
    ///
    /// On success the details entry is appended together with any
    /// missing ancestor folder entries; on failure the pending entry is
    /// dropped.
    pub fn finished_file(&self, item_key: &str, result: Result<(), &anyhow::Error>) {
        let mut inner = self.inner.lock().unwrap();

        let Some(details) = inner.pending.remove(item_key) else {
            warn!(item_key, "Finished an item that was never registered");
            return;
        };

        if let Err(err) = result {
            warn!(item_key, error = %err, "Dropping failed item from details");
            inner.items_failed += 1;
            return;
        }

        Self::synthesize_folders(&mut inner, &details.repo_path);

        let path = &details.repo_path;
        let parent_ref = match path.dir() {
            Ok(parent) => parent.short_ref(),
            Err(_) => String::new(),
        };

        inner.details.entries.push(DetailsEntry {
            repo_ref: path.to_string(),
            short_ref: path.short_ref(),
            parent_ref,
            info: details.info,
            folder: None,
        });
        inner.items_recorded += 1;
    }

    /// Accumulates hashed byte counts, success or not.
    pub fn finished_hashing(&self, _item_key: &str, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_bytes += bytes;
    }

    /// Consumes the recorder into its details document and counters.
    pub fn finish(self) -> (DetailsModel, RecorderStats) {
        let inner = self.inner.into_inner().unwrap();
        (
            inner.details,
            RecorderStats {
                total_bytes: inner.total_bytes,
                items_recorded: inner.items_recorded,
                items_failed: inner.items_failed,
                still_pending: inner.pending.len() as u64,
            },
        )
    }

    /// Creates one folder entry per path prefix, from the tenant root
    /// down to the item's parent. Entries are keyed by the prefix
    /// short-ref, so later items under the same folder reuse them.
    fn synthesize_folders(inner: &mut RecorderInner, item_path: &RepoPath) {
        let builder = item_path.to_builder();
        let depth = builder.len().saturating_sub(1);

        let mut parent_ref = String::new();
        for end in 1..=depth {
            let prefix = graphvault_core::domain::path::PathBuilder::from_segments(
                builder.elements()[..end].iter().cloned(),
            );
            let short_ref = prefix.short_ref();

            if inner.folder_refs.insert(short_ref.clone()) {
                let display_name = prefix.last().unwrap_or_default().to_string();
                inner.details.entries.push(DetailsEntry {
                    repo_ref: prefix.to_string(),
                    short_ref: short_ref.clone(),
                    parent_ref: parent_ref.clone(),
                    info: None,
                    folder: Some(FolderInfo { display_name }),
                });
            }
            parent_ref = short_ref;
        }
    }
}

/// Counters extracted when the recorder is consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub total_bytes: u64,
    pub items_recorded: u64,
    pub items_failed: u64,
    pub still_pending: u64,
}
