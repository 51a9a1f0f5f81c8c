//! Backup details: the flat per-item index of a snapshot
//!
//! Details entries form a tree through `parent_ref`: item entries point
//! at their folder's short-ref, folder entries chain upward, and root
//! entries carry an empty `parent_ref`.

use serde::{Deserialize, Serialize};

use super::item::ItemInfo;

/// Folder decoration on a details entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderInfo {
    pub display_name: String,
}

/// One entry in a backup's details index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsEntry {
    /// Full escaped repository path of the entry.
    pub repo_ref: String,
    /// Stable short digest of `repo_ref`.
    pub short_ref: String,
    /// Short-ref of the containing folder; empty for roots.
    pub parent_ref: String,
    /// Item descriptor; absent on synthesised folder entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ItemInfo>,
    /// Folder decoration; present only on folder entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderInfo>,
}

impl DetailsEntry {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}

/// The serialisable details document stored alongside each backup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailsModel {
    pub entries: Vec<DetailsEntry>,
}

impl DetailsModel {
    /// Repo-refs of every entry, in order.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.repo_ref.as_str()).collect()
    }

    /// Item entries only (folder scaffolding skipped).
    pub fn items(&self) -> impl Iterator<Item = &DetailsEntry> {
        self.entries.iter().filter(|e| e.info.is_some())
    }
}
