//! Backup records, reasons, results, and per-category metadata
//!
//! A [`Backup`] is the persisted record of one run, stored in the model
//! store under [`BACKUP_SCHEMA`] and pointing at its snapshot and
//! details documents. [`Reason`] tuples tag snapshots so later runs can
//! find the right predecessor per (owner, service, category).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::path::{Category, Service};

/// Model-store schema for backup records.
pub const BACKUP_SCHEMA: &str = "backup";

/// Model-store schema for details documents.
pub const DETAILS_SCHEMA: &str = "backupDetails";

/// Manifest tag carrying the backed-up category.
pub const TAG_BACKUP_CATEGORY: &str = "backup-category";

/// Manifest tag carrying the backup record ID.
pub const TAG_BACKUP_ID: &str = "backup-id";

/// Fixed name of the delta-token metadata item.
pub const DELTA_URLS_FILE: &str = "deltaURLs";

/// Fixed name of the previous-path metadata item.
pub const PREVIOUS_PATH_FILE: &str = "previousPath";

/// Locator tuple for prior-manifest discovery and snapshot tagging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reason {
    pub resource_owner: String,
    pub service: Service,
    pub category: Category,
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.resource_owner, self.service, self.category
        )
    }
}

/// Terminal and in-flight operation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpStatus {
    InProgress,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl Display for OpStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpStatus::InProgress => "In Progress",
            OpStatus::Completed => "Completed",
            OpStatus::CompletedWithErrors => "Completed With Errors",
            OpStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Accounting for one backup or restore run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    pub items_read: u64,
    pub items_written: u64,
    pub bytes_read: u64,
    pub bytes_uploaded: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub resource_owners: BTreeSet<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: OpStatus,
}

impl Results {
    /// Fresh in-progress accounting, stamped with the start time.
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            items_read: 0,
            items_written: 0,
            bytes_read: 0,
            bytes_uploaded: 0,
            read_errors: 0,
            write_errors: 0,
            resource_owners: BTreeSet::new(),
            started_at: at,
            completed_at: None,
            status: OpStatus::InProgress,
        }
    }

    /// Seals the results, deriving the terminal status from error counts.
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
        self.status = if self.write_errors > 0 {
            OpStatus::Failed
        } else if self.read_errors > 0 {
            OpStatus::CompletedWithErrors
        } else {
            OpStatus::Completed
        };
    }
}

/// Persisted record of one backup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub id: String,
    pub snapshot_id: String,
    pub details_id: String,
    pub reasons: Vec<Reason>,
    pub results: Results,
    pub tags: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-category incremental state carried between runs.
///
/// Both maps key by folder ID. Serialised as two JSON items named
/// [`DELTA_URLS_FILE`] and [`PREVIOUS_PATH_FILE`] inside the category's
/// reserved metadata collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMetadata {
    pub deltas: HashMap<String, String>,
    pub paths: HashMap<String, String>,
}

impl CategoryMetadata {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.paths.is_empty()
    }
}

/// Recovers [`CategoryMetadata`] from collections restored at the
/// reserved metadata path.
///
/// Seeing the same metadata file name twice within one category is a
/// protocol error; unknown file names are skipped.
pub async fn parse_metadata_collections(
    collections: Vec<Box<dyn crate::domain::collection::Collection>>,
) -> Result<CategoryMetadata, super::errors::DomainError> {
    use std::io::Read;

    let mut deltas = None;
    let mut paths = None;

    for mut collection in collections {
        let Some(mut rx) = collection.take_items() else {
            continue;
        };

        while let Some(mut item) = rx.recv().await {
            let mut bytes = Vec::new();
            item.data.read_to_end(&mut bytes).map_err(|e| {
                super::errors::DomainError::ValidationFailed(format!(
                    "reading metadata item {}: {e}",
                    item.id
                ))
            })?;

            let slot = match item.id.as_str() {
                DELTA_URLS_FILE => &mut deltas,
                PREVIOUS_PATH_FILE => &mut paths,
                _ => continue,
            };

            if slot.is_some() {
                return Err(super::errors::DomainError::MetadataConflict(item.id));
            }

            let map: HashMap<String, String> =
                serde_json::from_slice(&bytes).map_err(|e| {
                    super::errors::DomainError::ValidationFailed(format!(
                        "parsing metadata item {}: {e}",
                        item.id
                    ))
                })?;
            *slot = Some(map);
        }
    }

    Ok(CategoryMetadata {
        deltas: deltas.unwrap_or_default(),
        paths: paths.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_status_transitions() {
        let start = Utc::now();
        let mut results = Results::started(start);
        assert_eq!(results.status, OpStatus::InProgress);

        results.complete(Utc::now());
        assert_eq!(results.status, OpStatus::Completed);

        let mut with_reads = Results::started(start);
        with_reads.read_errors = 2;
        with_reads.complete(Utc::now());
        assert_eq!(with_reads.status, OpStatus::CompletedWithErrors);

        let mut with_writes = Results::started(start);
        with_writes.read_errors = 1;
        with_writes.write_errors = 1;
        with_writes.complete(Utc::now());
        assert_eq!(with_writes.status, OpStatus::Failed);
    }

    #[test]
    fn test_reason_serde_uses_lowercase_names() {
        let reason = Reason {
            resource_owner: "u@x.y".to_string(),
            service: Service::Exchange,
            category: Category::Email,
        };

        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"exchange\""));
        assert!(json.contains("\"email\""));

        let back: Reason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);
    }

    #[test]
    fn test_metadata_round_trip_with_hostile_values() {
        let mut metadata = CategoryMetadata::default();
        metadata
            .deltas
            .insert("folder-1".to_string(), "line\nbreak\tand\\slash".to_string());
        metadata
            .paths
            .insert("folder-1".to_string(), "quoted \"path\" here".to_string());

        let json = serde_json::to_vec(&metadata).unwrap();
        let back: CategoryMetadata = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn test_backup_serde_round_trip() {
        let now = Utc::now();
        let backup = Backup {
            id: "b-1".to_string(),
            snapshot_id: "s-1".to_string(),
            details_id: "d-1".to_string(),
            reasons: vec![Reason {
                resource_owner: "u".to_string(),
                service: Service::OneDrive,
                category: Category::Files,
            }],
            results: Results::started(now),
            tags: BTreeMap::from([(TAG_BACKUP_ID.to_string(), "b-1".to_string())]),
            started_at: now,
            completed_at: None,
        };

        let json = serde_json::to_string(&backup).unwrap();
        let back: Backup = serde_json::from_str(&json).unwrap();
        assert_eq!(back, backup);
    }
}
