//! OneDrive enumeration and restore
//!
//! Drives expose a single delta stream for the whole hierarchy, so one
//! walk yields folders and files together. Folder entries feed the
//! container resolver; file entries are grouped by parent folder into
//! per-folder collections. The drive-wide delta token is stored under
//! the reserved [`DRIVE_DELTA_KEY`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use graphvault_core::domain::backup::CategoryMetadata;
use graphvault_core::domain::collection::{Collection, Status, StatusSender, StreamCollection};
use graphvault_core::domain::item::{ItemInfo, ItemStream, OneDriveInfo, SharePointInfo};
use graphvault_core::domain::path::{Category, PathBuilder, RepoPath, Service};
use graphvault_core::ports::source::{CollectionRequest, RestoreCounts};

use crate::client::GraphClient;
use crate::collections::metadata_collection;
use crate::delta::DeltaUpdate;
use crate::errors::ConnectorError;
use crate::resolver::{Container, ContainerResolver};

/// Metadata key holding the drive-wide delta URL.
pub const DRIVE_DELTA_KEY: &str = "root";

const DELTA: &str = "delta";
const ITEMS: &str = "items";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub last_modified_date_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub parent_reference: Option<ParentReference>,
    #[serde(default)]
    pub file: Option<serde_json::Value>,
    #[serde(default)]
    pub folder: Option<serde_json::Value>,
    #[serde(default)]
    pub deleted: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ParentReference {
    #[serde(default)]
    pub id: Option<String>,
}

impl DriveItem {
    fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct DriveDeltaPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveRoot {
    id: String,
}

// ============================================================================
// Delta walk
// ============================================================================

/// Walks a drive delta stream, deduplicating by item ID (later entries
/// replace earlier ones wholesale). Falls back to a tokenless walk on
/// an invalidated token.
pub(crate) async fn walk_drive_delta(
    client: &GraphClient,
    endpoint: &str,
    old_delta: Option<&str>,
) -> Result<(Vec<DriveItem>, DeltaUpdate), ConnectorError> {
    match walk_once(client, endpoint, old_delta).await {
        Ok((items, url)) => Ok((items, DeltaUpdate { url, reset: false })),
        Err(ConnectorError::InvalidDelta) if old_delta.is_some() => {
            warn!(endpoint, "Drive delta token rejected, re-enumerating from scratch");
            let (items, url) = walk_once(client, endpoint, None).await?;
            Ok((items, DeltaUpdate { url, reset: true }))
        }
        Err(other) => Err(other),
    }
}

async fn walk_once(
    client: &GraphClient,
    endpoint: &str,
    old_delta: Option<&str>,
) -> Result<(Vec<DriveItem>, String), ConnectorError> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, DriveItem> = HashMap::new();
    let mut url = old_delta.unwrap_or(endpoint).to_string();

    loop {
        let page: DriveDeltaPage = client.get_json(&url, DELTA).await?;

        for item in page.value {
            if !latest.contains_key(&item.id) {
                order.push(item.id.clone());
            }
            latest.insert(item.id.clone(), item);
        }

        if let Some(next) = page.next_link {
            url = next;
            continue;
        }

        let delta_url = page.delta_link.ok_or_else(|| {
            ConnectorError::NonRecoverable(anyhow::anyhow!(
                "drive delta for {endpoint} ended without a deltaLink"
            ))
        })?;

        let items = order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect();
        return Ok((items, delta_url));
    }
}

// ============================================================================
// Backup production
// ============================================================================

/// Enumerates a drive into per-folder collections.
///
/// `drive_base` is the Graph path of the drive (`/users/{o}/drive` or
/// `/sites/{o}/drive`); `service` decides the path namespace and the
/// item descriptor variant.
pub(crate) async fn produce_drive_collections(
    client: Arc<GraphClient>,
    request: &CollectionRequest,
    service: Service,
    drive_base: &str,
    statuses: StatusSender,
    cancel: CancellationToken,
) -> Result<Vec<Box<dyn Collection>>, ConnectorError> {
    let owner = &request.owner;
    let category = request.category;

    let root: DriveRoot = client
        .get_json(&format!("{drive_base}/root"), ITEMS)
        .await?;

    let old_delta = request.prior.deltas.get(DRIVE_DELTA_KEY).map(String::as_str);
    let (entries, update) =
        walk_drive_delta(&client, &format!("{drive_base}/root/delta"), old_delta).await?;

    if update.reset {
        debug!(owner, "Drive delta token was reset during enumeration");
    }

    // Folders feed the resolver; files group under their parent.
    let mut resolver = ContainerResolver::new();
    resolver.add_to_cache(Container::seeded(root.id.clone(), "root", PathBuilder::new()))?;

    let mut files_by_parent: HashMap<String, Vec<DriveItem>> = HashMap::new();
    let mut removed_by_parent: HashMap<String, Vec<String>> = HashMap::new();
    let mut deleted_ids: std::collections::HashSet<String> = std::collections::HashSet::new();

    for entry in entries {
        let parent = entry
            .parent_reference
            .as_ref()
            .and_then(|p| p.id.clone())
            .unwrap_or_else(|| root.id.clone());

        if entry.is_deleted() {
            deleted_ids.insert(entry.id.clone());
            removed_by_parent.entry(parent).or_default().push(entry.id);
        } else if entry.is_folder() {
            if entry.id != root.id {
                if let Err(err) =
                    resolver.add_to_cache(Container::new(entry.id, entry.name, parent))
                {
                    warn!(owner, error = %err, "Skipping invalid folder entry");
                }
            }
        } else {
            files_by_parent.entry(parent).or_default().push(entry);
        }
    }

    if let Err(errors) = resolver.populate_paths() {
        warn!(owner, %category, "{errors}");
    }

    info!(
        owner,
        %category,
        folders = resolver.len(),
        changed_files = files_by_parent.values().map(Vec::len).sum::<usize>(),
        "Drive delta resolved"
    );

    let mut collections: Vec<Box<dyn Collection>> = Vec::new();
    let mut new_metadata = CategoryMetadata::default();
    new_metadata
        .deltas
        .insert(DRIVE_DELTA_KEY.to_string(), update.url);

    let folders: Vec<(String, PathBuilder)> = resolver
        .containers()
        .filter_map(|c| c.path().map(|p| (c.id().to_string(), p.clone())))
        .collect();

    for (folder_id, folder_path) in folders {
        if cancel.is_cancelled() {
            break;
        }

        // The drive root itself holds items under an empty folder path;
        // address it by a literal "root" segment.
        let folder_builder = if folder_path.is_empty() {
            PathBuilder::new().append("root")
        } else {
            folder_path
        };

        let full_path = RepoPath::build(
            &request.tenant,
            owner,
            service,
            category,
            &folder_builder,
            None,
        )?;
        new_metadata
            .paths
            .insert(folder_id.clone(), full_path.to_string());

        let files = files_by_parent.remove(&folder_id).unwrap_or_default();
        let removed = removed_by_parent.remove(&folder_id).unwrap_or_default();
        let prev_path = request
            .prior
            .paths
            .get(&folder_id)
            .and_then(|s| RepoPath::from_escaped(s, false).ok());

        // Unchanged folders with no file churn still need a collection
        // when their path moved; otherwise skip the empty ones on
        // incremental runs.
        if files.is_empty() && removed.is_empty() && old_delta.is_some() {
            let moved = prev_path
                .as_ref()
                .map(|p| p != &full_path)
                .unwrap_or(false);
            if !moved {
                continue;
            }
        }

        let (collection, tx) = StreamCollection::new(full_path, prev_path);
        let collection = collection.with_excluded(removed);

        tokio::spawn(produce_file_items(
            client.clone(),
            service,
            drive_base.to_string(),
            category,
            files,
            tx,
            statuses.clone(),
            cancel.clone(),
        ));

        collections.push(Box::new(collection));
    }

    // Folders absent from an incremental delta are unchanged, not
    // deleted: keep their paths alive and stream any changed files
    // under them at the prior location.
    for (folder_id, prev_path_str) in &request.prior.paths {
        if resolver.get(folder_id).is_some() {
            continue;
        }

        let Ok(prev_path) = RepoPath::from_escaped(prev_path_str, false) else {
            continue;
        };

        if deleted_ids.contains(folder_id) {
            debug!(owner, folder_id, "Drive folder deleted since prior backup");
            collections.push(Box::new(StreamCollection::tombstone(prev_path)));
            continue;
        }

        new_metadata
            .paths
            .insert(folder_id.clone(), prev_path_str.clone());

        let files = files_by_parent.remove(folder_id).unwrap_or_default();
        let removed = removed_by_parent.remove(folder_id).unwrap_or_default();
        if files.is_empty() && removed.is_empty() {
            continue;
        }

        let (collection, tx) =
            StreamCollection::new(prev_path.clone(), Some(prev_path));
        let collection = collection.with_excluded(removed);

        tokio::spawn(produce_file_items(
            client.clone(),
            service,
            drive_base.to_string(),
            category,
            files,
            tx,
            statuses.clone(),
            cancel.clone(),
        ));

        collections.push(Box::new(collection));
    }

    for (parent, files) in files_by_parent {
        if !files.is_empty() {
            warn!(
                owner,
                parent,
                count = files.len(),
                "Dropping files under an unresolvable parent folder"
            );
        }
    }

    let meta_path = RepoPath::metadata(&request.tenant, owner, service, category)?;
    collections.push(Box::new(metadata_collection(
        meta_path,
        &new_metadata,
        &statuses,
    )?));

    Ok(collections)
}

async fn produce_file_items(
    client: Arc<GraphClient>,
    service: Service,
    drive_base: String,
    category: Category,
    files: Vec<DriveItem>,
    tx: mpsc::Sender<ItemStream>,
    statuses: StatusSender,
    cancel: CancellationToken,
) {
    let mut processed = 0u64;
    let mut failed = 0u64;
    let mut bytes = 0u64;
    let mut complete = true;

    for file in files {
        if cancel.is_cancelled() {
            complete = false;
            break;
        }

        let content_path = format!("{drive_base}/items/{}/content", file.id);
        match client.get_bytes(&content_path, ITEMS).await {
            Ok(payload) => {
                bytes += payload.len() as u64;
                processed += 1;

                let info = file_info(service, &file, payload.len() as u64);
                if tx
                    .send(ItemStream::from_bytes(file.id, info, payload))
                    .await
                    .is_err()
                {
                    complete = false;
                    break;
                }
            }
            Err(err) if err.is_recoverable() => {
                warn!(id = file.id, error = %err, "Skipping unreadable drive item");
                failed += 1;
            }
            Err(err) => {
                error!(id = file.id, error = %err, "Aborting drive item fetch");
                failed += 1;
                complete = false;
                break;
            }
        }
    }

    drop(tx);
    let _ = statuses.send(Status {
        object_type: category,
        items_processed: processed,
        items_failed: failed,
        bytes,
        is_complete: complete,
    });
}

fn file_info(service: Service, file: &DriveItem, size: u64) -> ItemInfo {
    match service {
        Service::SharePoint => ItemInfo::SharePoint(SharePointInfo {
            item_name: file.name.clone(),
            parent_path: String::new(),
            size,
        }),
        _ => ItemInfo::OneDrive(OneDriveInfo {
            item_name: file.name.clone(),
            parent_path: String::new(),
            size: file.size.unwrap_or(size),
            modified: file.last_modified_date_time,
        }),
    }
}

// ============================================================================
// Public entry points and restore
// ============================================================================

/// Enumerates a user's OneDrive into collections.
pub async fn produce_collections(
    client: Arc<GraphClient>,
    request: &CollectionRequest,
    statuses: StatusSender,
    cancel: CancellationToken,
) -> Result<Vec<Box<dyn Collection>>, ConnectorError> {
    let drive_base = format!("/users/{}/drive", request.owner);
    produce_drive_collections(
        client,
        request,
        Service::OneDrive,
        &drive_base,
        statuses,
        cancel,
    )
    .await
}

/// Replays restored file collections back into the drive under a
/// `Restored` subtree mirroring the original folder layout.
pub(crate) async fn restore_drive_collections(
    client: Arc<GraphClient>,
    drive_base_for: impl Fn(&str) -> String,
    collections: Vec<Box<dyn Collection>>,
    cancel: CancellationToken,
) -> Result<RestoreCounts, ConnectorError> {
    let mut counts = RestoreCounts::default();

    for mut collection in collections {
        if cancel.is_cancelled() {
            break;
        }

        let Some(path) = collection.full_path().cloned() else {
            continue;
        };
        if path.is_metadata() {
            continue;
        }

        let drive_base = drive_base_for(path.resource_owner());
        let folder = path.folder();

        let Some(mut rx) = collection.take_items() else {
            continue;
        };

        while let Some(mut item) = rx.recv().await {
            if cancel.is_cancelled() {
                break;
            }

            let mut payload = Vec::new();
            if let Err(err) = std::io::Read::read_to_end(&mut item.data, &mut payload) {
                warn!(id = item.id, error = %err, "Unreadable restored item");
                counts.items_failed += 1;
                continue;
            }

            let name = item
                .info
                .as_ref()
                .map(|i| i.display_name().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| item.id.clone());

            let upload_path =
                format!("{drive_base}/root:/Restored/{folder}/{name}:/content");

            match client.put_bytes(&upload_path, payload.clone(), ITEMS).await {
                Ok(()) => {
                    counts.items_written += 1;
                    counts.bytes_written += payload.len() as u64;
                }
                Err(err) => {
                    warn!(id = item.id, error = %err, "Drive item restore failed");
                    counts.items_failed += 1;
                }
            }
        }
    }

    Ok(counts)
}

/// Restores OneDrive collections for their owners.
pub async fn restore_collections(
    client: Arc<GraphClient>,
    collections: Vec<Box<dyn Collection>>,
    cancel: CancellationToken,
) -> Result<RestoreCounts, ConnectorError> {
    restore_drive_collections(
        client,
        |owner| format!("/users/{owner}/drive"),
        collections,
        cancel,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_item_facets() {
        let folder: DriveItem = serde_json::from_value(serde_json::json!({
            "id": "f1", "name": "Docs", "folder": {"childCount": 2},
            "parentReference": {"id": "root-id"}
        }))
        .unwrap();
        assert!(folder.is_folder());
        assert!(!folder.is_deleted());

        let tombstone: DriveItem = serde_json::from_value(serde_json::json!({
            "id": "x", "deleted": {"state": "deleted"}
        }))
        .unwrap();
        assert!(tombstone.is_deleted());
    }

    #[test]
    fn test_file_info_variant_follows_service() {
        let file: DriveItem = serde_json::from_value(serde_json::json!({
            "id": "i1", "name": "report.pdf", "size": 42,
        }))
        .unwrap();

        assert!(matches!(
            file_info(Service::OneDrive, &file, 42),
            ItemInfo::OneDrive(_)
        ));
        assert!(matches!(
            file_info(Service::SharePoint, &file, 42),
            ItemInfo::SharePoint(_)
        ));
    }

    #[test]
    fn test_drive_delta_page_parsing() {
        let json = r#"{
            "value": [
                {"id": "f1", "name": "Docs", "folder": {}},
                {"id": "i1", "name": "a.txt", "size": 3, "file": {},
                 "parentReference": {"id": "f1"}},
                {"id": "gone", "deleted": {}}
            ],
            "@odata.deltaLink": "https://graph.microsoft.com/v1.0/drive/root/delta?token=D"
        }"#;

        let page: DriveDeltaPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 3);
        assert!(page.delta_link.is_some());
    }
}
