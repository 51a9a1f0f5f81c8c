//! Exchange enumeration and restore (mail, contacts, events)
//!
//! Folder discovery walks child folders breadth-first through
//! next-links, feeding the container resolver. Each resolved folder
//! then gets a delta walk for its items, and a producer task streams
//! item payloads into the folder's collection channel.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use graphvault_core::domain::backup::CategoryMetadata;
use graphvault_core::domain::collection::{Collection, Status, StatusSender, StreamCollection};
use graphvault_core::domain::errors::MultiError;
use graphvault_core::domain::item::{ExchangeInfo, ItemInfo, ItemStream};
use graphvault_core::domain::path::{Category, RepoPath, Service};
use graphvault_core::ports::source::{CollectionRequest, RestoreCounts};

use crate::client::GraphClient;
use crate::collections::metadata_collection;
use crate::delta::{collect_folder_changes, visit_all_pages};
use crate::errors::ConnectorError;
use crate::resolver::{Container, ContainerResolver};

/// Well-known alias for the hidden mail folder root.
const MSG_FOLDER_ROOT: &str = "msgfolderroot";

/// Rate-limit categories.
const CONTAINERS: &str = "containers";
const ITEMS: &str = "items";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphFolder {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    parent_folder_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphCalendar {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedContainer {
    id: String,
}

// ============================================================================
// Endpoints
// ============================================================================

fn child_folders_endpoint(owner: &str, category: Category, folder_id: &str) -> String {
    match category {
        Category::Contacts => {
            format!("/users/{owner}/contactFolders/{folder_id}/childFolders?$top=200")
        }
        _ => format!("/users/{owner}/mailFolders/{folder_id}/childFolders?$top=200"),
    }
}

fn delta_endpoint(owner: &str, category: Category, folder_id: &str) -> String {
    match category {
        Category::Email => format!("/users/{owner}/mailFolders/{folder_id}/messages/delta"),
        Category::Contacts => {
            format!("/users/{owner}/contactFolders/{folder_id}/contacts/delta")
        }
        _ => format!("/users/{owner}/calendars/{folder_id}/events/delta"),
    }
}

fn item_endpoint(owner: &str, category: Category, item_id: &str) -> String {
    match category {
        Category::Email => format!("/users/{owner}/messages/{item_id}"),
        Category::Contacts => format!("/users/{owner}/contacts/{item_id}"),
        _ => format!("/users/{owner}/events/{item_id}"),
    }
}

// ============================================================================
// Container enumeration
// ============================================================================

/// Walks child folders breadth-first from `base_id`, invoking `visit`
/// for every folder found. Visit errors are aggregated; server errors
/// abort the walk.
pub async fn enumerate_containers<F>(
    client: &GraphClient,
    owner: &str,
    category: Category,
    base_id: &str,
    mut visit: F,
) -> Result<MultiError, ConnectorError>
where
    F: FnMut(Container) -> Result<(), ConnectorError>,
{
    let mut errors = MultiError::new();
    let mut queue = VecDeque::from([base_id.to_string()]);

    while let Some(folder_id) = queue.pop_front() {
        let endpoint = child_folders_endpoint(owner, category, &folder_id);
        let page_errors =
            visit_all_pages::<GraphFolder, _>(client, &endpoint, CONTAINERS, |folder| {
                queue.push_back(folder.id.clone());
                visit(Container::new(
                    folder.id,
                    folder.display_name.unwrap_or_default(),
                    folder.parent_folder_id.unwrap_or_else(|| folder_id.clone()),
                ))
            })
            .await?;
        errors.extend(page_errors);
    }

    Ok(errors)
}

/// Builds and populates the folder resolver for one (owner, category).
async fn build_resolver(
    client: &GraphClient,
    owner: &str,
    category: Category,
) -> Result<ContainerResolver, ConnectorError> {
    let mut resolver = ContainerResolver::new();

    match category {
        Category::Email => {
            // Seed the hidden root so traversal terminates there; its
            // own display name never appears in paths.
            let root: GraphFolder = client
                .get_json(
                    &format!("/users/{owner}/mailFolders/{MSG_FOLDER_ROOT}"),
                    CONTAINERS,
                )
                .await?;
            let root_id = root.id.clone();
            resolver.add_to_cache(Container::seeded(
                root.id,
                MSG_FOLDER_ROOT,
                graphvault_core::domain::path::PathBuilder::new(),
            ))?;

            let errors =
                enumerate_containers(client, owner, category, &root_id, |container| {
                    resolver.add_to_cache(container)
                })
                .await?;
            log_container_errors(owner, category, errors);
        }
        Category::Contacts => {
            // Top-level contact folders are roots; their children chain
            // through parent IDs.
            let mut roots = Vec::new();
            let errors = visit_all_pages::<GraphFolder, _>(
                client,
                &format!("/users/{owner}/contactFolders?$top=200"),
                CONTAINERS,
                |folder| {
                    let name = folder.display_name.unwrap_or_default();
                    roots.push(folder.id.clone());
                    resolver.add_to_cache(Container::seeded(
                        folder.id,
                        name.clone(),
                        graphvault_core::domain::path::PathBuilder::new().append(name),
                    ))
                },
            )
            .await?;
            log_container_errors(owner, category, errors);

            for root_id in roots {
                let errors =
                    enumerate_containers(client, owner, category, &root_id, |container| {
                        resolver.add_to_cache(container)
                    })
                    .await?;
                log_container_errors(owner, category, errors);
            }
        }
        _ => {
            // Calendars are a flat namespace.
            let errors = visit_all_pages::<GraphCalendar, _>(
                client,
                &format!("/users/{owner}/calendars?$top=200"),
                CONTAINERS,
                |calendar| {
                    let name = calendar.name.unwrap_or_default();
                    resolver.add_to_cache(Container::seeded(
                        calendar.id,
                        name.clone(),
                        graphvault_core::domain::path::PathBuilder::new().append(name),
                    ))
                },
            )
            .await?;
            log_container_errors(owner, category, errors);
        }
    }

    if let Err(errors) = resolver.populate_paths() {
        // Unresolvable folders are skipped, not fatal for the category.
        warn!(owner, %category, "{errors}");
    }

    Ok(resolver)
}

fn log_container_errors(owner: &str, category: Category, errors: MultiError) {
    if !errors.is_empty() {
        warn!(owner, %category, "{errors}");
    }
}

// ============================================================================
// Backup production
// ============================================================================

/// Enumerates one (owner, category) into streaming collections.
///
/// Emits one collection per resolved folder, tombstones for folders
/// that disappeared since the prior run, and the category's metadata
/// collection last. Item payloads are produced by spawned tasks feeding
/// the bounded collection channels.
pub async fn produce_collections(
    client: Arc<GraphClient>,
    request: &CollectionRequest,
    statuses: StatusSender,
    cancel: CancellationToken,
) -> Result<Vec<Box<dyn Collection>>, ConnectorError> {
    let owner = &request.owner;
    let category = request.category;
    let resolver = build_resolver(&client, owner, category).await?;

    info!(
        owner,
        %category,
        folders = resolver.len(),
        "Enumerating folder deltas"
    );

    let mut collections: Vec<Box<dyn Collection>> = Vec::new();
    let mut new_metadata = CategoryMetadata::default();

    let folders: Vec<(String, graphvault_core::domain::path::PathBuilder)> = resolver
        .containers()
        .filter_map(|c| c.path().map(|p| (c.id().to_string(), p.clone())))
        .filter(|(_, path)| !path.is_empty())
        .collect();

    for (folder_id, folder_path) in folders {
        if cancel.is_cancelled() {
            break;
        }

        let full_path = RepoPath::build(
            &request.tenant,
            owner,
            Service::Exchange,
            category,
            &folder_path,
            None,
        )?;
        let prev_path = request
            .prior
            .paths
            .get(&folder_id)
            .and_then(|s| RepoPath::from_escaped(s, false).ok());
        let old_delta = request.prior.deltas.get(&folder_id).map(String::as_str);

        let changes = match collect_folder_changes(
            &client,
            &delta_endpoint(owner, category, &folder_id),
            old_delta,
        )
        .await
        {
            Ok(changes) => changes,
            Err(err) => {
                // Enumeration failure is fatal for this folder only.
                error!(owner, %category, folder_id, error = %err, "Folder delta failed");
                let _ = statuses.send(Status {
                    object_type: category,
                    items_processed: 0,
                    items_failed: 1,
                    bytes: 0,
                    is_complete: false,
                });
                continue;
            }
        };

        if changes.update.reset {
            debug!(owner, folder_id, "Delta token was reset during enumeration");
        }

        new_metadata
            .deltas
            .insert(folder_id.clone(), changes.update.url.clone());
        new_metadata
            .paths
            .insert(folder_id.clone(), full_path.to_string());

        let (collection, tx) = StreamCollection::new(full_path, prev_path);
        let collection = collection.with_excluded(changes.removed);

        tokio::spawn(produce_items(
            client.clone(),
            owner.clone(),
            category,
            changes.added,
            tx,
            statuses.clone(),
            cancel.clone(),
        ));

        collections.push(Box::new(collection));
    }

    // Folders present last run but gone now leave tombstones so the
    // snapshot prunes their prior paths.
    for (folder_id, prev_path) in &request.prior.paths {
        if resolver.get(folder_id).is_none() {
            if let Ok(path) = RepoPath::from_escaped(prev_path, false) {
                debug!(owner, folder_id, "Folder deleted since prior backup");
                collections.push(Box::new(StreamCollection::tombstone(path)));
            }
        }
    }

    let meta_path = RepoPath::metadata(&request.tenant, owner, Service::Exchange, category)?;
    collections.push(Box::new(metadata_collection(
        meta_path,
        &new_metadata,
        &statuses,
    )?));

    Ok(collections)
}

/// Fetches item payloads for one folder and feeds the collection channel.
async fn produce_items(
    client: Arc<GraphClient>,
    owner: String,
    category: Category,
    ids: Vec<String>,
    tx: mpsc::Sender<ItemStream>,
    statuses: StatusSender,
    cancel: CancellationToken,
) {
    let mut processed = 0u64;
    let mut failed = 0u64;
    let mut bytes = 0u64;
    let mut complete = true;

    for id in ids {
        if cancel.is_cancelled() {
            complete = false;
            break;
        }

        match fetch_item(&client, &owner, category, &id).await {
            Ok((info, payload)) => {
                bytes += payload.len() as u64;
                processed += 1;
                if tx
                    .send(ItemStream::from_bytes(id, info, payload))
                    .await
                    .is_err()
                {
                    // Consumer hung up; stop producing.
                    complete = false;
                    break;
                }
            }
            Err(err) if err.is_recoverable() => {
                warn!(owner, %category, id, error = %err, "Skipping unreadable item");
                failed += 1;
            }
            Err(err) => {
                error!(owner, %category, id, error = %err, "Aborting folder item fetch");
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

/// Fetches one item and derives its descriptor from the payload.
async fn fetch_item(
    client: &GraphClient,
    owner: &str,
    category: Category,
    id: &str,
) -> Result<(ItemInfo, Vec<u8>), ConnectorError> {
    let value: serde_json::Value = client
        .get_json(&item_endpoint(owner, category, id), ITEMS)
        .await?;

    let info = extract_info(category, &value);
    let payload =
        serde_json::to_vec(&value).map_err(|e| ConnectorError::NonRecoverable(e.into()))?;
    Ok((info, payload))
}

fn string_at<'a>(value: &'a serde_json::Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(|v| v.as_str()).unwrap_or("")
}

fn extract_info(category: Category, value: &serde_json::Value) -> ItemInfo {
    let (sender, subject, received) = match category {
        Category::Email => (
            string_at(value, "/sender/emailAddress/address"),
            string_at(value, "/subject"),
            string_at(value, "/receivedDateTime"),
        ),
        Category::Contacts => (
            string_at(value, "/emailAddresses/0/address"),
            string_at(value, "/displayName"),
            string_at(value, "/lastModifiedDateTime"),
        ),
        _ => (
            string_at(value, "/organizer/emailAddress/address"),
            string_at(value, "/subject"),
            string_at(value, "/createdDateTime"),
        ),
    };

    ItemInfo::Exchange(ExchangeInfo {
        sender: sender.to_string(),
        subject: subject.to_string(),
        received: received.parse().unwrap_or_else(|_| chrono::Utc::now()),
    })
}

// ============================================================================
// Restore
// ============================================================================

fn create_container_endpoint(category: Category) -> &'static str {
    match category {
        Category::Email => "/mailFolders",
        Category::Contacts => "/contactFolders",
        _ => "/calendars",
    }
}

fn create_item_endpoint(owner: &str, category: Category, container_id: &str) -> String {
    match category {
        Category::Email => format!("/users/{owner}/mailFolders/{container_id}/messages"),
        Category::Contacts => {
            format!("/users/{owner}/contactFolders/{container_id}/contacts")
        }
        _ => format!("/users/{owner}/calendars/{container_id}/events"),
    }
}

/// Replays restored collections into the owner's mailbox.
///
/// Each collection gets a destination folder named after its leaf
/// folder segment; item payloads are posted into it. Per-item failures
/// are counted and skipped.
pub async fn restore_collections(
    client: Arc<GraphClient>,
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

        let owner = path.resource_owner().to_string();
        let category = path.category();
        let leaf = path
            .folder_segments()
            .last()
            .cloned()
            .unwrap_or_else(|| "Restored".to_string());

        let container_id = match create_destination(&client, &owner, category, &leaf).await {
            Ok(id) => id,
            Err(err) => {
                error!(owner, %category, folder = leaf, error = %err, "Destination folder creation failed");
                if let Some(mut rx) = collection.take_items() {
                    while let Some(_skipped) = rx.recv().await {
                        counts.items_failed += 1;
                    }
                }
                continue;
            }
        };

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

            match recreate_item(&client, &owner, category, &container_id, &payload).await {
                Ok(()) => {
                    counts.items_written += 1;
                    counts.bytes_written += payload.len() as u64;
                }
                Err(err) => {
                    warn!(id = item.id, error = %err, "Item restore failed");
                    counts.items_failed += 1;
                }
            }
        }
    }

    Ok(counts)
}

async fn create_destination(
    client: &GraphClient,
    owner: &str,
    category: Category,
    display_name: &str,
) -> Result<String, ConnectorError> {
    let endpoint = format!("/users/{owner}{}", create_container_endpoint(category));
    let body = match category {
        Category::Email | Category::Contacts => {
            serde_json::json!({ "displayName": display_name })
        }
        _ => serde_json::json!({ "name": display_name }),
    };

    let created: CreatedContainer = client.post_json(&endpoint, body, CONTAINERS).await?;
    Ok(created.id)
}

async fn recreate_item(
    client: &GraphClient,
    owner: &str,
    category: Category,
    container_id: &str,
    payload: &[u8],
) -> Result<(), ConnectorError> {
    let mut value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| ConnectorError::NonRecoverable(e.into()))?;

    // Strip server-owned fields before re-creation.
    if let Some(object) = value.as_object_mut() {
        object.retain(|key, _| key != "id" && !key.starts_with("@odata"));
    }

    let _: serde_json::Value = client
        .post_json(
            &create_item_endpoint(owner, category, container_id),
            value,
            ITEMS,
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_endpoints_per_category() {
        assert_eq!(
            delta_endpoint("u", Category::Email, "f1"),
            "/users/u/mailFolders/f1/messages/delta"
        );
        assert_eq!(
            delta_endpoint("u", Category::Contacts, "f1"),
            "/users/u/contactFolders/f1/contacts/delta"
        );
        assert_eq!(
            delta_endpoint("u", Category::Events, "c1"),
            "/users/u/calendars/c1/events/delta"
        );
    }

    #[test]
    fn test_extract_mail_info() {
        let value = serde_json::json!({
            "sender": {"emailAddress": {"address": "a@b.c"}},
            "subject": "hello",
            "receivedDateTime": "2026-03-01T10:00:00Z",
        });

        let ItemInfo::Exchange(info) = extract_info(Category::Email, &value) else {
            panic!("expected exchange info");
        };
        assert_eq!(info.sender, "a@b.c");
        assert_eq!(info.subject, "hello");
        assert_eq!(info.received.to_rfc3339(), "2026-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_extract_contact_info() {
        let value = serde_json::json!({
            "displayName": "Ada Lovelace",
            "emailAddresses": [{"address": "ada@example.com"}],
            "lastModifiedDateTime": "2026-01-01T00:00:00Z",
        });

        let ItemInfo::Exchange(info) = extract_info(Category::Contacts, &value) else {
            panic!("expected exchange info");
        };
        assert_eq!(info.subject, "Ada Lovelace");
        assert_eq!(info.sender, "ada@example.com");
    }

    #[test]
    fn test_extract_info_tolerates_missing_fields() {
        let value = serde_json::json!({});
        let ItemInfo::Exchange(info) = extract_info(Category::Email, &value) else {
            panic!("expected exchange info");
        };
        assert_eq!(info.sender, "");
        assert_eq!(info.subject, "");
    }
}
