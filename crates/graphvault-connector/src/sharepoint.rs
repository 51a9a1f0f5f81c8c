//! SharePoint enumeration and restore (document libraries and lists)
//!
//! A site's default document library is a drive, so library backup
//! reuses the drive delta machinery with the site as resource owner.
//! Lists have no delta endpoint; every run enumerates them fully.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use graphvault_core::domain::backup::CategoryMetadata;
use graphvault_core::domain::collection::{Collection, Status, StatusSender, StreamCollection};
use graphvault_core::domain::item::{ItemStream, SharePointInfo};
use graphvault_core::domain::path::{Category, PathBuilder, RepoPath, Service};
use graphvault_core::ports::source::{CollectionRequest, RestoreCounts};

use crate::client::GraphClient;
use crate::collections::metadata_collection;
use crate::delta::visit_all_pages;
use crate::errors::ConnectorError;
use crate::onedrive::{produce_drive_collections, restore_drive_collections};

const ITEMS: &str = "items";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SiteList {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    id: String,
    #[serde(default)]
    fields: Option<serde_json::Value>,
}

/// Enumerates a site's libraries or lists into collections.
pub async fn produce_collections(
    client: Arc<GraphClient>,
    request: &CollectionRequest,
    statuses: StatusSender,
    cancel: CancellationToken,
) -> Result<Vec<Box<dyn Collection>>, ConnectorError> {
    match request.category {
        Category::Libraries => {
            let drive_base = format!("/sites/{}/drive", request.owner);
            produce_drive_collections(
                client,
                request,
                Service::SharePoint,
                &drive_base,
                statuses,
                cancel,
            )
            .await
        }
        _ => produce_list_collections(client, request, statuses, cancel).await,
    }
}

/// Full (non-incremental) enumeration of the site's lists.
async fn produce_list_collections(
    client: Arc<GraphClient>,
    request: &CollectionRequest,
    statuses: StatusSender,
    cancel: CancellationToken,
) -> Result<Vec<Box<dyn Collection>>, ConnectorError> {
    let owner = &request.owner;
    let mut lists = Vec::new();

    let errors = visit_all_pages::<SiteList, _>(
        &client,
        &format!("/sites/{owner}/lists?$top=200"),
        ITEMS,
        |list| {
            lists.push(list);
            Ok(())
        },
    )
    .await?;
    if !errors.is_empty() {
        warn!(owner, "{errors}");
    }

    let mut collections: Vec<Box<dyn Collection>> = Vec::new();
    let mut new_metadata = CategoryMetadata::default();

    for list in lists {
        if cancel.is_cancelled() {
            break;
        }

        let name = list.display_name.unwrap_or_else(|| list.id.clone());
        let full_path = RepoPath::build(
            &request.tenant,
            owner,
            Service::SharePoint,
            Category::Lists,
            &PathBuilder::new().append(name.clone()),
            None,
        )?;
        new_metadata
            .paths
            .insert(list.id.clone(), full_path.to_string());

        let prev_path = request
            .prior
            .paths
            .get(&list.id)
            .and_then(|s| RepoPath::from_escaped(s, false).ok());

        let (collection, tx) = StreamCollection::new(full_path, prev_path);
        collections.push(Box::new(collection));

        let client = client.clone();
        let owner = owner.clone();
        let statuses = statuses.clone();
        let cancel = cancel.clone();
        let list_id = list.id;
        let list_name = name;

        tokio::spawn(async move {
            let mut processed = 0u64;
            let mut bytes = 0u64;
            let mut complete = true;

            // Page through the list first; items stream out afterwards
            // through the bounded channel.
            let mut items = Vec::new();
            let walk = visit_all_pages::<ListItem, _>(
                &client,
                &format!("/sites/{owner}/lists/{list_id}/items?expand=fields&$top=200"),
                ITEMS,
                |item| {
                    items.push(item);
                    Ok(())
                },
            )
            .await;

            if let Err(err) = walk {
                warn!(error = %err, "List item enumeration failed");
                complete = false;
            }

            for item in items {
                if cancel.is_cancelled() {
                    complete = false;
                    break;
                }

                let payload =
                    serde_json::to_vec(&item.fields.unwrap_or_default()).unwrap_or_default();
                bytes += payload.len() as u64;

                let info = SharePointInfo {
                    item_name: item.id.clone(),
                    parent_path: list_name.clone(),
                    size: payload.len() as u64,
                };

                if tx
                    .send(ItemStream::from_bytes(
                        item.id,
                        graphvault_core::domain::item::ItemInfo::SharePoint(info),
                        payload,
                    ))
                    .await
                    .is_err()
                {
                    complete = false;
                    break;
                }
                processed += 1;
            }

            drop(tx);
            let _ = statuses.send(Status {
                object_type: Category::Lists,
                items_processed: processed,
                items_failed: 0,
                bytes,
                is_complete: complete,
            });
        });
    }

    let meta_path = RepoPath::metadata(
        &request.tenant,
        owner,
        Service::SharePoint,
        Category::Lists,
    )?;
    collections.push(Box::new(metadata_collection(
        meta_path,
        &new_metadata,
        &statuses,
    )?));

    Ok(collections)
}

/// Restores SharePoint collections; libraries replay into the site
/// drive, list items are re-created through the lists endpoint.
pub async fn restore_collections(
    client: Arc<GraphClient>,
    collections: Vec<Box<dyn Collection>>,
    cancel: CancellationToken,
) -> Result<RestoreCounts, ConnectorError> {
    // Split by category: libraries go through the drive path.
    let mut library_collections = Vec::new();
    let mut counts = RestoreCounts::default();

    for mut collection in collections {
        let Some(path) = collection.full_path().cloned() else {
            continue;
        };
        if path.is_metadata() {
            continue;
        }

        if path.category() == Category::Libraries {
            library_collections.push(collection);
            continue;
        }

        // List items: re-create fields under the original list.
        let owner = path.resource_owner().to_string();
        let list_name = path.folder();

        let Some(mut rx) = collection.take_items() else {
            continue;
        };

        while let Some(mut item) = rx.recv().await {
            if cancel.is_cancelled() {
                break;
            }

            let mut payload = Vec::new();
            if let Err(err) = std::io::Read::read_to_end(&mut item.data, &mut payload) {
                warn!(id = item.id, error = %err, "Unreadable restored list item");
                counts.items_failed += 1;
                continue;
            }

            let fields: serde_json::Value =
                serde_json::from_slice(&payload).unwrap_or_default();
            let body = serde_json::json!({ "fields": fields });

            let result: Result<serde_json::Value, _> = client
                .post_json(
                    &format!("/sites/{owner}/lists/{list_name}/items"),
                    body,
                    ITEMS,
                )
                .await;

            match result {
                Ok(_) => {
                    counts.items_written += 1;
                    counts.bytes_written += payload.len() as u64;
                }
                Err(err) => {
                    warn!(id = item.id, error = %err, "List item restore failed");
                    counts.items_failed += 1;
                }
            }
        }
    }

    let drive_counts = restore_drive_collections(
        client,
        |owner| format!("/sites/{owner}/drive"),
        library_collections,
        cancel,
    )
    .await?;

    counts.items_written += drive_counts.items_written;
    counts.items_failed += drive_counts.items_failed;
    counts.bytes_written += drive_counts.bytes_written;
    Ok(counts)
}
