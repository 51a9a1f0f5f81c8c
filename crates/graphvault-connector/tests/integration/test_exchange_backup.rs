//! End-to-end Exchange collection production against a mocked server

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

use graphvault_core::domain::backup::CategoryMetadata;
use graphvault_core::domain::collection::{Collection, CollectionState};
use graphvault_core::domain::path::Category;
use graphvault_core::ports::source::CollectionRequest;
use graphvault_connector::collections::parse_metadata_collections;
use graphvault_connector::exchange::produce_collections;

use crate::common::{client_for, empty_page, mount_json};

const TENANT: &str = "tenant";
const OWNER: &str = "u";

async fn mount_mailbox(server: &MockServer, folder_name: &str) {
    mount_json(
        server,
        "/users/u/mailFolders/msgfolderroot",
        serde_json::json!({"id": "root", "displayName": "root"}),
    )
    .await;
    mount_json(
        server,
        "/users/u/mailFolders/root/childFolders",
        serde_json::json!({
            "value": [{"id": "I", "displayName": folder_name, "parentFolderId": "root"}]
        }),
    )
    .await;
    mount_json(server, "/users/u/mailFolders/I/childFolders", empty_page()).await;
}

async fn mount_messages(server: &MockServer, ids: &[&str], delta_token: &str) {
    let delta_url = format!(
        "{}/users/u/mailFolders/I/messages/delta?$deltatoken={delta_token}",
        server.uri()
    );
    let value: Vec<_> = ids.iter().map(|id| serde_json::json!({"id": id})).collect();

    mount_json(
        server,
        "/users/u/mailFolders/I/messages/delta",
        serde_json::json!({ "value": value, "@odata.deltaLink": delta_url }),
    )
    .await;

    for id in ids {
        mount_json(
            server,
            &format!("/users/u/messages/{id}"),
            serde_json::json!({
                "id": id,
                "subject": format!("subject-{id}"),
                "sender": {"emailAddress": {"address": "sender@example.com"}},
                "receivedDateTime": "2026-05-01T09:00:00Z",
            }),
        )
        .await;
    }
}

fn request(prior: CategoryMetadata) -> CollectionRequest {
    CollectionRequest {
        tenant: TENANT.to_string(),
        owner: OWNER.to_string(),
        category: Category::Email,
        prior,
    }
}

async fn drain_ids(collection: &mut Box<dyn Collection>) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(mut rx) = collection.take_items() {
        while let Some(item) = rx.recv().await {
            ids.push(item.id);
        }
    }
    ids
}

#[tokio::test]
async fn test_fresh_backup_produces_folder_and_metadata() {
    let server = MockServer::start().await;
    mount_mailbox(&server, "Inbox").await;
    mount_messages(&server, &["m1", "m2"], "D1").await;

    let client = Arc::new(client_for(&server));
    let (statuses, mut status_rx) = mpsc::unbounded_channel();

    let collections = produce_collections(
        client,
        &request(CategoryMetadata::default()),
        statuses,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    // One folder collection plus the trailing metadata collection.
    assert_eq!(collections.len(), 2);

    let mut folder_collections = Vec::new();
    let mut metadata_collections = Vec::new();
    for collection in collections {
        if collection.full_path().unwrap().is_metadata() {
            metadata_collections.push(collection);
        } else {
            folder_collections.push(collection);
        }
    }

    let inbox = &mut folder_collections[0];
    assert_eq!(inbox.state(), CollectionState::New);
    assert_eq!(
        inbox.full_path().unwrap().to_string(),
        "tenant/exchange/u/email/Inbox"
    );
    assert_eq!(drain_ids(inbox).await, vec!["m1", "m2"]);

    // The folder's completion status arrives once production ends.
    let status = status_rx.recv().await.unwrap();
    assert!(status.is_complete);
    assert_eq!(status.items_processed + status.items_failed, 2);
    assert_eq!(status.items_failed, 0);

    let metadata = parse_metadata_collections(metadata_collections)
        .await
        .unwrap();
    assert!(metadata.deltas["I"].contains("$deltatoken=D1"));
    assert_eq!(metadata.paths["I"], "tenant/exchange/u/email/Inbox");
}

#[tokio::test]
async fn test_renamed_folder_is_moved_with_prior_path() {
    let server = MockServer::start().await;
    mount_mailbox(&server, "B").await;
    mount_messages(&server, &["m9"], "D2").await;

    let mut prior = CategoryMetadata::default();
    prior
        .paths
        .insert("I".to_string(), "tenant/exchange/u/email/Inbox/A".to_string());
    prior
        .deltas
        .insert("I".to_string(), format!("{}/users/u/mailFolders/I/messages/delta", server.uri()));

    let client = Arc::new(client_for(&server));
    let (statuses, _status_rx) = mpsc::unbounded_channel();

    let mut collections = produce_collections(
        client,
        &request(prior),
        statuses,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let moved = collections
        .iter_mut()
        .find(|c| {
            c.full_path()
                .map(|p| !p.is_metadata())
                .unwrap_or(false)
        })
        .unwrap();

    assert_eq!(moved.state(), CollectionState::Moved);
    assert_eq!(
        moved.full_path().unwrap().to_string(),
        "tenant/exchange/u/email/B"
    );
    assert_eq!(
        moved.previous_path().unwrap().to_string(),
        "tenant/exchange/u/email/Inbox/A"
    );
}

#[tokio::test]
async fn test_vanished_folder_leaves_tombstone() {
    let server = MockServer::start().await;
    mount_mailbox(&server, "Inbox").await;
    mount_messages(&server, &[], "D3").await;

    let mut prior = CategoryMetadata::default();
    prior.paths.insert(
        "ghost".to_string(),
        "tenant/exchange/u/email/Departed".to_string(),
    );

    let client = Arc::new(client_for(&server));
    let (statuses, _status_rx) = mpsc::unbounded_channel();

    let collections = produce_collections(
        client,
        &request(prior),
        statuses,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let tombstone = collections
        .iter()
        .find(|c| c.full_path().is_none())
        .expect("expected a tombstone for the vanished folder");

    assert_eq!(tombstone.state(), CollectionState::Deleted);
    assert_eq!(
        tombstone.previous_path().unwrap().to_string(),
        "tenant/exchange/u/email/Departed"
    );
}
