//! Breadth-first container enumeration against a mocked Graph server

use wiremock::MockServer;

use graphvault_core::domain::path::{Category, PathBuilder};
use graphvault_connector::exchange::enumerate_containers;
use graphvault_connector::resolver::{Container, ContainerResolver};

use crate::common::{client_for, empty_page, mount_json};

#[tokio::test]
async fn test_bfs_walk_feeds_resolver() {
    let server = MockServer::start().await;

    mount_json(
        &server,
        "/users/u/mailFolders/root/childFolders",
        serde_json::json!({
            "value": [
                {"id": "A", "displayName": "Inbox", "parentFolderId": "root"},
                {"id": "B", "displayName": "Archive", "parentFolderId": "root"},
            ]
        }),
    )
    .await;
    mount_json(
        &server,
        "/users/u/mailFolders/A/childFolders",
        serde_json::json!({
            "value": [
                {"id": "C", "displayName": "Receipts", "parentFolderId": "A"},
            ]
        }),
    )
    .await;
    mount_json(&server, "/users/u/mailFolders/B/childFolders", empty_page()).await;
    mount_json(&server, "/users/u/mailFolders/C/childFolders", empty_page()).await;

    let client = client_for(&server);
    let mut resolver = ContainerResolver::new();
    resolver
        .add_to_cache(Container::seeded("root", "root", PathBuilder::new()))
        .unwrap();

    let errors = enumerate_containers(&client, "u", Category::Email, "root", |container| {
        resolver.add_to_cache(container)
    })
    .await
    .unwrap();
    assert!(errors.is_empty());

    resolver.populate_paths().unwrap();

    assert_eq!(resolver.len(), 4);
    assert_eq!(
        resolver.get("C").unwrap().path().unwrap().to_string(),
        "Inbox/Receipts"
    );
    assert_eq!(resolver.path_in_cache("Archive"), Some("B"));
}

#[tokio::test]
async fn test_paged_children_follow_next_links() {
    let server = MockServer::start().await;
    let page2_url = format!("{}/children-page-2", server.uri());

    mount_json(
        &server,
        "/users/u/mailFolders/root/childFolders",
        serde_json::json!({
            "value": [{"id": "A", "displayName": "One", "parentFolderId": "root"}],
            "@odata.nextLink": page2_url,
        }),
    )
    .await;
    mount_json(
        &server,
        "/children-page-2",
        serde_json::json!({
            "value": [{"id": "B", "displayName": "Two", "parentFolderId": "root"}]
        }),
    )
    .await;
    mount_json(&server, "/users/u/mailFolders/A/childFolders", empty_page()).await;
    mount_json(&server, "/users/u/mailFolders/B/childFolders", empty_page()).await;

    let client = client_for(&server);
    let mut seen = Vec::new();

    let errors = enumerate_containers(&client, "u", Category::Email, "root", |container| {
        seen.push(container.id().to_string());
        Ok(())
    })
    .await
    .unwrap();

    assert!(errors.is_empty());
    assert_eq!(seen, vec!["A", "B"]);
}

#[tokio::test]
async fn test_visit_errors_are_aggregated_not_fatal() {
    let server = MockServer::start().await;

    mount_json(
        &server,
        "/users/u/mailFolders/root/childFolders",
        serde_json::json!({
            "value": [
                // displayName missing: the visit callback rejects it.
                {"id": "bad", "parentFolderId": "root"},
                {"id": "good", "displayName": "Kept", "parentFolderId": "root"},
            ]
        }),
    )
    .await;
    mount_json(&server, "/users/u/mailFolders/bad/childFolders", empty_page()).await;
    mount_json(&server, "/users/u/mailFolders/good/childFolders", empty_page()).await;

    let client = client_for(&server);
    let mut resolver = ContainerResolver::new();
    resolver
        .add_to_cache(Container::seeded("root", "root", PathBuilder::new()))
        .unwrap();

    let errors = enumerate_containers(&client, "u", Category::Email, "root", |container| {
        resolver.add_to_cache(container)
    })
    .await
    .unwrap();

    assert_eq!(errors.len(), 1);
    assert!(resolver.get("good").is_some());
    assert!(resolver.get("bad").is_none());
}
