//! Delta enumeration against a mocked Graph server

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use graphvault_connector::delta::collect_folder_changes;
use graphvault_connector::ConnectorError;

use crate::common::{client_for, mount_json};

const DELTA_PATH: &str = "/users/u/mailFolders/I/messages/delta";

#[tokio::test]
async fn test_single_page_enumeration() {
    let server = MockServer::start().await;
    let delta_url = format!("{}{}?$deltatoken=D1", server.uri(), DELTA_PATH);

    mount_json(
        &server,
        DELTA_PATH,
        serde_json::json!({
            "value": [{"id": "m1"}, {"id": "m2"}],
            "@odata.deltaLink": delta_url,
        }),
    )
    .await;

    let client = client_for(&server);
    let changes = collect_folder_changes(&client, DELTA_PATH, None)
        .await
        .unwrap();

    assert_eq!(changes.added, vec!["m1", "m2"]);
    assert!(changes.removed.is_empty());
    assert_eq!(changes.update.url, delta_url);
    assert!(!changes.update.reset);
}

#[tokio::test]
async fn test_pagination_follows_next_links() {
    let server = MockServer::start().await;
    let page2_url = format!("{}/delta-page-2", server.uri());
    let delta_url = format!("{}{}?$deltatoken=D2", server.uri(), DELTA_PATH);

    mount_json(
        &server,
        DELTA_PATH,
        serde_json::json!({
            "value": [{"id": "m1"}],
            "@odata.nextLink": page2_url,
        }),
    )
    .await;
    mount_json(
        &server,
        "/delta-page-2",
        serde_json::json!({
            "value": [
                {"id": "m2"},
                {"id": "gone", "@removed": {"reason": "deleted"}},
            ],
            "@odata.deltaLink": delta_url,
        }),
    )
    .await;

    let client = client_for(&server);
    let changes = collect_folder_changes(&client, DELTA_PATH, None)
        .await
        .unwrap();

    assert_eq!(changes.added, vec!["m1", "m2"]);
    assert_eq!(changes.removed, vec!["gone"]);
    assert_eq!(changes.update.url, delta_url);
}

#[tokio::test]
async fn test_duplicate_across_pages_last_writer_wins() {
    let server = MockServer::start().await;
    let page2_url = format!("{}/delta-page-2", server.uri());
    let delta_url = format!("{}{}?$deltatoken=D3", server.uri(), DELTA_PATH);

    mount_json(
        &server,
        DELTA_PATH,
        serde_json::json!({
            "value": [{"id": "m1"}, {"id": "m2"}],
            "@odata.nextLink": page2_url,
        }),
    )
    .await;
    mount_json(
        &server,
        "/delta-page-2",
        serde_json::json!({
            "value": [{"id": "m1", "@removed": {"reason": "deleted"}}],
            "@odata.deltaLink": delta_url,
        }),
    )
    .await;

    let client = client_for(&server);
    let changes = collect_folder_changes(&client, DELTA_PATH, None)
        .await
        .unwrap();

    assert_eq!(changes.added, vec!["m2"]);
    assert_eq!(changes.removed, vec!["m1"]);
}

#[tokio::test]
async fn test_invalid_delta_falls_back_to_full_enumeration() {
    let server = MockServer::start().await;
    let stale_url = format!("{}/stale-delta", server.uri());
    let fresh_url = format!("{}{}?$deltatoken=D2", server.uri(), DELTA_PATH);

    // The stale token is rejected with 410 Gone.
    Mock::given(method("GET"))
        .and(path("/stale-delta"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    // The tokenless walk succeeds.
    mount_json(
        &server,
        DELTA_PATH,
        serde_json::json!({
            "value": [{"id": "m1"}],
            "@odata.deltaLink": fresh_url,
        }),
    )
    .await;

    let client = client_for(&server);
    let changes = collect_folder_changes(&client, DELTA_PATH, Some(&stale_url))
        .await
        .unwrap();

    assert_eq!(changes.added, vec!["m1"]);
    assert_eq!(changes.update.url, fresh_url);
    assert!(changes.update.reset, "fallback must flag the reset");
}

#[tokio::test]
async fn test_invalid_delta_without_token_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(DELTA_PATH))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = collect_folder_changes(&client, DELTA_PATH, None).await;
    assert!(matches!(result, Err(ConnectorError::InvalidDelta)));
}

#[tokio::test]
async fn test_server_error_aborts_without_partial_commit() {
    let server = MockServer::start().await;
    let page2_url = format!("{}/delta-page-2", server.uri());

    mount_json(
        &server,
        DELTA_PATH,
        serde_json::json!({
            "value": [{"id": "m1"}],
            "@odata.nextLink": page2_url,
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/delta-page-2"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": {"code": "accessDenied", "message": "nope"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = collect_folder_changes(&client, DELTA_PATH, None).await;
    assert!(matches!(result, Err(ConnectorError::NonRecoverable(_))));
}
