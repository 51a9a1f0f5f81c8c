//! Shared helpers for connector integration tests

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use graphvault_connector::GraphClient;

/// A Graph client pointed at the mock server.
pub fn client_for(server: &MockServer) -> GraphClient {
    GraphClient::with_base_url("test-token", server.uri())
}

/// Mounts a GET handler returning the given JSON body.
pub async fn mount_json(server: &MockServer, at: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// An empty folder-children page.
pub fn empty_page() -> serde_json::Value {
    serde_json::json!({ "value": [] })
}
