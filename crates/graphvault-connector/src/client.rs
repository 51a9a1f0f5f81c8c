//! Authenticated Microsoft Graph HTTP client
//!
//! Wraps `reqwest` with bearer authentication, base-URL handling,
//! per-request deadlines, proactive rate limiting, and automatic 429
//! retry. Non-success responses are classified into the connector
//! error taxonomy before they reach callers.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::errors::ConnectorError;
use crate::rate_limit::{parse_retry_after, RateLimiter};

/// Base URL for Microsoft Graph API v1.0.
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Deadline applied to every remote request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Backoff used when a 429 omits `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Maximum attempts for a throttled request.
const MAX_RETRIES: u32 = 5;

/// Where bearer tokens come from.
enum TokenSource {
    /// Fixed token, used by tests.
    Static(String),
    /// Cached client-credentials provider.
    Provider(Arc<TokenProvider>),
}

/// HTTP client for Microsoft Graph calls.
pub struct GraphClient {
    http: Client,
    base_url: String,
    tokens: TokenSource,
    rate_limiter: RateLimiter,
}

impl GraphClient {
    /// Creates a client backed by a token provider.
    pub fn new(tokens: Arc<TokenProvider>) -> Self {
        Self::build(TokenSource::Provider(tokens), GRAPH_BASE_URL)
    }

    /// Creates a client with a fixed token and custom base URL (tests).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::build(TokenSource::Static(token.into()), base_url)
    }

    fn build(tokens: TokenSource, base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into(),
            tokens,
            rate_limiter: RateLimiter::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn bearer(&self) -> Result<String, ConnectorError> {
        match &self.tokens {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Provider(provider) => provider
                .access_token()
                .await
                .map_err(ConnectorError::NonRecoverable),
        }
    }

    fn absolute(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        }
    }

    async fn authed(&self, method: Method, url: &str) -> Result<RequestBuilder, ConnectorError> {
        let token = self.bearer().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    /// Sends a request with rate limiting and 429 retry.
    ///
    /// `path_or_url` may be a path relative to the base URL or an
    /// absolute next-link. `category` names the logical endpoint for
    /// rate limiting ("delta", "containers", "items", ...).
    ///
    /// Returns the response once it is non-throttled; non-success
    /// statuses are classified into [`ConnectorError`].
    pub async fn execute(
        &self,
        method: Method,
        path_or_url: &str,
        category: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, ConnectorError> {
        let url = self.absolute(path_or_url);

        for attempt in 0..=MAX_RETRIES {
            self.rate_limiter.acquire(category).await;

            let mut request = self.authed(method.clone(), &url).await?;
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(ConnectorError::transport)?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                self.rate_limiter.on_throttle(category);

                if attempt >= MAX_RETRIES {
                    warn!(url, attempts = attempt + 1, "429 retry limit exhausted");
                    return Err(ConnectorError::Recoverable(anyhow::anyhow!(
                        "throttled: retry limit exhausted after {} attempts for {url}",
                        attempt + 1
                    )));
                }

                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
                    .unwrap_or(DEFAULT_RETRY_AFTER);

                info!(
                    url,
                    attempt,
                    retry_after_ms = retry_after.as_millis(),
                    "Received 429, backing off"
                );
                tokio::time::sleep(retry_after).await;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ConnectorError::classify_response(status, &body));
            }

            self.rate_limiter.on_success(category);
            if attempt > 0 {
                debug!(url, attempt, "Request succeeded after retry");
            }
            return Ok(response);
        }

        Err(ConnectorError::Recoverable(anyhow::anyhow!(
            "retry loop exited unexpectedly for {url}"
        )))
    }

    /// GET returning a deserialised JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path_or_url: &str,
        category: &str,
    ) -> Result<T, ConnectorError> {
        self.execute(Method::GET, path_or_url, category, None)
            .await?
            .json()
            .await
            .map_err(ConnectorError::transport)
    }

    /// GET returning the raw body bytes.
    pub async fn get_bytes(
        &self,
        path_or_url: &str,
        category: &str,
    ) -> Result<Vec<u8>, ConnectorError> {
        let bytes = self
            .execute(Method::GET, path_or_url, category, None)
            .await?
            .bytes()
            .await
            .map_err(ConnectorError::transport)?;
        Ok(bytes.to_vec())
    }

    /// POST with a JSON body, returning the deserialised response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path_or_url: &str,
        body: serde_json::Value,
        category: &str,
    ) -> Result<T, ConnectorError> {
        self.execute(Method::POST, path_or_url, category, Some(body))
            .await?
            .json()
            .await
            .map_err(ConnectorError::transport)
    }

    /// PUT raw bytes (content uploads), ignoring the response body.
    pub async fn put_bytes(
        &self,
        path_or_url: &str,
        bytes: Vec<u8>,
        category: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.absolute(path_or_url);
        self.rate_limiter.acquire(category).await;

        let response = self
            .authed(Method::PUT, &url)
            .await?
            .body(bytes)
            .send()
            .await
            .map_err(ConnectorError::transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::classify_response(status, &body));
        }

        self.rate_limiter.on_success(category);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_joins_relative_paths() {
        let client = GraphClient::with_base_url("t", "http://localhost:9");
        assert_eq!(client.absolute("/users"), "http://localhost:9/users");
    }

    #[test]
    fn test_absolute_passes_through_full_urls() {
        let client = GraphClient::with_base_url("t", "http://localhost:9");
        let next = "https://graph.microsoft.com/v1.0/users?$skiptoken=x";
        assert_eq!(client.absolute(next), next);
    }
}
