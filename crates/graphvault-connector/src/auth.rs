//! Azure AD authentication for Microsoft Graph
//!
//! Backups run unattended, so the connector uses the OAuth2
//! client-credentials grant: the app registration's ID and secret are
//! exchanged for an app-only access token scoped to Graph. Tokens are
//! cached and refreshed shortly before expiry.

use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl};
use tracing::{debug, info};

use graphvault_core::config::AzureCredentials;

/// Resource scope requesting every permission granted to the app.
const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Refresh tokens this long before their reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 120;

/// Default token lifetime assumed when the server omits `expires_in`.
const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// A bearer token with its expiry time.
#[derive(Debug, Clone)]
struct CachedToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Acquires and caches app-only Graph access tokens.
pub struct TokenProvider {
    credentials: AzureCredentials,
    /// Authority base, overridable for tests against a local server.
    authority: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(credentials: AzureCredentials) -> Self {
        Self {
            authority: "https://login.microsoftonline.com".to_string(),
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Points the provider at a different authority (testing).
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Returns a valid access token, exchanging credentials when the
    /// cached one is absent or near expiry.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cached.lock().unwrap().as_ref() {
            if token.is_fresh() {
                return Ok(token.secret.clone());
            }
        }

        let token = self.exchange().await?;
        let secret = token.secret.clone();
        *self.cached.lock().unwrap() = Some(token);
        Ok(secret)
    }

    async fn exchange(&self) -> Result<CachedToken> {
        let tenant = &self.credentials.tenant_id;
        let auth_url = format!("{}/{}/oauth2/v2.0/authorize", self.authority, tenant);
        let token_url = format!("{}/{}/oauth2/v2.0/token", self.authority, tenant);

        debug!(tenant, "Exchanging client credentials for Graph token");

        let client = BasicClient::new(ClientId::new(self.credentials.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.credentials.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(auth_url).context("invalid authorize URL")?)
            .set_token_uri(TokenUrl::new(token_url).context("invalid token URL")?);

        let http_client = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .context("building token-exchange HTTP client")?;

        let response = client
            .exchange_client_credentials()
            .add_scope(Scope::new(GRAPH_DEFAULT_SCOPE.to_string()))
            .request_async(&http_client)
            .await
            .context("client-credentials exchange failed")?;

        let lifetime = response
            .expires_in()
            .map(|d| Duration::from_std(d).unwrap_or(Duration::seconds(DEFAULT_LIFETIME_SECS)))
            .unwrap_or(Duration::seconds(DEFAULT_LIFETIME_SECS));

        info!(tenant, lifetime_secs = lifetime.num_seconds(), "Acquired Graph access token");

        Ok(CachedToken {
            secret: response.access_token().secret().clone(),
            expires_at: Utc::now() + lifetime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> AzureCredentials {
        AzureCredentials {
            tenant_id: "tid".to_string(),
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_cached_token_freshness() {
        let fresh = CachedToken {
            secret: "t".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        assert!(fresh.is_fresh());

        let near_expiry = CachedToken {
            secret: "t".to_string(),
            expires_at: Utc::now() + Duration::seconds(30),
        };
        assert!(!near_expiry.is_fresh());
    }

    #[test]
    fn test_provider_starts_with_empty_cache() {
        let provider = TokenProvider::new(credentials());
        assert!(provider.cached.lock().unwrap().is_none());
    }

    #[test]
    fn test_authority_override() {
        let provider = TokenProvider::new(credentials()).with_authority("http://127.0.0.1:9");
        assert_eq!(provider.authority, "http://127.0.0.1:9");
    }
}
