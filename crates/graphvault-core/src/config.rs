//! Repository configuration and credentials
//!
//! The persistent repo config is a TOML file at an OS-default path,
//! written by `repo init` and required by every repo-touching command.
//! Remote credentials are never written to disk; they come from the
//! environment at startup.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configured tenant ID.
pub const ENV_TENANT_ID: &str = "GRAPHVAULT_TENANT_ID";

/// Environment variable holding the Azure AD application (client) ID.
pub const ENV_CLIENT_ID: &str = "AZURE_CLIENT_ID";

/// Environment variable holding the Azure AD client secret.
pub const ENV_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";

/// Persistent snapshot-repository configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Object-store provider, e.g. `s3`.
    pub provider: String,
    /// Bucket holding the snapshot repository.
    pub bucket: String,
    /// Endpoint URL; empty selects the provider default.
    #[serde(default)]
    pub endpoint: String,
    /// Key prefix inside the bucket.
    #[serde(default)]
    pub prefix: String,
    /// Azure AD tenant the backups belong to.
    #[serde(rename = "tenantid")]
    pub tenant_id: String,
}

impl RepoConfig {
    /// Loads the config from `path`. A missing or unreadable file is a
    /// hard error; callers map it to the configuration exit code.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading repo config at {}", path.display()))?;
        let config: RepoConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Writes the config to `path`, creating parent directories.
    pub fn store(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("serialising repo config")?;
        std::fs::write(path, content)
            .with_context(|| format!("writing repo config at {}", path.display()))?;
        Ok(())
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/graphvault/graphvault.toml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("graphvault")
            .join("graphvault.toml")
    }
}

/// Azure AD client-credentials material gathered from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl AzureCredentials {
    /// Reads credentials from the process environment. The tenant comes
    /// from [`ENV_TENANT_ID`] when set, otherwise from the repo config.
    /// Any missing value is fatal.
    pub fn from_env(config: &RepoConfig) -> anyhow::Result<Self> {
        Self::from_lookup(config, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        config: &RepoConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let tenant_id = lookup(ENV_TENANT_ID)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| config.tenant_id.clone());
        if tenant_id.is_empty() {
            anyhow::bail!("tenant ID missing: set {ENV_TENANT_ID} or run `repo init`");
        }

        let client_id = lookup(ENV_CLIENT_ID)
            .filter(|v| !v.is_empty())
            .with_context(|| format!("{ENV_CLIENT_ID} is required for remote calls"))?;
        let client_secret = lookup(ENV_CLIENT_SECRET)
            .filter(|v| !v.is_empty())
            .with_context(|| format!("{ENV_CLIENT_SECRET} is required for remote calls"))?;

        Ok(Self {
            tenant_id,
            client_id,
            client_secret,
        })
    }
}
