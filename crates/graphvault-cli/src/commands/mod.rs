//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use graphvault_core::config::{AzureCredentials, RepoConfig};
use graphvault_connector::GraphConnector;
use graphvault_snapshot::{ObjectModelStore, SnapshotRepository};

pub mod backup;
pub mod repo;
pub mod restore;

/// Command failure split by exit code: configuration problems exit 2,
/// everything else exits 1.
#[derive(Debug)]
pub enum CliError {
    Config(anyhow::Error),
    Other(anyhow::Error),
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Other(err)
    }
}

/// The wired-up dependency set shared by repo-touching commands.
pub struct Runtime {
    pub config: RepoConfig,
    pub connector: Arc<GraphConnector>,
    pub repository: Arc<SnapshotRepository>,
    pub models: Arc<ObjectModelStore>,
}

/// Loads the config and opens the repository. A missing config file or
/// missing credentials is a configuration error.
pub fn open_runtime(config_path: Option<PathBuf>) -> Result<Runtime, CliError> {
    let path = config_path.unwrap_or_else(RepoConfig::default_path);
    let config = RepoConfig::load(&path).map_err(CliError::Config)?;

    let credentials = AzureCredentials::from_env(&config).map_err(CliError::Config)?;
    let connector = Arc::new(GraphConnector::new(credentials));

    let repository =
        Arc::new(SnapshotRepository::open(&config).map_err(CliError::Config)?);
    let models = Arc::new(ObjectModelStore::new(repository.operator()));

    Ok(Runtime {
        config,
        connector,
        repository,
        models,
    })
}

/// A cancellation token wired to Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}
