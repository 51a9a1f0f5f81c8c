//! `graphvault repo` - repository initialisation and connection

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tracing::info;

use graphvault_core::config::RepoConfig;
use graphvault_core::ports::SnapshotStore;
use graphvault_snapshot::SnapshotRepository;

use super::CliError;
use crate::output::OutputFormat;

#[derive(Debug, Subcommand)]
pub enum RepoCommand {
    /// Create the repository and write the config file
    Init(InitArgs),
    /// Verify access to an existing repository
    Connect,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Object-store provider
    #[arg(long, default_value = "s3")]
    provider: String,

    /// Bucket holding the snapshot repository
    #[arg(long)]
    bucket: String,

    /// Endpoint URL (empty selects the provider default)
    #[arg(long, default_value = "")]
    endpoint: String,

    /// Key prefix inside the bucket
    #[arg(long, default_value = "")]
    prefix: String,

    /// Azure AD tenant ID
    #[arg(long)]
    tenant: String,
}

impl RepoCommand {
    pub async fn execute(
        self,
        format: OutputFormat,
        config_path: Option<PathBuf>,
    ) -> Result<(), CliError> {
        match self {
            RepoCommand::Init(args) => init(args, format, config_path).await,
            RepoCommand::Connect => connect(format, config_path).await,
        }
    }
}

async fn init(
    args: InitArgs,
    format: OutputFormat,
    config_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = RepoConfig {
        provider: args.provider,
        bucket: args.bucket,
        endpoint: args.endpoint,
        prefix: args.prefix,
        tenant_id: args.tenant,
    };

    let repository = SnapshotRepository::open(&config).map_err(CliError::Config)?;
    repository.initialize().await?;

    let path = config_path.unwrap_or_else(RepoConfig::default_path);
    config.store(&path).map_err(CliError::Config)?;
    info!(path = %path.display(), "Wrote repository config");

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "initialized": true,
                "bucket": config.bucket,
                "config": path.display().to_string(),
            })
        ),
        OutputFormat::Human => {
            println!("Initialized repository in bucket {:?}", config.bucket);
            println!("Config written to {}", path.display());
        }
    }
    Ok(())
}

async fn connect(format: OutputFormat, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let path = config_path.unwrap_or_else(RepoConfig::default_path);
    let config = RepoConfig::load(&path).map_err(CliError::Config)?;

    let repository = SnapshotRepository::open(&config).map_err(CliError::Config)?;
    repository.initialize().await?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "connected": true, "bucket": config.bucket })
        ),
        OutputFormat::Human => {
            println!("Connected to repository in bucket {:?}", config.bucket)
        }
    }
    Ok(())
}
