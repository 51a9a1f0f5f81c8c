//! GraphVault CLI - incremental backup for Microsoft 365 tenant data
//!
//! Provides commands for:
//! - Initialising and connecting the snapshot repository
//! - Creating and listing backups
//! - Restoring selected items back to the tenant

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::backup::BackupCommand;
use commands::repo::RepoCommand;
use commands::restore::RestoreCommand;
use commands::CliError;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "graphvault", version, about = "Incremental Microsoft 365 backup")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use an alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage the snapshot repository
    #[command(subcommand)]
    Repo(RepoCommand),
    /// Create and inspect backups
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Restore items from a backup
    Restore(RestoreCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let config_path = cli.config.map(std::path::PathBuf::from);

    let result = match cli.command {
        Commands::Repo(cmd) => cmd.execute(format, config_path).await,
        Commands::Backup(cmd) => cmd.execute(format, config_path).await,
        Commands::Restore(cmd) => cmd.execute(format, config_path).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Config(err)) => {
            eprintln!("configuration error: {err:#}");
            ExitCode::from(2)
        }
        Err(CliError::Other(err)) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}
