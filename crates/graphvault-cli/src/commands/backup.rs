//! `graphvault backup` - create and inspect backups

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};

use graphvault_core::domain::backup::{Backup, BACKUP_SCHEMA, DETAILS_SCHEMA};
use graphvault_core::domain::details::DetailsModel;
use graphvault_core::domain::path::{Category, Service};
use graphvault_core::ports::model_store::get_model;
use graphvault_core::ports::ModelStore;
use graphvault_core::selectors::{self, Selector};
use graphvault_ops::BackupOperation;

use super::{cancel_on_ctrl_c, open_runtime, CliError};
use crate::output::{self, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Run a backup for the selected owners and categories
    Create(CreateArgs),
    /// List stored backups
    List,
    /// Show the item details of one backup
    Details(DetailsArgs),
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Resource owners to back up (repeatable)
    #[arg(long = "user", required = true)]
    users: Vec<String>,

    /// Data categories, comma-separated (email,contacts,events,files,libraries,lists)
    #[arg(long = "data", default_value = "email")]
    data: String,
}

#[derive(Debug, Args)]
pub struct DetailsArgs {
    /// The backup ID to inspect
    backup_id: String,
}

impl BackupCommand {
    pub async fn execute(
        self,
        format: OutputFormat,
        config_path: Option<PathBuf>,
    ) -> Result<(), CliError> {
        match self {
            BackupCommand::Create(args) => create(args, format, config_path).await,
            BackupCommand::List => list(format, config_path).await,
            BackupCommand::Details(args) => details(args, format, config_path).await,
        }
    }
}

/// Builds the backup selector from the CLI arguments.
fn selector_for(tenant: &str, users: &[String], data: &str) -> Result<Selector, CliError> {
    let categories: Vec<Category> = data
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Category>()
                .map_err(|e| CliError::Config(e.into()))
        })
        .collect::<Result<_, _>>()?;

    let service = match categories.first() {
        Some(Category::Files) => Service::OneDrive,
        Some(Category::Libraries | Category::Lists) => Service::SharePoint,
        _ => Service::Exchange,
    };

    let mut selector = Selector::new(tenant, service);
    let owners = users.to_vec();
    for category in categories {
        let scope = match category {
            Category::Email => selectors::mails(owners.clone(), selectors::any(), selectors::any()),
            Category::Contacts => {
                selectors::contacts(owners.clone(), selectors::any(), selectors::any())
            }
            Category::Events => {
                selectors::events(owners.clone(), selectors::any(), selectors::any())
            }
            Category::Files => {
                selectors::files(owners.clone(), selectors::any(), selectors::any())
            }
            other => selectors::Scope {
                category: Some(other),
                predicates: vec![(
                    selectors::ScopeKey::ResourceOwner,
                    selectors::Predicate::Identity(owners.clone()),
                )],
            },
        };
        selector.include(scope);
    }
    Ok(selector)
}

async fn create(
    args: CreateArgs,
    format: OutputFormat,
    config_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let runtime = open_runtime(config_path)?;
    let selector = selector_for(&runtime.config.tenant_id, &args.users, &args.data)?;

    let operation = BackupOperation::new(
        runtime.connector.clone(),
        runtime.repository.clone(),
        runtime.models.clone(),
    );
    let backup = operation
        .run(&selector, cancel_on_ctrl_c())
        .await
        .context("backup run failed")?;

    output::print_backup(&backup, format);
    Ok(())
}

async fn list(format: OutputFormat, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let runtime = open_runtime(config_path)?;

    let mut backups: Vec<Backup> = Vec::new();
    for id in runtime.models.list_ids(BACKUP_SCHEMA).await? {
        if let Some(backup) = get_model(runtime.models.as_ref(), BACKUP_SCHEMA, &id).await? {
            backups.push(backup);
        }
    }
    backups.sort_by_key(|b| b.started_at);

    output::print_backup_list(&backups, format);
    Ok(())
}

async fn details(
    args: DetailsArgs,
    format: OutputFormat,
    config_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let runtime = open_runtime(config_path)?;

    let backup: Backup =
        get_model(runtime.models.as_ref(), BACKUP_SCHEMA, &args.backup_id)
            .await?
            .with_context(|| format!("backup {} not found", args.backup_id))?;
    let details: DetailsModel =
        get_model(runtime.models.as_ref(), DETAILS_SCHEMA, &backup.details_id)
            .await?
            .with_context(|| format!("details for backup {} not found", args.backup_id))?;

    output::print_details(&details, format);
    Ok(())
}
