//! `graphvault restore` - restore selected items from a backup

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use graphvault_core::domain::path::Service;
use graphvault_core::selectors::{self, Selector};
use graphvault_ops::RestoreOperation;

use super::{cancel_on_ctrl_c, open_runtime, CliError};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct RestoreCommand {
    /// The backup to restore from
    backup_id: String,

    /// Restore only items owned by these users (repeatable)
    #[arg(long = "user")]
    users: Vec<String>,

    /// Restore only mail whose subject contains this string
    #[arg(long)]
    subject: Option<String>,

    /// Restore only mail from this sender
    #[arg(long)]
    sender: Option<String>,

    /// Restore only mail received before this RFC 3339 time
    #[arg(long)]
    received_before: Option<String>,

    /// Restore only mail received after this RFC 3339 time
    #[arg(long)]
    received_after: Option<String>,

    /// Restore only the items with these IDs or short-refs (repeatable)
    #[arg(long = "item")]
    items: Vec<String>,
}

impl RestoreCommand {
    pub async fn execute(
        self,
        format: OutputFormat,
        config_path: Option<PathBuf>,
    ) -> Result<(), CliError> {
        let runtime = open_runtime(config_path)?;
        let selector = self.selector(&runtime.config.tenant_id)?;

        let operation = RestoreOperation::new(
            runtime.connector.clone(),
            runtime.repository.clone(),
            runtime.models.clone(),
        );
        let results = operation
            .run(&self.backup_id, &selector, cancel_on_ctrl_c())
            .await
            .context("restore run failed")?;

        output::print_restore(&results, format);
        Ok(())
    }

    fn selector(&self, tenant: &str) -> Result<Selector, CliError> {
        let mut selector = Selector::new(tenant, Service::Exchange);

        if !self.users.is_empty() {
            selector.include(selectors::owners(self.users.clone()));
        }
        if !self.items.is_empty() {
            selector.include(selectors::mail_refs(self.items.clone()));
        }
        if let Some(subject) = &self.subject {
            selector.filter(selectors::mail_subject(subject.clone()));
        }
        if let Some(sender) = &self.sender {
            selector.filter(selectors::mail_sender(sender.clone()));
        }
        if let Some(bound) = &self.received_before {
            let bound = bound
                .parse()
                .context("--received-before must be RFC 3339")
                .map_err(CliError::Config)?;
            selector.filter(selectors::mail_received_before(bound));
        }
        if let Some(bound) = &self.received_after {
            let bound = bound
                .parse()
                .context("--received-after must be RFC 3339")
                .map_err(CliError::Config)?;
            selector.filter(selectors::mail_received_after(bound));
        }

        Ok(selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> RestoreCommand {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            cmd: RestoreCommand,
        }

        Wrapper::parse_from(std::iter::once("restore").chain(args.iter().copied())).cmd
    }

    #[test]
    fn test_selector_includes_users_and_filters() {
        let cmd = command(&["b-1", "--user", "u1", "--subject", "report"]);
        let selector = cmd.selector("t").unwrap();
        assert_eq!(selector.included_owners(), vec!["u1"]);
    }

    #[test]
    fn test_bad_timestamp_is_config_error() {
        let cmd = command(&["b-1", "--received-before", "yesterday"]);
        assert!(matches!(cmd.selector("t"), Err(CliError::Config(_))));
    }
}
