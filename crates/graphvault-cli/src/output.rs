//! Terminal output helpers
//!
//! Every command prints either a human-readable summary or the JSON
//! form of the same data. The backup ID and error counts are always
//! shown, partial failure included.

use graphvault_core::domain::backup::Backup;
use graphvault_core::domain::details::DetailsModel;
use graphvault_ops::RestoreResults;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

pub fn print_backup(backup: &Backup, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(backup).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Human => {
            println!("Backup ID:     {}", backup.id);
            println!("Status:        {}", backup.results.status);
            println!(
                "Items:         {} read, {} written",
                backup.results.items_read, backup.results.items_written
            );
            println!(
                "Bytes:         {} read, {} uploaded",
                backup.results.bytes_read, backup.results.bytes_uploaded
            );
            println!(
                "Errors:        {} read, {} write",
                backup.results.read_errors, backup.results.write_errors
            );
            println!(
                "Owners:        {}",
                backup
                    .results
                    .resource_owners
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
}

pub fn print_backup_list(backups: &[Backup], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(backups).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Human => {
            if backups.is_empty() {
                println!("No backups found.");
                return;
            }

            println!(
                "{:<38} {:<22} {:<24} {:>6} {:>6}",
                "ID", "Status", "Started", "Items", "Errors"
            );
            for backup in backups {
                println!(
                    "{:<38} {:<22} {:<24} {:>6} {:>6}",
                    backup.id,
                    backup.results.status.to_string(),
                    backup.started_at.to_rfc3339(),
                    backup.results.items_written,
                    backup.results.read_errors + backup.results.write_errors,
                );
            }
        }
    }
}

pub fn print_details(details: &DetailsModel, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(details).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Human => {
            for entry in details.items() {
                match &entry.info {
                    Some(info) => {
                        println!("{}  {}", entry.short_ref, info.display_name())
                    }
                    None => println!("{}  {}", entry.short_ref, entry.repo_ref),
                }
            }
            println!("{} item(s)", details.items().count());
        }
    }
}

pub fn print_restore(results: &RestoreResults, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "backupId": results.backup_id,
                    "status": results.status.to_string(),
                    "itemsRequested": results.items_requested,
                    "itemsWritten": results.items_written,
                    "itemsFailed": results.items_failed,
                    "bytesWritten": results.bytes_written,
                })
            );
        }
        OutputFormat::Human => {
            println!("Backup ID:   {}", results.backup_id);
            println!("Status:      {}", results.status);
            println!(
                "Items:       {} requested, {} restored, {} failed",
                results.items_requested, results.items_written, results.items_failed
            );
        }
    }
}
