//! Backup CLI commands
//!
//! Implements CLI commands for creating, inspecting, restoring and pruning
//! backups.

use chrono::Utc;
use clap::Subcommand;
use tabled::{settings::Style, Table, Tabled};

use crate::backup::{select_candidates, BackupEngine};
use crate::error::{BackupError, BackupResult};
use crate::ledger::{BackupMetadata, BackupStatus};

use super::{format_duration, format_size};

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a new backup
    Create,

    /// List backups, newest first
    List {
        /// Maximum number of backups to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Show full ids, platforms and errors
        #[arg(short, long)]
        verbose: bool,
    },

    /// Restore from a backup
    Restore {
        /// Backup id, unique id prefix, or 'latest'
        backup: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a backup and show what it contains
    Info {
        /// Backup id, unique id prefix, or 'latest'
        backup: String,
    },

    /// Delete backups older than the retention window
    Prune {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Type")]
    backup_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Destinations")]
    destinations: String,
}

impl BackupRow {
    fn new(entry: &BackupMetadata, verbose: bool) -> Self {
        let destinations: Vec<String> = entry.destinations.iter().map(|d| d.to_string()).collect();
        Self {
            id: if verbose {
                entry.id.clone()
            } else {
                entry.short_id().to_string()
            },
            created: entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            age: format_duration(Utc::now() - entry.timestamp),
            backup_type: entry.backup_type.to_string(),
            status: entry.status.to_string(),
            size: format_size(entry.size),
            destinations: destinations.join(", "),
        }
    }
}

/// Handle a backup command
pub fn handle_backup_command(engine: &BackupEngine, cmd: BackupCommands) -> BackupResult<()> {
    match cmd {
        BackupCommands::Create => {
            println!("Creating backup...");
            let entry = engine.trigger_manual_backup()?;

            if entry.status != BackupStatus::Completed {
                return Err(BackupError::Incomplete {
                    id: entry.id.clone(),
                    status: entry.status,
                    message: entry.error.unwrap_or_default(),
                });
            }

            println!("Backup created successfully!");
            println!("  ID:           {}", entry.id);
            println!("  Size:         {}", format_size(entry.size));
            let destinations: Vec<String> =
                entry.destinations.iter().map(|d| d.to_string()).collect();
            println!("  Destinations: {}", destinations.join(", "));
        }

        BackupCommands::List { limit, verbose } => {
            let backups = engine.list_backups(limit)?;

            if backups.is_empty() {
                println!("No backups found.");
                println!("Create one with: keepsafe backup create");
                return Ok(());
            }

            let rows: Vec<BackupRow> = backups.iter().map(|b| BackupRow::new(b, verbose)).collect();
            let mut table = Table::new(rows);
            table.with(Style::sharp());
            println!("{}", table);

            if verbose {
                for entry in backups.iter().filter(|b| b.error.is_some()) {
                    println!(
                        "{} on {}: {}",
                        entry.short_id(),
                        entry.platform,
                        entry.error.as_deref().unwrap_or_default()
                    );
                }
            }

            println!();
            println!("Total: {} backup(s)", backups.len());
        }

        BackupCommands::Restore { backup, force } => {
            let id = resolve_backup(engine, &backup)?;
            let entry = engine.get_backup(&id)?;

            if !force {
                println!("Restore from: {}", entry.id);
                println!(
                    "Created: {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!();
                println!("WARNING: This will overwrite ALL current data in the backed up domains!");
                println!();
                println!("To proceed, run again with --force flag:");
                println!("  keepsafe backup restore {} --force", backup);
                return Ok(());
            }

            let report = engine.restore(&id);
            if let Some(err) = report.error.clone() {
                eprintln!("{}", report.summary());
                for failure in &report.rollback_failures {
                    eprintln!("  {}: {}", failure.domain, failure.message);
                }
                return Err(err);
            }

            println!("Restored from backup {}", report.backup_id);
            if let Some(source) = report.source {
                println!("Source: {}", source);
            }
            println!("{}", report.summary());
            println!("Total records: {}", report.total_restored());
        }

        BackupCommands::Info { backup } => {
            let id = resolve_backup(engine, &backup)?;
            let entry = engine.get_backup(&id)?;

            println!("Backup Information");
            println!("==================");
            println!("ID:           {}", entry.id);
            println!(
                "Created:      {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("Age:          {}", format_duration(Utc::now() - entry.timestamp));
            println!("Type:         {}", entry.backup_type);
            println!("Status:       {}", entry.status);
            println!("Size:         {}", format_size(entry.size));
            println!("Platform:     {}", entry.platform);
            let destinations: Vec<String> =
                entry.destinations.iter().map(|d| d.to_string()).collect();
            println!("Destinations: {}", destinations.join(", "));
            if let Some(error) = &entry.error {
                println!("Error:        {}", error);
            }

            if entry.status != BackupStatus::Completed {
                return Ok(());
            }

            let staged = engine.validate_backup(&id)?;
            let manifest = &staged.snapshot.manifest;

            println!();
            println!("Contents (read from {}):", staged.source);
            for (domain, count) in &manifest.record_counts {
                println!("  {:<12} {} record(s)", domain.as_str(), count);
            }
            println!();
            println!("Schema version: {}", manifest.schema_version);
            println!(
                "Encrypted:      {}",
                if staged.record.encrypted { "Yes" } else { "No" }
            );
            println!("Checksum:       {}", staged.record.checksum);
            println!("Validation:     OK");
        }

        BackupCommands::Prune { force } => {
            let config = engine.configuration();
            let entries = engine.ledger().list_all()?;
            let candidates = select_candidates(&entries, Utc::now(), config.retention_days, None);

            if candidates.is_empty() {
                println!("No backups to prune.");
                println!(
                    "Current retention policy: {} day(s). You have {} backup(s).",
                    config.retention_days,
                    entries.len()
                );
                return Ok(());
            }

            println!("Prune Summary");
            println!("=============");
            println!("Retention policy: {} day(s)", config.retention_days);
            println!("Current backups:  {}", entries.len());
            println!("To be deleted:    {}", candidates.len());
            println!();

            if !force {
                println!("To delete old backups, run again with --force flag:");
                println!("  keepsafe backup prune --force");
                return Ok(());
            }

            let report = engine.reap_expired()?;
            println!("{}", report.summary());
            for failure in &report.failures {
                eprintln!("  {}: {}", failure.id, failure.message);
            }
        }
    }

    Ok(())
}

/// Resolve a backup identifier to a full id
fn resolve_backup(engine: &BackupEngine, backup: &str) -> BackupResult<String> {
    // Handle "latest" keyword
    if backup.eq_ignore_ascii_case("latest") {
        return engine
            .ledger()
            .list_all()?
            .into_iter()
            .find(|b| b.status == BackupStatus::Completed)
            .map(|b| b.id)
            .ok_or_else(|| BackupError::backup_not_found("latest"));
    }

    engine.resolve_backup_id(backup)
}
