//! Schedule CLI commands

use std::sync::Arc;

use chrono::Local;
use clap::Subcommand;

use crate::backup::BackupEngine;
use crate::error::{BackupError, BackupResult};
use crate::ledger::BackupStatus;
use crate::schedule::{next_run_at, Scheduler};

/// Schedule subcommands
#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Show when the next scheduled backup will run
    Next,

    /// Run the scheduler in the foreground until interrupted
    Run,

    /// Run one scheduled backup immediately
    Trigger,
}

/// Handle a schedule command
pub fn handle_schedule_command(engine: Arc<BackupEngine>, cmd: ScheduleCommands) -> BackupResult<()> {
    match cmd {
        ScheduleCommands::Next => {
            let config = engine.configuration();
            match next_run_at(&Local::now(), &config)? {
                Some(next) => println!(
                    "Next {} backup: {}",
                    config.frequency,
                    next.format("%Y-%m-%d %H:%M %Z")
                ),
                None => {
                    println!("Scheduled backups are disabled.");
                    println!("Enable them with: keepsafe config set --enabled true");
                }
            }
        }

        ScheduleCommands::Run => {
            if !engine.configuration().enabled {
                println!("Scheduled backups are disabled; waiting for them to be enabled.");
            }
            println!("Scheduler running. Press Ctrl+C to stop.");
            Scheduler::spawn(engine)?.join();
        }

        ScheduleCommands::Trigger => {
            let entry = engine.run_scheduled_backup()?;
            if entry.status != BackupStatus::Completed {
                return Err(BackupError::Incomplete {
                    id: entry.id,
                    status: entry.status,
                    message: entry.error.unwrap_or_default(),
                });
            }
            println!("Scheduled backup {} completed.", entry.id);
        }
    }

    Ok(())
}
