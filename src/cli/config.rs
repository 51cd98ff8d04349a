//! Configuration CLI commands

use chrono::Local;
use clap::Subcommand;

use crate::backup::BackupEngine;
use crate::config::{ConfigurationPatch, EnginePaths, Frequency};
use crate::error::BackupResult;
use crate::schedule::next_run_at;

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the backup configuration and data paths
    Show,

    /// Change one or more configuration fields
    Set(ConfigSetArgs),
}

/// Fields accepted by `config set`; omitted fields keep their value
#[derive(clap::Args, Debug, Default)]
pub struct ConfigSetArgs {
    /// Run scheduled backups
    #[arg(long)]
    pub enabled: Option<bool>,

    /// Schedule frequency
    #[arg(long, value_enum)]
    pub frequency: Option<Frequency>,

    /// Time of day for scheduled backups (HH:MM, local time)
    #[arg(long)]
    pub time: Option<String>,

    /// Include user profiles
    #[arg(long)]
    pub user_data: Option<bool>,

    /// Include libraries, messages and symbol sets
    #[arg(long)]
    pub communication_data: Option<bool>,

    /// Include analytics and progress data
    #[arg(long)]
    pub progress_data: Option<bool>,

    /// Include application settings
    #[arg(long)]
    pub settings: Option<bool>,

    /// Write backups to the local destination
    #[arg(long)]
    pub local: Option<bool>,

    /// Write backups to the cloud destination
    #[arg(long)]
    pub cloud: Option<bool>,

    /// Encrypt backups with a passphrase
    #[arg(long)]
    pub encryption: Option<bool>,

    /// Days to keep backups
    #[arg(long)]
    pub retention_days: Option<u32>,
}

impl From<ConfigSetArgs> for ConfigurationPatch {
    fn from(args: ConfigSetArgs) -> Self {
        Self {
            enabled: args.enabled,
            frequency: args.frequency,
            time: args.time,
            include_user_data: args.user_data,
            include_communication_data: args.communication_data,
            include_progress_data: args.progress_data,
            include_settings: args.settings,
            local_backup: args.local,
            cloud_backup: args.cloud,
            encryption_enabled: args.encryption,
            retention_days: args.retention_days,
        }
    }
}

/// Handle a configuration command
pub fn handle_config_command(
    engine: &BackupEngine,
    paths: &EnginePaths,
    cmd: ConfigCommands,
) -> BackupResult<()> {
    match cmd {
        ConfigCommands::Show => show(engine, paths),
        ConfigCommands::Set(args) => {
            let patch = ConfigurationPatch::from(args);
            if patch.is_empty() {
                println!("Nothing to change.");
                return Ok(());
            }

            engine.update_configuration(patch)?;
            println!("Configuration updated.");
            println!();
            show(engine, paths)
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn show(engine: &BackupEngine, paths: &EnginePaths) -> BackupResult<()> {
    let config = engine.configuration();

    println!("Keepsafe Configuration");
    println!("======================");
    println!("Data directory:   {}", paths.base_dir().display());
    println!("Backup directory: {}", paths.backup_dir().display());
    println!();
    println!("Scheduled:        {}", yes_no(config.enabled));
    println!("Frequency:        {}", config.frequency);
    println!("Time:             {}", config.time);
    println!("User data:        {}", yes_no(config.include_user_data));
    println!(
        "Communication:    {}",
        yes_no(config.include_communication_data)
    );
    println!("Progress data:    {}", yes_no(config.include_progress_data));
    println!("Settings:         {}", yes_no(config.include_settings));
    println!("Local backup:     {}", yes_no(config.local_backup));
    println!("Cloud backup:     {}", yes_no(config.cloud_backup));
    println!("Encryption:       {}", yes_no(config.encryption_enabled));
    println!("Retention:        {} day(s)", config.retention_days);

    if let Some(next) = next_run_at(&Local::now(), &config)? {
        println!();
        println!("Next backup:      {}", next.format("%Y-%m-%d %H:%M %Z"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_args_make_empty_patch() {
        let patch = ConfigurationPatch::from(ConfigSetArgs::default());
        assert!(patch.is_empty());
    }

    #[test]
    fn test_args_map_to_patch_fields() {
        let args = ConfigSetArgs {
            frequency: Some(Frequency::Weekly),
            communication_data: Some(false),
            retention_days: Some(7),
            ..Default::default()
        };
        let patch = ConfigurationPatch::from(args);
        assert_eq!(patch.frequency, Some(Frequency::Weekly));
        assert_eq!(patch.include_communication_data, Some(false));
        assert_eq!(patch.retention_days, Some(7));
        assert_eq!(patch.enabled, None);
    }
}
