//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the backup engine.

pub mod backup;
pub mod config;
pub mod export;
pub mod schedule;

use std::path::PathBuf;
use std::sync::Arc;

use crate::backup::BackupEngine;
use crate::config::{BackupConfiguration, EnginePaths};
use crate::crypto::KeySource;
use crate::destination::{
    CloudDestination, DirectoryObjectStore, ObjectStore, S3ObjectStore, S3Settings,
};
use crate::error::{BackupError, BackupResult};
use crate::storage::JsonFileDomain;

pub use backup::{handle_backup_command, BackupCommands};
pub use config::{handle_config_command, ConfigCommands};
pub use export::{handle_export_command, ExportArgs};
pub use schedule::{handle_schedule_command, ScheduleCommands};

/// Environment variable holding the backup passphrase
pub const PASSPHRASE_ENV: &str = "KEEPSAFE_PASSPHRASE";

/// Where cloud copies are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudTarget {
    /// An S3 or S3-compatible bucket
    S3(S3Settings),
    /// A mounted or synced folder used as the bucket
    Directory(PathBuf),
}

/// How the engine for one command is assembled
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Cloud destination, if any
    pub cloud: Option<CloudTarget>,
    /// Ask for a passphrase even if the saved configuration does not
    pub require_key: bool,
}

/// Build an engine over the data directory
///
/// Every domain is backed by its JSON file. A key source is only set up when
/// encryption is configured (or requested), so plain commands never prompt.
pub fn open_engine(paths: &EnginePaths, options: &EngineOptions) -> BackupResult<BackupEngine> {
    let config = BackupConfiguration::load_or_create(paths)?;

    let mut builder = BackupEngine::builder()
        .paths(paths.clone())
        .configuration(config.clone());

    for domain in JsonFileDomain::all(paths) {
        builder = builder.provider(Arc::new(domain));
    }

    if let Some(target) = &options.cloud {
        let store: Arc<dyn ObjectStore> = match target {
            CloudTarget::S3(settings) => Arc::new(
                S3ObjectStore::connect(settings.clone())
                    .map_err(|e| BackupError::Config(format!("S3 destination: {}", e)))?,
            ),
            CloudTarget::Directory(dir) => Arc::new(DirectoryObjectStore::new(dir.clone())),
        };
        builder = builder.cloud_destination(Arc::new(CloudDestination::new(store)));
    }

    if config.encryption_enabled || options.require_key {
        builder = builder.key_source(KeySource::passphrase(read_passphrase()?));
    }

    builder.build()
}

/// Read the passphrase from the environment or prompt for it
fn read_passphrase() -> BackupResult<String> {
    if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
        if !passphrase.is_empty() {
            return Ok(passphrase);
        }
    }

    let passphrase = rpassword::prompt_password("Backup passphrase: ")
        .map_err(|e| BackupError::Config(format!("Failed to read passphrase: {}", e)))?;

    if passphrase.is_empty() {
        return Err(BackupError::Config("Passphrase cannot be empty".into()));
    }
    Ok(passphrase)
}

/// Format a duration in human-readable form
pub(crate) fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    let months = days / 30;
    format!("{}mo", months)
}

/// Format a byte count in human-readable form
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::minutes(5)), "5m");
        assert_eq!(format_duration(chrono::Duration::hours(3)), "3h");
        assert_eq!(format_duration(chrono::Duration::days(2)), "2d");
        assert_eq!(format_duration(chrono::Duration::days(65)), "2mo");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_open_engine_without_key() {
        let temp = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp.path().to_path_buf());

        let engine = open_engine(&paths, &EngineOptions::default()).unwrap();
        assert!(paths.backup_dir().exists());
        assert!(!engine.configuration().encryption_enabled);
    }

    #[test]
    fn test_open_engine_with_s3_target() {
        let temp = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp.path().to_path_buf());
        let options = EngineOptions {
            cloud: Some(CloudTarget::S3(
                S3Settings::new("keepsafe-test", "us-east-1").with_endpoint("http://127.0.0.1:9"),
            )),
            require_key: false,
        };

        let engine = open_engine(&paths, &options).unwrap();
        assert!(format!("{:?}", engine).contains("Cloud"));
    }
}
