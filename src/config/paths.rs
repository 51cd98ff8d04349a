//! Path management for Keepsafe
//!
//! Provides platform-aware path resolution for configuration, live domain
//! data, the metadata ledger and local backups.
//!
//! ## Path Resolution Order
//!
//! 1. `KEEPSAFE_DATA_DIR` environment variable (if set)
//! 2. The platform configuration directory from `directories::ProjectDirs`
//!    (`~/.config/keepsafe` on Linux, `~/Library/Application Support/...` on
//!    macOS, `%APPDATA%\...` on Windows)

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::domain::DomainId;
use crate::error::BackupError;

/// Environment variable overriding the base directory
pub const DATA_DIR_ENV: &str = "KEEPSAFE_DATA_DIR";

/// Manages all paths used by Keepsafe
#[derive(Debug, Clone)]
pub struct EnginePaths {
    /// Base directory for all Keepsafe data
    base_dir: PathBuf,
}

impl EnginePaths {
    /// Create a new EnginePaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, BackupError> {
        let base_dir = if let Ok(custom) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create EnginePaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Directory holding each domain's live records
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Root of the local backup destination
    ///
    /// Destination keys already carry the `backups/` prefix, so the root is
    /// the base directory itself.
    pub fn local_destination_root(&self) -> PathBuf {
        self.base_dir.clone()
    }

    /// Directory holding local backup artifacts
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Get the path to the configuration file
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the metadata ledger
    pub fn ledger_file(&self) -> PathBuf {
        self.base_dir.join("ledger.jsonl")
    }

    /// Get the path to one domain's live record file
    pub fn domain_file(&self, domain: DomainId) -> PathBuf {
        self.data_dir().join(format!("{}.json", domain))
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), BackupError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| BackupError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.data_dir())
            .map_err(|e| BackupError::Io(format!("Failed to create data directory: {}", e)))?;

        std::fs::create_dir_all(self.backup_dir())
            .map_err(|e| BackupError::Io(format!("Failed to create backup directory: {}", e)))?;

        Ok(())
    }

    /// Check if Keepsafe has been initialized (config file exists)
    pub fn is_initialized(&self) -> bool {
        self.config_file().exists()
    }
}

/// Resolve the default base directory for this platform
fn resolve_default_path() -> Result<PathBuf, BackupError> {
    ProjectDirs::from("app", "keepsafe", "keepsafe")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| BackupError::Config("Could not determine a home directory".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_custom_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.base_dir(), temp_dir.path());
        assert_eq!(paths.data_dir(), temp_dir.path().join("data"));
        assert_eq!(paths.backup_dir(), temp_dir.path().join("backups"));
    }

    #[test]
    fn test_env_var_override() {
        let temp_dir = TempDir::new().unwrap();
        let custom_path = temp_dir.path().to_str().unwrap();

        env::set_var(DATA_DIR_ENV, custom_path);

        let paths = EnginePaths::new().unwrap();
        assert_eq!(paths.base_dir(), temp_dir.path());

        env::remove_var(DATA_DIR_ENV);
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp_dir.path().to_path_buf());

        paths.ensure_directories().unwrap();

        assert!(paths.data_dir().exists());
        assert!(paths.backup_dir().exists());
    }

    #[test]
    fn test_file_paths() {
        let temp_dir = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.config_file(), temp_dir.path().join("config.json"));
        assert_eq!(paths.ledger_file(), temp_dir.path().join("ledger.jsonl"));
        assert_eq!(
            paths.domain_file(DomainId::Symbols),
            temp_dir.path().join("data").join("symbols.json")
        );
    }
}
