//! Backup configuration for Keepsafe
//!
//! Holds the single live backup configuration: schedule, which data to
//! include, where to write it, encryption and retention. The configuration is
//! persisted as one JSON record and only changes through
//! `BackupConfiguration::apply`, which validates the result.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::paths::EnginePaths;
use crate::domain::DomainId;
use crate::error::BackupError;
use crate::storage::file_io::{read_json_required, write_json_atomic};

/// Time-of-day format for the `time` field
pub const TIME_FORMAT: &str = "%H:%M";

/// How often scheduled backups run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every day at the configured time
    #[default]
    Daily,
    /// Every Monday at the configured time
    Weekly,
    /// On the first day of every month at the configured time
    Monthly,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
        }
    }
}

/// The backup configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfiguration {
    /// Whether scheduled backups run
    pub enabled: bool,

    /// Schedule frequency
    pub frequency: Frequency,

    /// Time of day for scheduled backups ("HH:MM")
    pub time: String,

    /// Include user profiles
    pub include_user_data: bool,

    /// Include communication libraries, messages and symbol sets
    pub include_communication_data: bool,

    /// Include usage analytics and progress data
    pub include_progress_data: bool,

    /// Include application settings
    pub include_settings: bool,

    /// Write backups to the local destination
    pub local_backup: bool,

    /// Write backups to the cloud destination
    pub cloud_backup: bool,

    /// Encrypt backup payloads
    pub encryption_enabled: bool,

    /// Days a backup is kept before it becomes eligible for deletion
    pub retention_days: u32,
}

impl Default for BackupConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Daily,
            time: "02:00".to_string(),
            include_user_data: true,
            include_communication_data: true,
            include_progress_data: true,
            include_settings: true,
            local_backup: true,
            cloud_backup: false,
            encryption_enabled: false,
            retention_days: 30,
        }
    }
}

/// A partial update to the configuration
///
/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationPatch {
    pub enabled: Option<bool>,
    pub frequency: Option<Frequency>,
    pub time: Option<String>,
    pub include_user_data: Option<bool>,
    pub include_communication_data: Option<bool>,
    pub include_progress_data: Option<bool>,
    pub include_settings: Option<bool>,
    pub local_backup: Option<bool>,
    pub cloud_backup: Option<bool>,
    pub encryption_enabled: Option<bool>,
    pub retention_days: Option<u32>,
}

impl ConfigurationPatch {
    /// Check if the patch changes nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl BackupConfiguration {
    /// Parse the configured time of day
    pub fn schedule_time(&self) -> Result<NaiveTime, BackupError> {
        NaiveTime::parse_from_str(self.time.trim(), TIME_FORMAT).map_err(|_| {
            BackupError::Config(format!(
                "Invalid backup time '{}': expected HH:MM (24-hour)",
                self.time
            ))
        })
    }

    /// Domains selected by the include flags, in canonical order
    pub fn selected_domains(&self) -> Vec<DomainId> {
        DomainId::ALL
            .iter()
            .copied()
            .filter(|domain| match domain {
                DomainId::Profiles => self.include_user_data,
                DomainId::Libraries | DomainId::Messages | DomainId::Symbols => {
                    self.include_communication_data
                }
                DomainId::Analytics => self.include_progress_data,
                DomainId::Settings => self.include_settings,
            })
            .collect()
    }

    /// Check the configuration for contradictions
    pub fn validate(&self) -> Result<(), BackupError> {
        self.schedule_time()?;

        if self.retention_days == 0 {
            return Err(BackupError::Config(
                "retentionDays must be at least 1".into(),
            ));
        }

        if self.selected_domains().is_empty() {
            return Err(BackupError::Config(
                "At least one kind of data must be included in backups".into(),
            ));
        }

        if !self.local_backup && !self.cloud_backup {
            return Err(BackupError::Config(
                "At least one destination (local or cloud) must be enabled".into(),
            ));
        }

        Ok(())
    }

    /// Return a copy with `patch` applied, validated
    pub fn apply(&self, patch: &ConfigurationPatch) -> Result<Self, BackupError> {
        let mut next = self.clone();

        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(frequency) = patch.frequency {
            next.frequency = frequency;
        }
        if let Some(time) = &patch.time {
            next.time = time.trim().to_string();
        }
        if let Some(v) = patch.include_user_data {
            next.include_user_data = v;
        }
        if let Some(v) = patch.include_communication_data {
            next.include_communication_data = v;
        }
        if let Some(v) = patch.include_progress_data {
            next.include_progress_data = v;
        }
        if let Some(v) = patch.include_settings {
            next.include_settings = v;
        }
        if let Some(v) = patch.local_backup {
            next.local_backup = v;
        }
        if let Some(v) = patch.cloud_backup {
            next.cloud_backup = v;
        }
        if let Some(v) = patch.encryption_enabled {
            next.encryption_enabled = v;
        }
        if let Some(days) = patch.retention_days {
            next.retention_days = days;
        }

        next.validate()?;
        Ok(next)
    }

    /// Load the configuration from disk, or the defaults if none is saved yet
    pub fn load_or_create(paths: &EnginePaths) -> Result<Self, BackupError> {
        let config_path = paths.config_file();

        if config_path.exists() {
            let config: BackupConfiguration = read_json_required(&config_path)
                .map_err(|e| BackupError::Config(format!("Failed to load configuration: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(BackupConfiguration::default())
        }
    }

    /// Save the configuration to disk
    pub fn save(&self, paths: &EnginePaths) -> Result<(), BackupError> {
        paths.ensure_directories()?;
        write_json_atomic(paths.config_file(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_configuration() {
        let config = BackupConfiguration::default();
        assert!(!config.enabled);
        assert_eq!(config.frequency, Frequency::Daily);
        assert_eq!(config.time, "02:00");
        assert_eq!(config.retention_days, 30);
        assert!(config.local_backup);
        assert!(!config.cloud_backup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_selected_domains_follow_include_flags() {
        let mut config = BackupConfiguration::default();
        assert_eq!(config.selected_domains(), DomainId::ALL.to_vec());

        config.include_communication_data = false;
        config.include_progress_data = false;
        assert_eq!(
            config.selected_domains(),
            vec![DomainId::Profiles, DomainId::Settings]
        );
    }

    #[test]
    fn test_apply_patch() {
        let config = BackupConfiguration::default();
        let patch = ConfigurationPatch {
            frequency: Some(Frequency::Weekly),
            time: Some(" 23:15 ".into()),
            cloud_backup: Some(true),
            ..Default::default()
        };

        let updated = config.apply(&patch).unwrap();
        assert_eq!(updated.frequency, Frequency::Weekly);
        assert_eq!(updated.time, "23:15");
        assert!(updated.cloud_backup);
        // Untouched fields survive
        assert_eq!(updated.retention_days, 30);
    }

    #[test]
    fn test_apply_rejects_invalid_time() {
        let config = BackupConfiguration::default();
        let patch = ConfigurationPatch {
            time: Some("25:00".into()),
            ..Default::default()
        };
        let err = config.apply(&patch).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_apply_rejects_zero_retention() {
        let patch = ConfigurationPatch {
            retention_days: Some(0),
            ..Default::default()
        };
        assert!(BackupConfiguration::default().apply(&patch).is_err());
    }

    #[test]
    fn test_apply_rejects_no_destination() {
        let patch = ConfigurationPatch {
            local_backup: Some(false),
            ..Default::default()
        };
        assert!(BackupConfiguration::default().apply(&patch).is_err());
    }

    #[test]
    fn test_apply_rejects_nothing_included() {
        let patch = ConfigurationPatch {
            include_user_data: Some(false),
            include_communication_data: Some(false),
            include_progress_data: Some(false),
            include_settings: Some(false),
            ..Default::default()
        };
        assert!(BackupConfiguration::default().apply(&patch).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut config = BackupConfiguration::default();
        config.frequency = Frequency::Monthly;
        config.encryption_enabled = true;

        config.save(&paths).unwrap();

        let loaded = BackupConfiguration::load_or_create(&paths).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_persisted_field_names() {
        let json = serde_json::to_value(BackupConfiguration::default()).unwrap();
        assert!(json.get("includeUserData").is_some());
        assert!(json.get("retentionDays").is_some());
        assert_eq!(json["frequency"], "daily");
    }
}
