//! Backup metadata entries and ledger events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::destination::DestinationKind;

/// What started a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Manual,
    Scheduled,
}

impl std::fmt::Display for BackupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupType::Manual => write!(f, "manual"),
            BackupType::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// Lifecycle of a backup attempt
///
/// `Pending → InProgress → (Completed | Failed | Cancelled)`. A status never
/// moves backwards and terminal statuses never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl BackupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackupStatus::Completed | BackupStatus::Failed | BackupStatus::Cancelled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            BackupStatus::Pending => 0,
            BackupStatus::InProgress => 1,
            _ => 2,
        }
    }

    /// Whether an entry in this status may be re-recorded as `next`
    pub fn can_transition_to(&self, next: BackupStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupStatus::Pending => write!(f, "pending"),
            BackupStatus::InProgress => write!(f, "in_progress"),
            BackupStatus::Completed => write!(f, "completed"),
            BackupStatus::Failed => write!(f, "failed"),
            BackupStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One backup attempt and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Unique id (UUID v4), also the artifact key stem
    pub id: String,
    /// When the run started
    pub timestamp: DateTime<Utc>,
    /// Size of the stored payload in bytes (0 until written)
    pub size: u64,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    /// Operating system that produced the backup
    pub platform: String,
    /// Destinations holding the artifacts
    pub destinations: Vec<DestinationKind>,
    /// Failure message for failed or cancelled runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupMetadata {
    /// A new pending entry for this platform
    pub fn pending(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        backup_type: BackupType,
        destinations: Vec<DestinationKind>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            size: 0,
            backup_type,
            status: BackupStatus::Pending,
            platform: std::env::consts::OS.to_string(),
            destinations,
            error: None,
        }
    }

    /// Copy with a new status
    pub fn with_status(&self, status: BackupStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next
    }

    /// Copy marked failed (or cancelled) with an error message
    pub fn finished_with_error(&self, status: BackupStatus, error: impl Into<String>) -> Self {
        let mut next = self.with_status(status);
        next.error = Some(error.into());
        next
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Short form of the id for display
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// A line in the ledger file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum LedgerEvent {
    /// Full state of an entry at `at`
    Recorded {
        at: DateTime<Utc>,
        metadata: BackupMetadata,
    },
    /// The entry's artifacts were deleted by retention
    Reaped { at: DateTime<Utc>, id: String },
}

impl LedgerEvent {
    pub fn id(&self) -> &str {
        match self {
            LedgerEvent::Recorded { metadata, .. } => &metadata.id,
            LedgerEvent::Reaped { id, .. } => id,
        }
    }
}
