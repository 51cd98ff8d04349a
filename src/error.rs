//! Custom error types for Keepsafe
//!
//! This module defines the error taxonomy shared by every stage of the backup
//! and restore pipelines, using thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::backup::OperationKind;
use crate::destination::DestinationKind;
use crate::domain::DomainId;
use crate::ledger::BackupStatus;
use crate::snapshot::SnapshotFormat;

/// Why an encrypted payload could not be opened (or sealed)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncryptionFailure {
    /// The key check did not authenticate: wrong passphrase or device secret
    #[error("wrong passphrase or key")]
    WrongKey,

    /// The key is right but the payload is truncated, malformed or tampered
    #[error("encrypted payload is corrupted: {0}")]
    Corrupted(String),

    /// The payload is encrypted but no key source was configured
    #[error("payload is encrypted but no key is configured")]
    MissingKey,

    /// Any other failure of the primitive (cipher setup, key derivation)
    #[error("{0}")]
    Failed(String),
}

/// The main error type for Keepsafe operations
#[derive(Error, Debug, Clone)]
pub enum BackupError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A domain provider failed to export its records
    #[error("Export of domain '{domain}' failed: {message}")]
    Export { domain: DomainId, message: String },

    /// Snapshot encoding errors
    #[error("Encode error: {0}")]
    Encode(String),

    /// Snapshot decoding errors
    #[error("Decode error: {0}")]
    Decode(String),

    /// An export-only format was presented for restore
    #[error("{format} is an export-only format and cannot be restored")]
    ExportOnlyFormat { format: SnapshotFormat },

    /// Encryption errors
    #[error("Encryption error: {0}")]
    Encryption(EncryptionFailure),

    /// A destination could not be written (unreachable, full, cancelled upload)
    #[error("Write to {destination} destination failed: {message}")]
    Write {
        destination: DestinationKind,
        message: String,
    },

    /// A destination could not be read
    #[error("Read from {destination} destination failed: {message}")]
    Read {
        destination: DestinationKind,
        message: String,
    },

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Stored bytes do not match their recorded checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A domain provider rejected the records it was asked to apply
    #[error("Apply of domain '{domain}' failed: {message}")]
    Apply { domain: DomainId, message: String },

    /// Another backup or restore is already running
    #[error("Busy: a {active} is already in progress")]
    Busy { active: OperationKind },

    /// A backup run ended without completing
    #[error("Backup {id} {status}: {message}")]
    Incomplete {
        id: String,
        status: BackupStatus,
        message: String,
    },

    /// The operation was cancelled cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// The metadata ledger could not be read or written
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),
}

impl BackupError {
    /// Create a "not found" error for backups
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for destination keys
    pub fn key_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Key",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a busy error
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Check if this error came from cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<EncryptionFailure> for BackupError {
    fn from(failure: EncryptionFailure) -> Self {
        Self::Encryption(failure)
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for Keepsafe operations
pub type BackupResult<T> = Result<T, BackupError>;
