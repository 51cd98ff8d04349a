//! Keepsafe - Backup & Recovery Engine
//!
//! Keepsafe takes point-in-time snapshots of an application's data domains,
//! optionally encrypts them, writes them to local and cloud destinations,
//! records every attempt in a durable metadata ledger, deletes old backups on
//! a retention window and restores a chosen backup atomically with rollback.
//!
//! # Modules
//!
//! - `backup`: the engine, restore coordinator, retention reaper and
//!   operation lock
//! - `snapshot`: snapshot composition, manifests, checksums and codecs
//! - `crypto`: the AES-256-GCM envelope and key derivation
//! - `destination`: local and cloud artifact storage
//! - `ledger`: the append-only backup history
//! - `schedule`: next-run computation and the background scheduler
//! - `domain`: the data domain contract
//! - `storage`: file-backed domain providers and atomic file I/O
//! - `config`: paths and the backup configuration
//! - `cli`: command handlers for the `keepsafe` binary

pub mod backup;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod destination;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod schedule;
pub mod snapshot;
pub mod storage;

pub use error::{BackupError, BackupResult};
