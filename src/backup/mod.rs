//! Backup and restore orchestration for Keepsafe
//!
//! # Architecture
//!
//! - `BackupEngine`: builds and runs backups, lists them, restores them and
//!   owns the live configuration
//! - `RestoreCoordinator`: validates, stages and applies one backup with
//!   rollback on partial failure
//! - `RetentionReaper`: deletes backups older than the retention window
//! - `OperationLock` / `ProcessLock` / `CancellationToken`: one backup or
//!   restore at a time across threads and processes, cancellable between
//!   stages
//!
//! # Retention Policy
//!
//! A backup is deleted once it is strictly older than `retentionDays`,
//! except that the newest completed backup at each destination is always
//! kept.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keepsafe::backup::BackupEngine;
//! use keepsafe::config::EnginePaths;
//! use keepsafe::storage::JsonFileDomain;
//!
//! let paths = EnginePaths::new()?;
//! let mut builder = BackupEngine::builder().paths(paths.clone());
//! for domain in JsonFileDomain::all(&paths) {
//!     builder = builder.provider(Arc::new(domain));
//! }
//! let engine = Arc::new(builder.build()?);
//!
//! let backup = engine.trigger_manual_backup()?;
//! let report = engine.restore(&backup.id);
//! println!("{}", report.summary());
//! ```

mod clock;
mod engine;
mod lock;
mod restore;
mod retention;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{BackupEngine, BackupEngineBuilder};
pub use lock::{
    CancellationToken, OperationGuard, OperationKind, OperationLock, ProcessLock, ProcessLockGuard,
};
pub use restore::{RestoreCoordinator, RestoreReport, RestoreState, RollbackFailure, StagedBackup};
pub use retention::{select_candidates, ReapFailure, ReapReport, RetentionReaper};
