//! Mutual exclusion and cooperative cancellation
//!
//! At most one backup or restore runs at a time. A second caller gets
//! `BackupError::Busy` immediately instead of queueing behind the first.
//! `OperationLock` covers threads of one process; `ProcessLock` extends the
//! same rule to every process sharing a ledger.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};

/// The kind of long-running operation holding the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Backup,
    Restore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Backup => write!(f, "backup"),
            OperationKind::Restore => write!(f, "restore"),
        }
    }
}

/// Shared flag checked between pipeline stages
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation has been requested
    pub fn check(&self) -> BackupResult<()> {
        if self.is_cancelled() {
            Err(BackupError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
struct ActiveOperation {
    kind: OperationKind,
    restore_target: Option<String>,
    cancel: CancellationToken,
}

/// Process-wide lock over backup and restore
#[derive(Debug, Clone, Default)]
pub struct OperationLock {
    active: Arc<Mutex<Option<ActiveOperation>>>,
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Option<ActiveOperation>> {
        // A panic while holding the lock leaves the Option intact
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock without waiting
    ///
    /// `restore_target` names the backup being restored so that retention
    /// can leave it alone while the restore runs.
    pub fn try_acquire(
        &self,
        kind: OperationKind,
        restore_target: Option<String>,
    ) -> BackupResult<OperationGuard> {
        let mut state = self.state();
        if let Some(active) = state.as_ref() {
            return Err(BackupError::Busy {
                active: active.kind,
            });
        }

        let cancel = CancellationToken::new();
        *state = Some(ActiveOperation {
            kind,
            restore_target,
            cancel: cancel.clone(),
        });

        Ok(OperationGuard {
            lock: self.clone(),
            cancel,
        })
    }

    /// The operation currently holding the lock
    pub fn active(&self) -> Option<OperationKind> {
        self.state().as_ref().map(|a| a.kind)
    }

    /// Backup id targeted by an in-flight restore
    pub fn restore_target(&self) -> Option<String> {
        self.state()
            .as_ref()
            .and_then(|a| a.restore_target.clone())
    }

    /// Signal cancellation to the running operation
    ///
    /// Returns the kind of operation signalled, if any.
    pub fn cancel_active(&self) -> Option<OperationKind> {
        let state = self.state();
        state.as_ref().map(|a| {
            a.cancel.cancel();
            a.kind
        })
    }

    fn release(&self) {
        *self.state() = None;
    }
}

/// Holds the lock until dropped
#[derive(Debug)]
pub struct OperationGuard {
    lock: OperationLock,
    cancel: CancellationToken,
}

impl OperationGuard {
    /// Token cancelled by `OperationLock::cancel_active`
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Advisory lock file shared by every process using one ledger
#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without waiting
    ///
    /// The holder's operation kind is written into the file so a contended
    /// caller can report what it is waiting on.
    pub fn try_acquire(&self, kind: OperationKind) -> BackupResult<ProcessLockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;

        if !file.try_lock_exclusive()? {
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let active = match holder.trim() {
                "restore" => OperationKind::Restore,
                _ => OperationKind::Backup,
            };
            return Err(BackupError::Busy { active });
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(kind.to_string().as_bytes())?;

        Ok(ProcessLockGuard { _file: file })
    }
}

/// Holds the lock file open; closing it releases the lock
#[derive(Debug)]
pub struct ProcessLockGuard {
    _file: File,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_busy() {
        let lock = OperationLock::new();
        let _guard = lock.try_acquire(OperationKind::Backup, None).unwrap();

        let err = lock
            .try_acquire(OperationKind::Restore, Some("b1".into()))
            .unwrap_err();
        assert!(matches!(
            err,
            BackupError::Busy {
                active: OperationKind::Backup
            }
        ));
    }

    #[test]
    fn test_drop_releases() {
        let lock = OperationLock::new();
        {
            let _guard = lock.try_acquire(OperationKind::Backup, None).unwrap();
            assert_eq!(lock.active(), Some(OperationKind::Backup));
        }
        assert_eq!(lock.active(), None);
        assert!(lock.try_acquire(OperationKind::Restore, None).is_ok());
    }

    #[test]
    fn test_restore_target_visible_while_held() {
        let lock = OperationLock::new();
        let guard = lock
            .try_acquire(OperationKind::Restore, Some("b7".into()))
            .unwrap();
        assert_eq!(lock.restore_target().as_deref(), Some("b7"));
        drop(guard);
        assert_eq!(lock.restore_target(), None);
    }

    #[test]
    fn test_cancel_active_reaches_guard_token() {
        let lock = OperationLock::new();
        assert_eq!(lock.cancel_active(), None);

        let guard = lock.try_acquire(OperationKind::Backup, None).unwrap();
        assert!(guard.cancellation().check().is_ok());

        assert_eq!(lock.cancel_active(), Some(OperationKind::Backup));
        assert!(guard.cancellation().check().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_process_lock_excludes_second_holder() {
        let temp = TempDir::new().unwrap();
        let lock = ProcessLock::new(temp.path().join("ledger.lock"));

        let guard = lock.try_acquire(OperationKind::Restore).unwrap();
        let err = ProcessLock::new(lock.path())
            .try_acquire(OperationKind::Backup)
            .unwrap_err();
        assert!(matches!(
            err,
            BackupError::Busy {
                active: OperationKind::Restore
            }
        ));

        drop(guard);
        assert!(lock.try_acquire(OperationKind::Backup).is_ok());
    }
}
