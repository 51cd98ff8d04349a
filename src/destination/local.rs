//! Local filesystem destination

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::backup::CancellationToken;
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::write_bytes_atomic;

use super::{validate_key, DestinationKind, DestinationWriter, BACKUP_PREFIX};

/// Stores artifacts as files under a root directory
#[derive(Debug, Clone)]
pub struct LocalDestination {
    root: PathBuf,
}

impl LocalDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> BackupResult<PathBuf> {
        validate_key(key).map_err(|message| BackupError::Write {
            destination: DestinationKind::Local,
            message,
        })?;
        Ok(self.root.join(key))
    }
}

impl DestinationWriter for LocalDestination {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Local
    }

    fn put(&self, key: &str, bytes: &[u8], cancel: &CancellationToken) -> BackupResult<()> {
        let path = self.resolve(key)?;
        cancel.check()?;

        write_bytes_atomic(&path, bytes).map_err(|e| BackupError::Write {
            destination: DestinationKind::Local,
            message: e.to_string(),
        })?;

        debug!(key, bytes = bytes.len(), "wrote local artifact");
        Ok(())
    }

    fn get(&self, key: &str) -> BackupResult<Vec<u8>> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackupError::key_not_found(key))
            }
            Err(e) => Err(BackupError::Read {
                destination: DestinationKind::Local,
                message: format!("{}: {}", path.display(), e),
            }),
        }
    }

    fn list(&self) -> BackupResult<Vec<String>> {
        let dir = self.root.join(BACKUP_PREFIX.trim_end_matches('/'));
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir).map_err(|e| BackupError::Read {
            destination: DestinationKind::Local,
            message: format!("Failed to read {}: {}", dir.display(), e),
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::Read {
                destination: DestinationKind::Local,
                message: e.to_string(),
            })?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".tmp") {
                    keys.push(format!("{}{}", BACKUP_PREFIX, name));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> BackupResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::Write {
                destination: DestinationKind::Local,
                message: format!("Failed to delete {}: {}", path.display(), e),
            }),
        }
    }

    fn discard_partial(&self) -> BackupResult<usize> {
        let dir = self.root.join(BACKUP_PREFIX.trim_end_matches('/'));
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".tmp"));
            if is_temp && path.is_file() {
                fs::remove_file(&path)?;
                debug!(path = %path.display(), "removed partial write");
                removed += 1;
            }
        }
        Ok(removed)
    }
}
