//! Backup destinations
//!
//! A destination stores opaque byte artifacts under string keys. Every
//! backup writes two keys per destination:
//!
//! - `backups/{id}.snapshot`: the (optionally encrypted) encoded snapshot
//! - `backups/{id}.manifest.json`: the `ManifestRecord` sidecar
//!
//! Writes are idempotent and never leave partial bytes behind.

mod cloud;
mod local;
pub mod object_store;
mod s3;

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::backup::CancellationToken;
use crate::error::BackupResult;

pub use cloud::{CloudDestination, DEFAULT_PART_SIZE};
pub use local::LocalDestination;
pub use object_store::{DirectoryObjectStore, MemoryObjectStore, ObjectStore, ObjectStoreError};
pub use s3::{S3ObjectStore, S3Settings};

/// Prefix shared by every backup key
pub const BACKUP_PREFIX: &str = "backups/";

const SNAPSHOT_SUFFIX: &str = ".snapshot";
const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Where a backup is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    Local,
    Cloud,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Local => write!(f, "local"),
            DestinationKind::Cloud => write!(f, "cloud"),
        }
    }
}

/// Storage for backup artifacts
pub trait DestinationWriter: Send + Sync {
    /// Which destination this is
    fn kind(&self) -> DestinationKind;

    /// Store `bytes` under `key`, replacing any existing object
    ///
    /// On failure or cancellation no partial object is left at `key`.
    fn put(&self, key: &str, bytes: &[u8], cancel: &CancellationToken) -> BackupResult<()>;

    /// Fetch the object at `key`
    fn get(&self, key: &str) -> BackupResult<Vec<u8>>;

    /// Keys under `backups/`, sorted
    fn list(&self) -> BackupResult<Vec<String>>;

    /// Remove `key`; removing a missing key succeeds
    fn delete(&self, key: &str) -> BackupResult<()>;

    /// Remove the leftovers of writes cut short by a crash
    ///
    /// Returns how many were removed. Only call while no write is running.
    fn discard_partial(&self) -> BackupResult<usize> {
        Ok(0)
    }
}

/// Key of a backup's payload
pub fn snapshot_key(id: &str) -> String {
    format!("{}{}{}", BACKUP_PREFIX, id, SNAPSHOT_SUFFIX)
}

/// Key of a backup's manifest record
pub fn manifest_key(id: &str) -> String {
    format!("{}{}{}", BACKUP_PREFIX, id, MANIFEST_SUFFIX)
}

/// Check that a key is a relative path that stays inside its root
pub(crate) fn validate_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("key is empty".to_string());
    }

    let path = Path::new(key);
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(format!("key '{}' escapes the destination root", key)),
        }
    }

    Ok(())
}
