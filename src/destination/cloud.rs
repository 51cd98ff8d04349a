//! Cloud destination over a multipart object store

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backup::CancellationToken;
use crate::error::{BackupError, BackupResult};

use super::object_store::{ObjectStore, ObjectStoreError};
use super::{DestinationKind, DestinationWriter, BACKUP_PREFIX};

/// Default multipart chunk size (5 MiB, the S3 minimum part size)
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Uploads artifacts to an object store in parts
#[derive(Clone)]
pub struct CloudDestination {
    store: Arc<dyn ObjectStore>,
    part_size: usize,
}

impl CloudDestination {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Use a different part size (minimum 1 byte)
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    fn write_error(err: impl ToString) -> BackupError {
        BackupError::Write {
            destination: DestinationKind::Cloud,
            message: err.to_string(),
        }
    }

    fn upload_parts(
        &self,
        upload_id: &str,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> BackupResult<()> {
        // S3 will not complete an upload that has no parts
        let parts: Vec<&[u8]> = if bytes.is_empty() {
            vec![bytes]
        } else {
            bytes.chunks(self.part_size).collect()
        };

        for (index, chunk) in parts.into_iter().enumerate() {
            cancel.check()?;
            let part_number = index as u32 + 1;
            self.store
                .upload_part(upload_id, part_number, chunk)
                .map_err(Self::write_error)?;
            debug!(upload_id, part_number, bytes = chunk.len(), "uploaded part");
        }
        cancel.check()?;
        self.store
            .complete_upload(upload_id)
            .map_err(Self::write_error)
    }
}

impl std::fmt::Debug for CloudDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudDestination")
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

impl DestinationWriter for CloudDestination {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Cloud
    }

    fn put(&self, key: &str, bytes: &[u8], cancel: &CancellationToken) -> BackupResult<()> {
        cancel.check()?;
        let upload_id = self.store.create_upload(key).map_err(Self::write_error)?;

        if let Err(err) = self.upload_parts(&upload_id, bytes, cancel) {
            if let Err(abort_err) = self.store.abort_upload(&upload_id) {
                warn!(key, error = %abort_err, "failed to abort cloud upload");
            }
            return Err(err);
        }

        debug!(key, bytes = bytes.len(), "wrote cloud artifact");
        Ok(())
    }

    fn get(&self, key: &str) -> BackupResult<Vec<u8>> {
        self.store.get_object(key).map_err(|e| match e {
            ObjectStoreError::NotFound(key) => BackupError::key_not_found(key),
            other => BackupError::Read {
                destination: DestinationKind::Cloud,
                message: other.to_string(),
            },
        })
    }

    fn list(&self) -> BackupResult<Vec<String>> {
        self.store
            .list_objects(BACKUP_PREFIX)
            .map_err(|e| BackupError::Read {
                destination: DestinationKind::Cloud,
                message: e.to_string(),
            })
    }

    fn delete(&self, key: &str) -> BackupResult<()> {
        self.store.delete_object(key).map_err(Self::write_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MemoryObjectStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails every part after the first `ok_parts`
    struct FlakyStore {
        inner: MemoryObjectStore,
        ok_parts: u32,
        seen: AtomicU32,
    }

    impl ObjectStore for FlakyStore {
        fn create_upload(&self, key: &str) -> Result<String, ObjectStoreError> {
            self.inner.create_upload(key)
        }

        fn upload_part(&self, id: &str, n: u32, bytes: &[u8]) -> Result<(), ObjectStoreError> {
            if self.seen.fetch_add(1, Ordering::SeqCst) >= self.ok_parts {
                return Err(ObjectStoreError::Unavailable("connection reset".into()));
            }
            self.inner.upload_part(id, n, bytes)
        }

        fn complete_upload(&self, id: &str) -> Result<(), ObjectStoreError> {
            self.inner.complete_upload(id)
        }

        fn abort_upload(&self, id: &str) -> Result<(), ObjectStoreError> {
            self.inner.abort_upload(id)
        }

        fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
            self.inner.get_object(key)
        }

        fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
            self.inner.list_objects(prefix)
        }

        fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
            self.inner.delete_object(key)
        }
    }

    #[test]
    fn test_multipart_round_trip() {
        let store = Arc::new(MemoryObjectStore::new());
        let dest = CloudDestination::new(store.clone()).with_part_size(4);
        let payload = b"a payload spanning several parts".to_vec();

        dest.put("backups/x.snapshot", &payload, &CancellationToken::new())
            .unwrap();

        assert_eq!(dest.get("backups/x.snapshot").unwrap(), payload);
        assert_eq!(dest.list().unwrap(), vec!["backups/x.snapshot"]);
        assert_eq!(store.pending_uploads(), 0);
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = Arc::new(MemoryObjectStore::new());
        let dest = CloudDestination::new(store.clone());
        let cancel = CancellationToken::new();

        dest.put("backups/x.snapshot", b"first", &cancel).unwrap();
        dest.put("backups/x.snapshot", b"second", &cancel).unwrap();

        assert_eq!(store.object_count(), 1);
        assert_eq!(dest.get("backups/x.snapshot").unwrap(), b"second");
    }

    #[test]
    fn test_failed_part_aborts_upload() {
        let store = Arc::new(FlakyStore {
            inner: MemoryObjectStore::new(),
            ok_parts: 2,
            seen: AtomicU32::new(0),
        });
        let dest = CloudDestination::new(store.clone()).with_part_size(2);

        let err = dest
            .put("backups/x.snapshot", b"0123456789", &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(
            err,
            BackupError::Write {
                destination: DestinationKind::Cloud,
                ..
            }
        ));
        assert_eq!(store.inner.pending_uploads(), 0);
        assert!(dest.get("backups/x.snapshot").unwrap_err().is_not_found());
    }

    #[test]
    fn test_cancelled_put_leaves_nothing() {
        let store = Arc::new(MemoryObjectStore::new());
        let dest = CloudDestination::new(store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(dest
            .put("backups/x.snapshot", b"data", &cancel)
            .unwrap_err()
            .is_cancelled());
        assert_eq!(store.pending_uploads(), 0);
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_empty_payload() {
        let store = Arc::new(MemoryObjectStore::new());
        let dest = CloudDestination::new(store);
        dest.put("backups/e.snapshot", b"", &CancellationToken::new())
            .unwrap();
        assert!(dest.get("backups/e.snapshot").unwrap().is_empty());
    }
}
