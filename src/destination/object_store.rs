//! Object store abstraction behind the cloud destination
//!
//! Models the multipart upload protocol of S3-style stores: an upload is
//! created, parts are added, and the upload is either completed (the object
//! appears atomically) or aborted (nothing appears).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use uuid::Uuid;

use crate::storage::file_io::write_bytes_atomic;

use super::validate_key;

/// Errors reported by an object store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("unknown upload: {0}")]
    UnknownUpload(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal multipart object store
pub trait ObjectStore: Send + Sync {
    /// Start an upload for `key`, returning its upload id
    fn create_upload(&self, key: &str) -> Result<String, ObjectStoreError>;

    /// Add part `part_number` (starting at 1) to an upload
    fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        bytes: &[u8],
    ) -> Result<(), ObjectStoreError>;

    /// Publish the uploaded parts, in part order, as one object
    fn complete_upload(&self, upload_id: &str) -> Result<(), ObjectStoreError>;

    /// Discard an upload and its parts
    fn abort_upload(&self, upload_id: &str) -> Result<(), ObjectStoreError>;

    fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Keys starting with `prefix`, sorted
    fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    /// Delete an object; deleting a missing object succeeds
    fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError>;
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, Vec<u8>>,
    uploads: HashMap<String, PendingUpload>,
}

/// In-process object store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<MemoryState>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of uploads neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Number of published objects
    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn create_upload(&self, key: &str) -> Result<String, ObjectStoreError> {
        validate_key(key).map_err(ObjectStoreError::InvalidKey)?;
        let upload_id = Uuid::new_v4().to_string();
        self.state().uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        bytes: &[u8],
    ) -> Result<(), ObjectStoreError> {
        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| ObjectStoreError::UnknownUpload(upload_id.to_string()))?;
        upload.parts.insert(part_number, bytes.to_vec());
        Ok(())
    }

    fn complete_upload(&self, upload_id: &str) -> Result<(), ObjectStoreError> {
        let mut state = self.state();
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| ObjectStoreError::UnknownUpload(upload_id.to_string()))?;
        let object: Vec<u8> = upload.parts.into_values().flatten().collect();
        state.objects.insert(upload.key, object);
        Ok(())
    }

    fn abort_upload(&self, upload_id: &str) -> Result<(), ObjectStoreError> {
        self.state().uploads.remove(upload_id);
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.state()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self
            .state()
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.state().objects.remove(key);
        Ok(())
    }
}

/// Object store backed by a bucket directory (e.g. a synced cloud folder)
///
/// Parts are staged under `.uploads/{upload_id}/` and concatenated into the
/// final object with an atomic rename on completion.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
}

const UPLOADS_DIR: &str = ".uploads";

impl DirectoryObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn upload_dir(&self, upload_id: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(upload_id).map_err(ObjectStoreError::InvalidKey)?;
        Ok(self.root.join(UPLOADS_DIR).join(upload_id))
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(key).map_err(ObjectStoreError::InvalidKey)?;
        Ok(self.root.join(key))
    }
}

fn unavailable(context: &str, err: std::io::Error) -> ObjectStoreError {
    ObjectStoreError::Unavailable(format!("{}: {}", context, err))
}

impl ObjectStore for DirectoryObjectStore {
    fn create_upload(&self, key: &str) -> Result<String, ObjectStoreError> {
        validate_key(key).map_err(ObjectStoreError::InvalidKey)?;
        let upload_id = Uuid::new_v4().to_string();
        let dir = self.upload_dir(&upload_id)?;

        fs::create_dir_all(&dir).map_err(|e| unavailable("create upload", e))?;
        fs::write(dir.join("key"), key).map_err(|e| unavailable("create upload", e))?;

        Ok(upload_id)
    }

    fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        bytes: &[u8],
    ) -> Result<(), ObjectStoreError> {
        let dir = self.upload_dir(upload_id)?;
        if !dir.exists() {
            return Err(ObjectStoreError::UnknownUpload(upload_id.to_string()));
        }
        fs::write(dir.join(format!("part-{:06}", part_number)), bytes)
            .map_err(|e| unavailable("upload part", e))
    }

    fn complete_upload(&self, upload_id: &str) -> Result<(), ObjectStoreError> {
        let dir = self.upload_dir(upload_id)?;
        let key = fs::read_to_string(dir.join("key"))
            .map_err(|_| ObjectStoreError::UnknownUpload(upload_id.to_string()))?;

        let mut part_paths: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| unavailable("complete upload", e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("part-"))
            })
            .collect();
        // Zero-padded part numbers sort in upload order
        part_paths.sort();

        let mut object = Vec::new();
        for part in &part_paths {
            let bytes = fs::read(part).map_err(|e| unavailable("complete upload", e))?;
            object.extend_from_slice(&bytes);
        }

        write_bytes_atomic(self.object_path(&key)?, &object)
            .map_err(|e| ObjectStoreError::Unavailable(e.to_string()))?;

        fs::remove_dir_all(&dir).map_err(|e| unavailable("complete upload", e))
    }

    fn abort_upload(&self, upload_id: &str) -> Result<(), ObjectStoreError> {
        let dir = self.upload_dir(upload_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable("abort upload", e)),
        }
    }

    fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.object_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(unavailable("get object", e)),
        }
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        if self.root.exists() {
            collect_keys(&self.root, &self.root, &mut keys)?;
        }
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable("delete object", e)),
        }
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> Result<(), ObjectStoreError> {
    for entry in fs::read_dir(dir).map_err(|e| unavailable("list objects", e))? {
        let path = entry.map_err(|e| unavailable("list objects", e))?.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if relative.starts_with(UPLOADS_DIR) {
            continue;
        }

        if path.is_dir() {
            collect_keys(root, &path, keys)?;
        } else if let Some(key) = relative.to_str() {
            if !key.ends_with(".tmp") {
                keys.push(key.replace('\\', "/"));
            }
        }
    }
    Ok(())
}
