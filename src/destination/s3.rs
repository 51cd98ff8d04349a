//! Amazon S3 object store
//!
//! Works against AWS and S3-compatible services (MinIO, Wasabi, DigitalOcean
//! Spaces) through a custom endpoint. Credentials come from the standard AWS
//! chain (environment, profile files, instance metadata).
//!
//! The engine is synchronous, so each store owns a small current-thread
//! tokio runtime and blocks on the SDK's futures.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};
use tracing::{debug, info, warn};

use super::object_store::{ObjectStore, ObjectStoreError};
use super::validate_key;

/// Bucket, region and key prefix of an S3 store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Endpoint of an S3-compatible service; path-style addressing is used
    pub endpoint: Option<String>,
    /// Prepended to every key, always ending in `/` when set
    pub prefix: String,
}

impl S3Settings {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
            prefix: String::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let mut prefix: String = prefix.into().trim_matches('/').to_string();
        if !prefix.is_empty() {
            prefix.push('/');
        }
        self.prefix = prefix;
        self
    }

    /// Bucket key for a store key
    fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Store key for a bucket key, if it lies under the prefix
    fn store_key<'a>(&self, object_key: &'a str) -> Option<&'a str> {
        object_key.strip_prefix(self.prefix.as_str())
    }
}

#[derive(Debug)]
struct OpenUpload {
    key: String,
    parts: Vec<CompletedPart>,
}

/// Object store backed by an S3 bucket
pub struct S3ObjectStore {
    client: Client,
    settings: S3Settings,
    runtime: Runtime,
    uploads: Mutex<HashMap<String, OpenUpload>>,
}

fn unavailable(context: &str, err: impl std::error::Error) -> ObjectStoreError {
    ObjectStoreError::Unavailable(format!("{}: {}", context, DisplayErrorContext(err)))
}

impl S3ObjectStore {
    /// Build a client for `settings`
    ///
    /// No request is sent; an unreachable bucket shows up on first use.
    pub fn connect(settings: S3Settings) -> Result<Self, ObjectStoreError> {
        if settings.bucket.trim().is_empty() {
            return Err(ObjectStoreError::Unavailable("bucket name is empty".into()));
        }

        let runtime = RuntimeBuilder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| unavailable("start S3 runtime", e))?;
        let client = runtime.block_on(Self::create_client(&settings));

        info!(
            bucket = %settings.bucket,
            region = %settings.region,
            prefix = %settings.prefix,
            "S3 store ready"
        );

        Ok(Self {
            client,
            settings,
            runtime,
            uploads: Mutex::new(HashMap::new()),
        })
    }

    async fn create_client(settings: &S3Settings) -> Client {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint {
            debug!(endpoint = %endpoint, "using custom S3 endpoint");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Client::from_conf(builder.build())
    }

    pub fn settings(&self) -> &S3Settings {
        &self.settings
    }

    fn uploads(&self) -> MutexGuard<'_, HashMap<String, OpenUpload>> {
        self.uploads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn upload_key(&self, upload_id: &str) -> Result<String, ObjectStoreError> {
        self.uploads()
            .get(upload_id)
            .map(|u| u.key.clone())
            .ok_or_else(|| ObjectStoreError::UnknownUpload(upload_id.to_string()))
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ObjectStore for S3ObjectStore {
    fn create_upload(&self, key: &str) -> Result<String, ObjectStoreError> {
        validate_key(key).map_err(ObjectStoreError::InvalidKey)?;
        let object_key = self.settings.object_key(key);

        let output = self
            .runtime
            .block_on(
                self.client
                    .create_multipart_upload()
                    .bucket(&self.settings.bucket)
                    .key(&object_key)
                    .send(),
            )
            .map_err(|e| unavailable("create multipart upload", e))?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| ObjectStoreError::Unavailable("no upload id returned".into()))?
            .to_string();

        self.uploads().insert(
            upload_id.clone(),
            OpenUpload {
                key: object_key,
                parts: Vec::new(),
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
        let key = self.upload_key(upload_id)?;
        let part_number = i32::try_from(part_number)
            .map_err(|_| ObjectStoreError::Unavailable("too many parts".into()))?;

        let output = self
            .runtime
            .block_on(
                self.client
                    .upload_part()
                    .bucket(&self.settings.bucket)
                    .key(&key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(bytes.to_vec()))
                    .send(),
            )
            .map_err(|e| unavailable("upload part", e))?;

        let part = CompletedPart::builder()
            .part_number(part_number)
            .e_tag(output.e_tag().unwrap_or_default())
            .build();

        let mut uploads = self.uploads();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| ObjectStoreError::UnknownUpload(upload_id.to_string()))?;
        upload.parts.retain(|p| p.part_number() != Some(part_number));
        upload.parts.push(part);
        Ok(())
    }

    fn complete_upload(&self, upload_id: &str) -> Result<(), ObjectStoreError> {
        let (key, mut parts) = {
            let uploads = self.uploads();
            let upload = uploads
                .get(upload_id)
                .ok_or_else(|| ObjectStoreError::UnknownUpload(upload_id.to_string()))?;
            (upload.key.clone(), upload.parts.clone())
        };
        parts.sort_by_key(|p| p.part_number());

        self.runtime
            .block_on(
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.settings.bucket)
                    .key(&key)
                    .upload_id(upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send(),
            )
            .map_err(|e| unavailable("complete multipart upload", e))?;

        self.uploads().remove(upload_id);
        debug!(key = %key, "completed multipart upload");
        Ok(())
    }

    fn abort_upload(&self, upload_id: &str) -> Result<(), ObjectStoreError> {
        let Some(upload) = self.uploads().remove(upload_id) else {
            return Ok(());
        };

        self.runtime
            .block_on(
                self.client
                    .abort_multipart_upload()
                    .bucket(&self.settings.bucket)
                    .key(&upload.key)
                    .upload_id(upload_id)
                    .send(),
            )
            .map_err(|e| unavailable("abort multipart upload", e))?;

        warn!(key = %upload.key, "aborted multipart upload");
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        validate_key(key).map_err(ObjectStoreError::InvalidKey)?;
        let object_key = self.settings.object_key(key);

        self.runtime.block_on(async {
            let output = match self
                .client
                .get_object()
                .bucket(&self.settings.bucket)
                .key(&object_key)
                .send()
                .await
            {
                Ok(output) => output,
                Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                    return Err(ObjectStoreError::NotFound(key.to_string()));
                }
                Err(e) => return Err(unavailable("get object", e)),
            };

            let body = output
                .body
                .collect()
                .await
                .map_err(|e| unavailable("read object body", e))?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let object_prefix = self.settings.object_key(prefix);

        let mut keys = self.runtime.block_on(async {
            let mut keys = Vec::new();
            let mut continuation_token: Option<String> = None;

            loop {
                let mut request = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.settings.bucket)
                    .prefix(&object_prefix);
                if let Some(token) = continuation_token.take() {
                    request = request.continuation_token(token);
                }

                let output = request
                    .send()
                    .await
                    .map_err(|e| unavailable("list objects", e))?;

                for object in output.contents() {
                    if let Some(key) = object.key().and_then(|k| self.settings.store_key(k)) {
                        keys.push(key.to_string());
                    }
                }

                if output.is_truncated() == Some(true) {
                    continuation_token = output.next_continuation_token().map(str::to_string);
                    if continuation_token.is_none() {
                        break;
                    }
                } else {
                    break;
                }
            }

            Ok::<_, ObjectStoreError>(keys)
        })?;

        keys.sort();
        Ok(keys)
    }

    fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        validate_key(key).map_err(ObjectStoreError::InvalidKey)?;
        let object_key = self.settings.object_key(key);

        // S3 reports success for keys that do not exist
        self.runtime
            .block_on(
                self.client
                    .delete_object()
                    .bucket(&self.settings.bucket)
                    .key(&object_key)
                    .send(),
            )
            .map_err(|e| unavailable("delete object", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_store() -> S3ObjectStore {
        S3ObjectStore::connect(
            S3Settings::new("keepsafe-test", "us-east-1")
                .with_endpoint("http://127.0.0.1:9")
                .with_prefix("devices/tablet-1"),
        )
        .unwrap()
    }

    #[test]
    fn test_prefix_is_normalised() {
        let settings = S3Settings::new("b", "eu-west-1").with_prefix("/keepsafe/");
        assert_eq!(settings.prefix, "keepsafe/");
        assert_eq!(
            settings.object_key("backups/a.snapshot"),
            "keepsafe/backups/a.snapshot"
        );
        assert_eq!(
            settings.store_key("keepsafe/backups/a.snapshot"),
            Some("backups/a.snapshot")
        );
        assert_eq!(settings.store_key("other/backups/a.snapshot"), None);

        let bare = S3Settings::new("b", "eu-west-1").with_prefix("");
        assert_eq!(bare.object_key("backups/a.snapshot"), "backups/a.snapshot");
    }

    #[test]
    fn test_connect_sends_no_request() {
        let store = offline_store();
        assert_eq!(store.settings().bucket, "keepsafe-test");
        assert!(format!("{:?}", store).contains("devices/tablet-1/"));
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let err = S3ObjectStore::connect(S3Settings::new(" ", "us-east-1")).unwrap_err();
        assert!(matches!(err, ObjectStoreError::Unavailable(_)));
    }

    #[test]
    fn test_unknown_upload_needs_no_round_trip() {
        let store = offline_store();
        assert!(matches!(
            store.upload_part("nope", 1, b"x"),
            Err(ObjectStoreError::UnknownUpload(_))
        ));
        assert!(matches!(
            store.complete_upload("nope"),
            Err(ObjectStoreError::UnknownUpload(_))
        ));
        assert!(store.abort_upload("nope").is_ok());
    }

    #[test]
    fn test_invalid_key_rejected_before_request() {
        let store = offline_store();
        assert!(matches!(
            store.create_upload("../escape"),
            Err(ObjectStoreError::InvalidKey(_))
        ));
    }
}
