//! The backup engine
//!
//! `BackupEngine` wires the snapshot composer, codec, encryption layer,
//! destinations, ledger, retention and restore together. It is built once
//! with `BackupEngine::builder()` and shared by `Arc`.
//!
//! # Backup pipeline
//!
//! 1. Record a `pending` ledger entry, then `in_progress`
//! 2. Compose a snapshot of the configured domains
//! 3. Encode it canonically and seal it if encryption is on
//! 4. Write payload then manifest record to each configured destination
//! 5. Record `completed` and run retention
//!
//! A failure at any stage deletes what this run wrote and records the entry
//! as `failed` (or `cancelled`). A run that never finished (the process died
//! mid-backup) is recorded as `failed` the next time the engine starts or
//! runs a backup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BackupConfiguration, ConfigurationPatch, EnginePaths};
use crate::crypto::{seal, KeySource};
use crate::destination::{
    manifest_key, snapshot_key, DestinationKind, DestinationWriter, LocalDestination,
};
use crate::domain::{DomainProvider, DomainRegistry};
use crate::error::{BackupError, BackupResult, EncryptionFailure};
use crate::ledger::{BackupMetadata, BackupStatus, BackupType, MetadataLedger};
use crate::schedule::ScheduleTarget;
use crate::snapshot::{
    bytes_checksum, encode, ManifestRecord, SnapshotComposer, SnapshotFormat,
};

use super::clock::{Clock, SystemClock};
use super::lock::{CancellationToken, OperationKind, OperationLock, ProcessLock};
use super::restore::{RestoreCoordinator, RestoreReport, StagedBackup};
use super::retention::{ReapReport, RetentionReaper};

/// Error recorded on runs found unfinished at startup
const INTERRUPTED: &str = "interrupted before completion";

/// Builds a `BackupEngine`
#[derive(Default)]
pub struct BackupEngineBuilder {
    paths: Option<EnginePaths>,
    ledger_path: Option<PathBuf>,
    config: Option<BackupConfiguration>,
    registry: DomainRegistry,
    local: Option<Arc<dyn DestinationWriter>>,
    cloud: Option<Arc<dyn DestinationWriter>>,
    key_source: Option<KeySource>,
    clock: Option<Arc<dyn Clock>>,
}

impl BackupEngineBuilder {
    /// Use a data directory for configuration, ledger and local backups
    pub fn paths(mut self, paths: EnginePaths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Keep the ledger at an explicit path
    pub fn ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = Some(path.into());
        self
    }

    /// Start from this configuration instead of the saved one
    pub fn configuration(mut self, config: BackupConfiguration) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(mut self, registry: DomainRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn DomainProvider>) -> Self {
        self.registry.register(provider);
        self
    }

    /// Local destination (defaults to the data directory when paths are set)
    pub fn local_destination(mut self, writer: Arc<dyn DestinationWriter>) -> Self {
        self.local = Some(writer);
        self
    }

    pub fn cloud_destination(mut self, writer: Arc<dyn DestinationWriter>) -> Self {
        self.cloud = Some(writer);
        self
    }

    pub fn key_source(mut self, key: KeySource) -> Self {
        self.key_source = Some(key);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> BackupResult<BackupEngine> {
        if let Some(paths) = &self.paths {
            paths.ensure_directories()?;
        }

        let ledger_path = self
            .ledger_path
            .or_else(|| self.paths.as_ref().map(|p| p.ledger_file()))
            .ok_or_else(|| {
                BackupError::Config("Engine needs a data directory or a ledger path".into())
            })?;

        let config = match (self.config, &self.paths) {
            (Some(config), _) => config,
            (None, Some(paths)) => BackupConfiguration::load_or_create(paths)?,
            (None, None) => BackupConfiguration::default(),
        };
        config.validate()?;

        let local = self.local.or_else(|| {
            self.paths.as_ref().map(|p| {
                Arc::new(LocalDestination::new(p.local_destination_root()))
                    as Arc<dyn DestinationWriter>
            })
        });

        let mut destinations = BTreeMap::new();
        if let Some(local) = local {
            destinations.insert(DestinationKind::Local, local);
        }
        if let Some(cloud) = self.cloud {
            destinations.insert(DestinationKind::Cloud, cloud);
        }

        let engine = BackupEngine {
            paths: self.paths,
            config: RwLock::new(config),
            process_lock: ProcessLock::new(ledger_path.with_extension("lock")),
            ledger: MetadataLedger::new(ledger_path),
            registry: self.registry,
            destinations,
            key_source: self.key_source,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            lock: OperationLock::new(),
            reap_lock: Mutex::new(()),
        };

        match engine.process_lock.try_acquire(OperationKind::Backup) {
            Ok(_held) => {
                if let Err(e) = engine.recover_interrupted() {
                    warn!(error = %e, "could not resolve interrupted backups");
                }
            }
            Err(e) if e.is_busy() => debug!("engine in use by another process, skipping recovery"),
            Err(e) => return Err(e),
        }

        Ok(engine)
    }
}

/// Backup and recovery service
pub struct BackupEngine {
    paths: Option<EnginePaths>,
    config: RwLock<BackupConfiguration>,
    ledger: MetadataLedger,
    registry: DomainRegistry,
    destinations: BTreeMap<DestinationKind, Arc<dyn DestinationWriter>>,
    key_source: Option<KeySource>,
    clock: Arc<dyn Clock>,
    lock: OperationLock,
    process_lock: ProcessLock,
    reap_lock: Mutex<()>,
}

impl BackupEngine {
    pub fn builder() -> BackupEngineBuilder {
        BackupEngineBuilder::default()
    }

    /// Run a manual backup now
    ///
    /// Stage failures are reported through the returned entry's status;
    /// `Err` means another operation is running or the ledger is unwritable.
    pub fn trigger_manual_backup(&self) -> BackupResult<BackupMetadata> {
        self.run_backup(BackupType::Manual)
    }

    /// Run a scheduled backup now
    pub fn run_scheduled_backup(&self) -> BackupResult<BackupMetadata> {
        self.run_backup(BackupType::Scheduled)
    }

    /// Backups, newest first
    pub fn list_backups(&self, limit: usize) -> BackupResult<Vec<BackupMetadata>> {
        self.ledger.list(limit)
    }

    /// One backup's ledger entry
    pub fn get_backup(&self, id: &str) -> BackupResult<BackupMetadata> {
        self.ledger
            .get(id)?
            .ok_or_else(|| BackupError::backup_not_found(id))
    }

    /// Resolve a backup id or unique id prefix
    pub fn resolve_backup_id(&self, id_or_prefix: &str) -> BackupResult<String> {
        let matches: Vec<String> = self
            .ledger
            .list_all()?
            .into_iter()
            .map(|m| m.id)
            .filter(|id| id.starts_with(id_or_prefix))
            .collect();

        match matches.as_slice() {
            [id] => Ok(id.clone()),
            [] => Err(BackupError::backup_not_found(id_or_prefix)),
            _ => Err(BackupError::Config(format!(
                "Backup id prefix '{}' is ambiguous",
                id_or_prefix
            ))),
        }
    }

    /// Restore a completed backup
    ///
    /// Retention waits for the restore to finish, so the backup being read
    /// cannot be reaped underneath it.
    pub fn restore(&self, id: &str) -> RestoreReport {
        let guard = match self
            .lock
            .try_acquire(OperationKind::Restore, Some(id.to_string()))
        {
            Ok(guard) => guard,
            Err(e) => return RestoreReport::failed(id, e),
        };
        let _reaping = self.reap_guard();
        let _process = match self.process_lock.try_acquire(OperationKind::Restore) {
            Ok(held) => held,
            Err(e) => return RestoreReport::failed(id, e),
        };

        let sources = match self.restorable_sources(id) {
            Ok(sources) => sources,
            Err(e) => return RestoreReport::failed(id, e),
        };

        let report = self
            .coordinator()
            .restore(id, &sources, guard.cancellation());

        if let Some(err) = &report.error {
            warn!(id, state = %report.state, error = %err, "restore did not commit");
        }
        report
    }

    /// Validate and stage a backup without applying it
    pub fn validate_backup(&self, id: &str) -> BackupResult<StagedBackup> {
        let sources = self.restorable_sources(id)?;
        self.coordinator().stage(id, &sources)
    }

    /// Change the configuration
    ///
    /// The patched configuration is validated against this engine (a cloud
    /// destination and a key must exist before they can be enabled) and
    /// saved before it takes effect.
    pub fn update_configuration(
        &self,
        patch: ConfigurationPatch,
    ) -> BackupResult<BackupConfiguration> {
        let mut config = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let next = config.apply(&patch)?;

        if next.cloud_backup && !self.destinations.contains_key(&DestinationKind::Cloud) {
            return Err(BackupError::Config(
                "Cloud backup needs a cloud destination".into(),
            ));
        }
        if next.local_backup && !self.destinations.contains_key(&DestinationKind::Local) {
            return Err(BackupError::Config(
                "Local backup needs a local destination".into(),
            ));
        }
        if next.encryption_enabled && self.key_source.is_none() {
            return Err(BackupError::Config(
                "Encryption needs a passphrase or device key".into(),
            ));
        }

        if let Some(paths) = &self.paths {
            next.save(paths)?;
        }

        info!(?patch, "configuration updated");
        *config = next.clone();
        Ok(next)
    }

    /// The live configuration
    pub fn configuration(&self) -> BackupConfiguration {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Pick up configuration saved by another process
    ///
    /// Engines without a data directory keep their in-memory configuration.
    pub fn reload_configuration(&self) -> BackupResult<BackupConfiguration> {
        let Some(paths) = &self.paths else {
            return Ok(self.configuration());
        };

        let loaded = BackupConfiguration::load_or_create(paths)?;
        loaded.validate()?;

        let mut config = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *config != loaded {
            info!("configuration reloaded");
            *config = loaded.clone();
        }
        Ok(loaded)
    }

    /// Run retention now
    ///
    /// Fails with `Busy` while another process is running a backup or
    /// restore against the same ledger.
    pub fn reap_expired(&self) -> BackupResult<ReapReport> {
        let _reaping = self.reap_guard();
        let _process = self.process_lock.try_acquire(OperationKind::Backup)?;
        self.reap_locked()
    }

    /// Retention pass; the caller holds the reap and process locks
    fn reap_locked(&self) -> BackupResult<ReapReport> {
        let retention_days = self.configuration().retention_days;
        let protected = self.lock.restore_target();

        RetentionReaper::new(&self.ledger, &self.destinations).reap(
            self.clock.now(),
            retention_days,
            protected.as_deref(),
        )
    }

    fn reap_guard(&self) -> MutexGuard<'_, ()> {
        self.reap_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve runs left `pending` or `in_progress` by a process that died
    ///
    /// Their artifacts and any torn writes are deleted and the entries are
    /// recorded as `failed`. The caller holds the process lock, so no live
    /// run can be among them.
    fn recover_interrupted(&self) -> BackupResult<usize> {
        let stale: Vec<BackupMetadata> = self
            .ledger
            .list_all()?
            .into_iter()
            .filter(|entry| !entry.is_terminal())
            .collect();

        for entry in &stale {
            let written: Vec<(DestinationKind, String)> = entry
                .destinations
                .iter()
                .flat_map(|kind| {
                    [
                        (*kind, snapshot_key(&entry.id)),
                        (*kind, manifest_key(&entry.id)),
                    ]
                })
                .collect();
            self.cleanup(&written);

            self.ledger
                .append(&entry.finished_with_error(BackupStatus::Failed, INTERRUPTED))?;
            warn!(id = %entry.id, status = %entry.status, "resolved interrupted backup");
        }

        for (kind, writer) in &self.destinations {
            match writer.discard_partial() {
                Ok(0) => {}
                Ok(removed) => info!(destination = %kind, removed, "removed partial writes"),
                Err(e) => warn!(destination = %kind, error = %e, "could not remove partial writes"),
            }
        }

        Ok(stale.len())
    }

    /// Cancel the running backup or restore, if any
    pub fn cancel(&self) -> Option<OperationKind> {
        let cancelled = self.lock.cancel_active();
        if let Some(kind) = cancelled {
            info!(operation = %kind, "cancellation requested");
        }
        cancelled
    }

    /// The operation currently running, if any
    pub fn active_operation(&self) -> Option<OperationKind> {
        self.lock.active()
    }

    /// Snapshot the configured domains and encode them for export
    pub fn export_snapshot(&self, format: SnapshotFormat) -> BackupResult<Vec<u8>> {
        let config = self.configuration();
        let snapshot = SnapshotComposer::new(&self.registry).compose(
            &config.selected_domains(),
            self.clock.now(),
            &CancellationToken::new(),
        )?;
        encode(&snapshot, format)
    }

    pub fn paths(&self) -> Option<&EnginePaths> {
        self.paths.as_ref()
    }

    pub fn ledger(&self) -> &MetadataLedger {
        &self.ledger
    }

    fn coordinator(&self) -> RestoreCoordinator<'_> {
        RestoreCoordinator::new(&self.registry, &self.destinations, self.key_source.as_ref())
    }

    /// Destinations to read a completed backup from, local first
    fn restorable_sources(&self, id: &str) -> BackupResult<Vec<DestinationKind>> {
        let metadata = self.get_backup(id)?;
        if metadata.status != BackupStatus::Completed {
            return Err(BackupError::NotFound {
                entity_type: "Completed backup",
                identifier: id.to_string(),
            });
        }

        let mut sources = metadata.destinations;
        sources.sort();
        sources.dedup();
        Ok(sources)
    }

    fn target_destinations(config: &BackupConfiguration) -> Vec<DestinationKind> {
        let mut targets = Vec::new();
        if config.local_backup {
            targets.push(DestinationKind::Local);
        }
        if config.cloud_backup {
            targets.push(DestinationKind::Cloud);
        }
        targets
    }

    fn run_backup(&self, backup_type: BackupType) -> BackupResult<BackupMetadata> {
        let guard = self.lock.try_acquire(OperationKind::Backup, None)?;
        let process = self.process_lock.try_acquire(OperationKind::Backup)?;
        let cancel = guard.cancellation().clone();

        if let Err(e) = self.recover_interrupted() {
            warn!(error = %e, "could not resolve interrupted backups");
        }
        let config = self.configuration();

        let pending = BackupMetadata::pending(
            Uuid::new_v4().to_string(),
            self.clock.now(),
            backup_type,
            Self::target_destinations(&config),
        );
        self.ledger.append(&pending)?;

        let mut metadata = pending.with_status(BackupStatus::InProgress);
        self.ledger.append(&metadata)?;
        info!(id = %metadata.id, kind = %backup_type, "backup started");

        let mut written: Vec<(DestinationKind, String)> = Vec::new();
        let outcome = self.write_backup(&config, &mut metadata, &cancel, &mut written);

        let finished = match outcome {
            Ok(()) => metadata.with_status(BackupStatus::Completed),
            Err(e) => {
                self.cleanup(&written);
                let status = if e.is_cancelled() {
                    BackupStatus::Cancelled
                } else {
                    BackupStatus::Failed
                };
                warn!(id = %metadata.id, status = %status, error = %e, "backup did not complete");
                metadata.finished_with_error(status, e.to_string())
            }
        };

        if let Err(e) = self.ledger.append(&finished) {
            if finished.status == BackupStatus::Completed {
                self.cleanup(&written);
            }
            return Err(e);
        }

        if finished.status == BackupStatus::Completed {
            info!(id = %finished.id, bytes = finished.size, "backup completed");
            let reaped = {
                let _reaping = self.reap_guard();
                self.reap_locked()
            };
            match reaped {
                Ok(report) if !report.reaped.is_empty() => info!("{}", report.summary()),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "retention pass failed"),
            }
        }

        drop(process);
        drop(guard);
        Ok(finished)
    }

    fn write_backup(
        &self,
        config: &BackupConfiguration,
        metadata: &mut BackupMetadata,
        cancel: &CancellationToken,
        written: &mut Vec<(DestinationKind, String)>,
    ) -> BackupResult<()> {
        let mut snapshot = SnapshotComposer::new(&self.registry).compose(
            &config.selected_domains(),
            metadata.timestamp,
            cancel,
        )?;
        snapshot.manifest.encrypted = config.encryption_enabled;

        let encoded = encode(&snapshot, SnapshotFormat::Canonical)?;
        let payload = if config.encryption_enabled {
            let key = self
                .key_source
                .as_ref()
                .ok_or(BackupError::Encryption(EncryptionFailure::MissingKey))?;
            seal(&encoded, key)?
        } else {
            encoded
        };

        let record = ManifestRecord {
            id: metadata.id.clone(),
            timestamp: metadata.timestamp,
            size: payload.len() as u64,
            schema_version: snapshot.manifest.schema_version,
            domains: snapshot.manifest.domains.clone(),
            checksum: bytes_checksum(&payload),
            encrypted: config.encryption_enabled,
        };
        let record_bytes = serde_json::to_vec_pretty(&record)?;

        for kind in &metadata.destinations {
            let writer = self
                .destinations
                .get(kind)
                .ok_or_else(|| BackupError::Write {
                    destination: *kind,
                    message: "destination is not configured".into(),
                })?;

            // Payload first, so a manifest record never points at nothing
            for (key, bytes) in [
                (snapshot_key(&metadata.id), payload.as_slice()),
                (manifest_key(&metadata.id), record_bytes.as_slice()),
            ] {
                cancel.check()?;
                writer.put(&key, bytes, cancel)?;
                written.push((*kind, key));
            }
        }

        metadata.size = record.size;
        Ok(())
    }

    /// Delete every artifact a failed run wrote
    fn cleanup(&self, written: &[(DestinationKind, String)]) {
        for (kind, key) in written.iter().rev() {
            let Some(writer) = self.destinations.get(kind) else {
                continue;
            };
            if let Err(e) = writer.delete(key) {
                error!(destination = %kind, key = %key, error = %e, "cleanup failed");
            }
        }
    }
}

impl ScheduleTarget for BackupEngine {
    fn configuration(&self) -> BackupConfiguration {
        self.reload_configuration().unwrap_or_else(|e| {
            warn!(error = %e, "keeping previous configuration");
            BackupEngine::configuration(self)
        })
    }

    fn run_scheduled(&self) {
        match self.run_scheduled_backup() {
            Ok(metadata) => info!(id = %metadata.id, status = %metadata.status, "scheduled backup finished"),
            Err(e) if e.is_busy() => info!(error = %e, "scheduled backup skipped"),
            Err(e) => error!(error = %e, "scheduled backup could not run"),
        }
    }
}

impl std::fmt::Debug for BackupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupEngine")
            .field("paths", &self.paths)
            .field("registry", &self.registry)
            .field("destinations", &self.destinations.keys().collect::<Vec<_>>())
            .field("encryption_key", &self.key_source.as_ref().map(|k| k.kind()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Frequency;
    use crate::destination::{CloudDestination, MemoryObjectStore};
    use crate::domain::{DomainError, DomainId, RecordSet};
    use crate::storage::JsonFileDomain;
    use serde_json::json;
    use tempfile::TempDir;

    struct Failing(DomainId);

    impl DomainProvider for Failing {
        fn domain(&self) -> DomainId {
            self.0
        }

        fn export(&self) -> Result<RecordSet, DomainError> {
            Err(DomainError::new("locked"))
        }

        fn apply_atomic(&self, records: RecordSet) -> Result<RecordSet, DomainError> {
            Ok(records)
        }
    }

    fn engine_with_files(temp: &TempDir) -> BackupEngine {
        let paths = EnginePaths::with_base_dir(temp.path().to_path_buf());
        let mut builder = BackupEngine::builder().paths(paths.clone());
        for domain in JsonFileDomain::all(&paths) {
            builder = builder.provider(Arc::new(domain));
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_build_requires_ledger_location() {
        let err = BackupEngine::builder().build().unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_manual_backup_writes_artifacts() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_files(&temp);

        let metadata = engine.trigger_manual_backup().unwrap();

        assert_eq!(metadata.status, BackupStatus::Completed);
        assert_eq!(metadata.backup_type, BackupType::Manual);
        assert_eq!(metadata.destinations, vec![DestinationKind::Local]);
        assert!(metadata.size > 0);
        assert!(temp
            .path()
            .join(snapshot_key(&metadata.id))
            .exists());
        assert!(temp.path().join(manifest_key(&metadata.id)).exists());
        assert_eq!(engine.list_backups(10).unwrap(), vec![metadata]);
    }

    #[test]
    fn test_export_failure_records_failed_entry() {
        let temp = TempDir::new().unwrap();
        let engine = BackupEngine::builder()
            .paths(EnginePaths::with_base_dir(temp.path().to_path_buf()))
            .provider(Arc::new(Failing(DomainId::Profiles)))
            .build()
            .unwrap();

        let metadata = engine.trigger_manual_backup().unwrap();

        assert_eq!(metadata.status, BackupStatus::Failed);
        assert!(metadata.error.unwrap().contains("profiles"));
        assert!(LocalDestination::new(temp.path()).list().unwrap().is_empty());
    }

    #[test]
    fn test_update_configuration_persists() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_files(&temp);

        let updated = engine
            .update_configuration(ConfigurationPatch {
                enabled: Some(true),
                frequency: Some(Frequency::Weekly),
                retention_days: Some(7),
                ..ConfigurationPatch::default()
            })
            .unwrap();

        assert_eq!(engine.configuration(), updated);
        let reloaded = engine_with_files(&temp).configuration();
        assert_eq!(reloaded.frequency, Frequency::Weekly);
        assert_eq!(reloaded.retention_days, 7);
    }

    #[test]
    fn test_update_configuration_checks_capabilities() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_files(&temp);

        let cloud = engine.update_configuration(ConfigurationPatch {
            cloud_backup: Some(true),
            ..ConfigurationPatch::default()
        });
        assert!(matches!(cloud, Err(BackupError::Config(_))));

        let encryption = engine.update_configuration(ConfigurationPatch {
            encryption_enabled: Some(true),
            ..ConfigurationPatch::default()
        });
        assert!(matches!(encryption, Err(BackupError::Config(_))));
        assert!(!engine.configuration().encryption_enabled);
    }

    #[test]
    fn test_cloud_and_local_round_trip_with_encryption() {
        let temp = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp.path().to_path_buf());
        let profiles = Arc::new(JsonFileDomain::new(&paths, DomainId::Profiles));
        profiles
            .apply_atomic(RecordSet::new(DomainId::Profiles, 1).with_record("u1", json!({"name": "Ada"})))
            .unwrap();

        let store = Arc::new(MemoryObjectStore::new());
        let engine = BackupEngine::builder()
            .paths(paths)
            .configuration(BackupConfiguration {
                include_communication_data: false,
                include_progress_data: false,
                include_settings: false,
                cloud_backup: true,
                encryption_enabled: true,
                ..BackupConfiguration::default()
            })
            .provider(profiles.clone())
            .cloud_destination(Arc::new(CloudDestination::new(store.clone()).with_part_size(64)))
            .key_source(KeySource::passphrase_with_cost("correct horse", 1024, 1, 1))
            .build()
            .unwrap();

        let metadata = engine.trigger_manual_backup().unwrap();
        assert_eq!(metadata.status, BackupStatus::Completed, "{:?}", metadata.error);
        assert_eq!(
            metadata.destinations,
            vec![DestinationKind::Local, DestinationKind::Cloud]
        );
        assert_eq!(store.object_count(), 2);

        profiles
            .apply_atomic(RecordSet::new(DomainId::Profiles, 1))
            .unwrap();

        let report = engine.restore(&metadata.id);
        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.restored_counts[&DomainId::Profiles], 1);
        assert_eq!(profiles.export().unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_backup_id_prefix() {
        let temp = TempDir::new().unwrap();
        let engine = engine_with_files(&temp);
        let metadata = engine.trigger_manual_backup().unwrap();

        assert_eq!(
            engine.resolve_backup_id(&metadata.id[..8]).unwrap(),
            metadata.id
        );
        assert!(engine.resolve_backup_id("zzzz").unwrap_err().is_not_found());
    }

    #[test]
    fn test_restore_of_failed_backup_is_refused() {
        let temp = TempDir::new().unwrap();
        let engine = BackupEngine::builder()
            .paths(EnginePaths::with_base_dir(temp.path().to_path_buf()))
            .provider(Arc::new(Failing(DomainId::Profiles)))
            .build()
            .unwrap();
        let metadata = engine.trigger_manual_backup().unwrap();

        let report = engine.restore(&metadata.id);
        assert!(!report.success);
        assert!(report.error.unwrap().is_not_found());
    }

    #[test]
    fn test_interrupted_run_is_resolved_on_open() {
        let temp = TempDir::new().unwrap();
        let paths = EnginePaths::with_base_dir(temp.path().to_path_buf());
        paths.ensure_directories().unwrap();

        let ledger = MetadataLedger::new(paths.ledger_file());
        let stale = BackupMetadata::pending(
            "stale-run",
            chrono::Utc::now() - chrono::Duration::days(90),
            BackupType::Scheduled,
            vec![DestinationKind::Local],
        );
        ledger.append(&stale).unwrap();
        ledger
            .append(&stale.with_status(BackupStatus::InProgress))
            .unwrap();

        let local = LocalDestination::new(paths.local_destination_root());
        local
            .put(&snapshot_key("stale-run"), b"half", &CancellationToken::new())
            .unwrap();
        let torn = paths
            .local_destination_root()
            .join(manifest_key("stale-run") + ".tmp");
        std::fs::write(&torn, b"{").unwrap();

        let engine = engine_with_files(&temp);

        let entry = engine.get_backup("stale-run").unwrap();
        assert_eq!(entry.status, BackupStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some(INTERRUPTED));
        assert!(local.list().unwrap().is_empty());
        assert!(!torn.exists());

        // Terminal now, so retention can reap it
        let report = engine.reap_expired().unwrap();
        assert_eq!(report.reaped, vec!["stale-run".to_string()]);
        assert!(engine.list_backups(10).unwrap().is_empty());
    }

    #[test]
    fn test_scheduler_sees_configuration_saved_elsewhere() {
        let temp = TempDir::new().unwrap();
        let scheduled = engine_with_files(&temp);
        assert!(!ScheduleTarget::configuration(&scheduled).enabled);

        engine_with_files(&temp)
            .update_configuration(ConfigurationPatch {
                enabled: Some(true),
                frequency: Some(Frequency::Weekly),
                ..ConfigurationPatch::default()
            })
            .unwrap();

        let seen = ScheduleTarget::configuration(&scheduled);
        assert!(seen.enabled);
        assert_eq!(seen.frequency, Frequency::Weekly);
        assert!(scheduled.configuration().enabled);
    }

    #[test]
    fn test_reload_without_data_directory_keeps_memory_copy() {
        let temp = TempDir::new().unwrap();
        let engine = BackupEngine::builder()
            .ledger_path(temp.path().join("ledger.jsonl"))
            .configuration(BackupConfiguration {
                retention_days: 3,
                ..BackupConfiguration::default()
            })
            .build()
            .unwrap();

        assert_eq!(engine.reload_configuration().unwrap().retention_days, 3);
    }
}
