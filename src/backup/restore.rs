//! Backup restoration
//!
//! Restores run as a small state machine:
//!
//! ```text
//! Idle -> Validating -> Staged -> Applying -> Committed
//!                                          \-> RolledBack
//!   (validation or staging failure)        -> Failed
//! ```
//!
//! Nothing is applied until the stored bytes have matched their checksum,
//! been decrypted and decoded, and every domain in the snapshot has a
//! provider. Applying is per domain; if a domain fails, the domains already
//! applied are put back in reverse order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::crypto::KeySource;
use crate::destination::{manifest_key, snapshot_key, DestinationKind, DestinationWriter};
use crate::domain::{DomainId, DomainRegistry, RecordSet};
use crate::error::{BackupError, BackupResult};
use crate::snapshot::{bytes_checksum, decode, ManifestRecord, Snapshot, SnapshotFormat};

use super::lock::CancellationToken;

/// Where a restore is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Idle,
    Validating,
    Staged,
    Applying,
    Committed,
    RolledBack,
    Failed,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestoreState::Idle => "idle",
            RestoreState::Validating => "validating",
            RestoreState::Staged => "staged",
            RestoreState::Applying => "applying",
            RestoreState::Committed => "committed",
            RestoreState::RolledBack => "rolled back",
            RestoreState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A domain that could not be put back during rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    pub domain: DomainId,
    pub message: String,
}

/// Result of a restore
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub backup_id: String,
    /// Final state: `Committed`, `RolledBack` or `Failed`
    pub state: RestoreState,
    pub success: bool,
    /// Records restored per domain (empty unless committed)
    pub restored_counts: BTreeMap<DomainId, usize>,
    /// Destination the backup was read from
    pub source: Option<DestinationKind>,
    pub error: Option<BackupError>,
    /// Domains left in their restored state because rollback failed
    pub rollback_failures: Vec<RollbackFailure>,
}

impl RestoreReport {
    /// A restore that failed before anything was applied
    pub fn failed(backup_id: impl Into<String>, error: BackupError) -> Self {
        Self {
            backup_id: backup_id.into(),
            state: RestoreState::Failed,
            success: false,
            restored_counts: BTreeMap::new(),
            source: None,
            error: Some(error),
            rollback_failures: Vec::new(),
        }
    }

    /// Total records restored
    pub fn total_restored(&self) -> usize {
        self.restored_counts.values().sum()
    }

    /// Get a summary of what was restored
    pub fn summary(&self) -> String {
        match self.state {
            RestoreState::Committed => {
                let parts: Vec<String> = self
                    .restored_counts
                    .iter()
                    .map(|(domain, count)| format!("{} ({})", domain, count))
                    .collect();
                format!("Restored: {}", parts.join(", "))
            }
            RestoreState::RolledBack if self.rollback_failures.is_empty() => {
                "Restore failed; all changes were rolled back".to_string()
            }
            RestoreState::RolledBack => {
                let domains: Vec<String> = self
                    .rollback_failures
                    .iter()
                    .map(|f| f.domain.to_string())
                    .collect();
                format!(
                    "Restore failed; rollback failed for: {}",
                    domains.join(", ")
                )
            }
            _ => "Restore failed; no data was changed".to_string(),
        }
    }
}

/// A backup that passed validation and staging, held in memory
#[derive(Debug, Clone)]
pub struct StagedBackup {
    pub record: ManifestRecord,
    pub snapshot: Snapshot,
    pub source: DestinationKind,
}

/// Validates, stages and applies one backup
pub struct RestoreCoordinator<'a> {
    registry: &'a DomainRegistry,
    destinations: &'a BTreeMap<DestinationKind, Arc<dyn DestinationWriter>>,
    key: Option<&'a KeySource>,
}

impl<'a> RestoreCoordinator<'a> {
    pub fn new(
        registry: &'a DomainRegistry,
        destinations: &'a BTreeMap<DestinationKind, Arc<dyn DestinationWriter>>,
        key: Option<&'a KeySource>,
    ) -> Self {
        Self {
            registry,
            destinations,
            key,
        }
    }

    /// Read the manifest record and payload of `id`
    ///
    /// Tries `sources` in order and moves on only when reading fails; a
    /// source that returns bytes is used even if they turn out corrupt.
    pub fn fetch(
        &self,
        id: &str,
        sources: &[DestinationKind],
    ) -> BackupResult<(DestinationKind, ManifestRecord, Vec<u8>)> {
        let mut last_error = BackupError::backup_not_found(id);

        for kind in sources {
            let Some(writer) = self.destinations.get(kind) else {
                continue;
            };

            let fetched = writer
                .get(&manifest_key(id))
                .and_then(|record| writer.get(&snapshot_key(id)).map(|payload| (record, payload)));

            match fetched {
                Ok((record_bytes, payload)) => {
                    let record: ManifestRecord = serde_json::from_slice(&record_bytes)
                        .map_err(|e| BackupError::Decode(format!("Invalid manifest record: {}", e)))?;
                    if record.id != id {
                        return Err(BackupError::Decode(format!(
                            "Manifest record names backup {}",
                            record.id
                        )));
                    }
                    debug!(id, source = %kind, bytes = payload.len(), "fetched backup");
                    return Ok((*kind, record, payload));
                }
                Err(e) => {
                    warn!(id, source = %kind, error = %e, "could not read backup");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Validating and Staged: fetch, verify, decrypt and decode
    pub fn stage(&self, id: &str, sources: &[DestinationKind]) -> BackupResult<StagedBackup> {
        let (source, record, payload) = self.fetch(id, sources)?;

        let actual = bytes_checksum(&payload);
        if actual != record.checksum {
            return Err(BackupError::ChecksumMismatch {
                expected: record.checksum,
                actual,
            });
        }
        if payload.len() as u64 != record.size {
            return Err(BackupError::Decode(format!(
                "Payload is {} bytes but manifest records {}",
                payload.len(),
                record.size
            )));
        }

        let plaintext = if record.encrypted {
            crate::crypto::open(&payload, self.key)?
        } else {
            payload
        };

        let snapshot = decode(&plaintext, SnapshotFormat::Canonical)?;
        if snapshot.manifest.domains != record.domains {
            return Err(BackupError::Decode(
                "Snapshot domains do not match the manifest record".to_string(),
            ));
        }

        for domain in &snapshot.manifest.domains {
            if !self.registry.contains(*domain) {
                return Err(BackupError::Apply {
                    domain: *domain,
                    message: "no provider registered".to_string(),
                });
            }
        }

        Ok(StagedBackup {
            record,
            snapshot,
            source,
        })
    }

    /// Run the whole restore and report the outcome
    pub fn restore(
        &self,
        id: &str,
        sources: &[DestinationKind],
        cancel: &CancellationToken,
    ) -> RestoreReport {
        info!(id, state = %RestoreState::Validating, "restore started");

        let staged = match cancel.check().and_then(|_| self.stage(id, sources)) {
            Ok(staged) => staged,
            Err(e) => {
                warn!(id, error = %e, "restore failed before applying");
                return RestoreReport::failed(id, e);
            }
        };
        info!(id, state = %RestoreState::Staged, source = %staged.source, "backup staged");

        let mut report = self.apply(id, staged.snapshot, cancel);
        report.source = Some(staged.source);
        report
    }

    fn apply(&self, id: &str, snapshot: Snapshot, cancel: &CancellationToken) -> RestoreReport {
        info!(id, state = %RestoreState::Applying, "applying backup");

        let mut applied: Vec<(DomainId, RecordSet)> = Vec::new();
        let mut restored_counts = BTreeMap::new();
        let mut failure = None;

        for (domain, records) in snapshot.record_sets {
            if let Err(e) = cancel.check() {
                failure = Some(e);
                break;
            }

            // Checked during staging
            let Some(provider) = self.registry.get(domain) else {
                failure = Some(BackupError::Apply {
                    domain,
                    message: "no provider registered".to_string(),
                });
                break;
            };

            let count = records.len();
            match provider.apply_atomic(records) {
                Ok(previous) => {
                    debug!(domain = %domain, records = count, "applied domain");
                    applied.push((domain, previous));
                    restored_counts.insert(domain, count);
                }
                Err(e) => {
                    failure = Some(BackupError::Apply {
                        domain,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        match failure {
            None => {
                info!(id, state = %RestoreState::Committed, "restore committed");
                RestoreReport {
                    backup_id: id.to_string(),
                    state: RestoreState::Committed,
                    success: true,
                    restored_counts,
                    source: None,
                    error: None,
                    rollback_failures: Vec::new(),
                }
            }
            Some(err) => {
                warn!(id, error = %err, "restore failed, rolling back");
                let rollback_failures = self.rollback(applied);
                RestoreReport {
                    backup_id: id.to_string(),
                    state: RestoreState::RolledBack,
                    success: false,
                    restored_counts: BTreeMap::new(),
                    source: None,
                    error: Some(err),
                    rollback_failures,
                }
            }
        }
    }

    /// Re-apply captured pre-apply states, newest first
    fn rollback(&self, applied: Vec<(DomainId, RecordSet)>) -> Vec<RollbackFailure> {
        let mut failures = Vec::new();

        for (domain, previous) in applied.into_iter().rev() {
            let result = match self.registry.get(domain) {
                Some(provider) => provider.apply_atomic(previous).map(|_| ()).map_err(|e| e.to_string()),
                None => Err("no provider registered".to_string()),
            };

            if let Err(message) = result {
                error!(domain = %domain, error = %message, "rollback failed");
                failures.push(RollbackFailure { domain, message });
            } else {
                debug!(domain = %domain, "rolled back domain");
            }
        }

        failures
    }
}
