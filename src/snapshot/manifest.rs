//! Snapshot and manifest types
//!
//! A `Snapshot` is the unit that gets backed up and restored: one record set
//! per domain plus a `Manifest` describing them. A `ManifestRecord` is the
//! small sidecar stored next to each payload at a destination; it carries the
//! checksum of the stored bytes so integrity can be checked before anything
//! is decrypted or decoded.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DomainId, RecordSet};
use crate::error::{BackupError, BackupResult};

use super::checksum::content_checksum;

/// Current snapshot schema version
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Describes a snapshot's contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Snapshot schema version
    pub schema_version: u32,
    /// When the snapshot was composed
    pub created_at: DateTime<Utc>,
    /// Domains present, in canonical order
    pub domains: Vec<DomainId>,
    /// Number of records per domain
    pub record_counts: BTreeMap<DomainId, usize>,
    /// SHA-256 content checksum (hex)
    pub checksum: String,
    /// Whether the stored payload is encrypted
    pub encrypted: bool,
}

/// The part of the manifest covered by the content checksum
#[derive(Serialize)]
pub(crate) struct ManifestBody<'a> {
    pub schema_version: u32,
    pub created_at: &'a DateTime<Utc>,
    pub domains: &'a [DomainId],
    pub record_counts: &'a BTreeMap<DomainId, usize>,
}

impl Manifest {
    pub(crate) fn body(&self) -> ManifestBody<'_> {
        ManifestBody {
            schema_version: self.schema_version,
            created_at: &self.created_at,
            domains: &self.domains,
            record_counts: &self.record_counts,
        }
    }

    /// Total number of records across domains
    pub fn total_records(&self) -> usize {
        self.record_counts.values().sum()
    }
}

/// A point-in-time bundle of domain records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub manifest: Manifest,
    pub record_sets: BTreeMap<DomainId, RecordSet>,
}

impl Snapshot {
    /// Build a snapshot from exported record sets, computing its manifest
    pub fn from_record_sets(
        created_at: DateTime<Utc>,
        record_sets: BTreeMap<DomainId, RecordSet>,
    ) -> BackupResult<Self> {
        let domains: Vec<DomainId> = record_sets.keys().copied().collect();
        let record_counts = record_sets
            .iter()
            .map(|(domain, set)| (*domain, set.len()))
            .collect();

        let mut manifest = Manifest {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            created_at,
            domains,
            record_counts,
            checksum: String::new(),
            encrypted: false,
        };
        manifest.checksum = content_checksum(&manifest.body(), &record_sets)?;

        Ok(Self {
            manifest,
            record_sets,
        })
    }

    /// Check that the manifest describes the record sets and the checksum holds
    pub fn verify(&self) -> BackupResult<()> {
        let domains: Vec<DomainId> = self.record_sets.keys().copied().collect();
        if domains != self.manifest.domains {
            return Err(BackupError::Decode(format!(
                "Manifest lists domains {:?} but snapshot holds {:?}",
                self.manifest.domains, domains
            )));
        }

        for (domain, set) in &self.record_sets {
            if set.domain != *domain {
                return Err(BackupError::Decode(format!(
                    "Record set for '{}' is labelled '{}'",
                    domain, set.domain
                )));
            }
            let expected = self.manifest.record_counts.get(domain).copied();
            if expected != Some(set.len()) {
                return Err(BackupError::Decode(format!(
                    "Manifest records {:?} entries for '{}' but snapshot holds {}",
                    expected,
                    domain,
                    set.len()
                )));
            }
        }

        let actual = content_checksum(&self.manifest.body(), &self.record_sets)?;
        if actual != self.manifest.checksum {
            return Err(BackupError::ChecksumMismatch {
                expected: self.manifest.checksum.clone(),
                actual,
            });
        }

        Ok(())
    }
}

/// Sidecar record stored next to every payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Backup id
    pub id: String,
    /// When the backup was taken
    pub timestamp: DateTime<Utc>,
    /// Size of the stored payload in bytes
    pub size: u64,
    /// Snapshot schema version
    pub schema_version: u32,
    /// Domains in the snapshot
    pub domains: Vec<DomainId>,
    /// SHA-256 of the stored payload bytes (hex)
    pub checksum: String,
    /// Whether the payload is encrypted
    pub encrypted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Snapshot {
        let mut sets = BTreeMap::new();
        sets.insert(
            DomainId::Profiles,
            RecordSet::new(DomainId::Profiles, 1).with_record("u1", json!({"name": "Ada"})),
        );
        sets.insert(
            DomainId::Messages,
            RecordSet::new(DomainId::Messages, 1)
                .with_record("m1", json!("I want juice"))
                .with_record("m2", json!("All done")),
        );
        Snapshot::from_record_sets(Utc::now(), sets).unwrap()
    }

    #[test]
    fn test_manifest_describes_record_sets() {
        let snapshot = sample();
        assert_eq!(
            snapshot.manifest.domains,
            vec![DomainId::Profiles, DomainId::Messages]
        );
        assert_eq!(snapshot.manifest.record_counts[&DomainId::Messages], 2);
        assert_eq!(snapshot.manifest.total_records(), 3);
        assert_eq!(snapshot.manifest.checksum.len(), 64);
        assert!(snapshot.verify().is_ok());
    }

    #[test]
    fn test_modified_record_fails_verification() {
        let mut snapshot = sample();
        snapshot
            .record_sets
            .get_mut(&DomainId::Messages)
            .unwrap()
            .insert("m1", json!("I want water"));

        let err = snapshot.verify().unwrap_err();
        assert!(matches!(err, BackupError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_missing_domain_fails_verification() {
        let mut snapshot = sample();
        snapshot.record_sets.remove(&DomainId::Profiles);
        assert!(matches!(
            snapshot.verify().unwrap_err(),
            BackupError::Decode(_)
        ));
    }

    #[test]
    fn test_encrypted_flag_is_outside_checksum() {
        let mut snapshot = sample();
        snapshot.manifest.encrypted = true;
        assert!(snapshot.verify().is_ok());
    }
}
