//! Retention: garbage-collecting old backups
//!
//! A backup becomes eligible once it is strictly older than the retention
//! window. The newest completed backup at each destination is always kept,
//! however old, so a destination never loses its last good copy. A backup
//! being restored is also left alone.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::destination::{manifest_key, snapshot_key, DestinationKind, DestinationWriter};
use crate::error::BackupResult;
use crate::ledger::{BackupMetadata, BackupStatus, MetadataLedger};

/// Entries that retention may delete
///
/// `protected` names a backup that must be kept (an in-flight restore
/// target). Returned oldest first.
pub fn select_candidates(
    entries: &[BackupMetadata],
    now: DateTime<Utc>,
    retention_days: u32,
    protected: Option<&str>,
) -> Vec<BackupMetadata> {
    let window = Duration::days(i64::from(retention_days));

    let mut keep: HashSet<&str> = HashSet::new();
    keep.extend(protected);

    let mut newest: BTreeMap<DestinationKind, &BackupMetadata> = BTreeMap::new();
    for entry in entries
        .iter()
        .filter(|e| e.status == BackupStatus::Completed)
    {
        for destination in &entry.destinations {
            let slot = newest.entry(*destination).or_insert(entry);
            if (entry.timestamp, &entry.id) > (slot.timestamp, &slot.id) {
                *slot = entry;
            }
        }
    }
    keep.extend(newest.values().map(|e| e.id.as_str()));

    let mut candidates: Vec<BackupMetadata> = entries
        .iter()
        .filter(|e| e.is_terminal())
        .filter(|e| now - e.timestamp > window)
        .filter(|e| !keep.contains(e.id.as_str()))
        .cloned()
        .collect();
    candidates.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    candidates
}

/// A backup retention could not remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapFailure {
    pub id: String,
    pub message: String,
}

/// Outcome of a retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Ids whose artifacts were deleted and entries tombstoned
    pub reaped: Vec<String>,
    /// Entries left in place because a deletion failed
    pub failures: Vec<ReapFailure>,
}

impl ReapReport {
    pub fn summary(&self) -> String {
        if self.failures.is_empty() {
            format!("Removed {} expired backup(s)", self.reaped.len())
        } else {
            format!(
                "Removed {} expired backup(s), {} could not be removed",
                self.reaped.len(),
                self.failures.len()
            )
        }
    }
}

/// Deletes expired backups from their destinations and the ledger
pub struct RetentionReaper<'a> {
    ledger: &'a MetadataLedger,
    destinations: &'a BTreeMap<DestinationKind, Arc<dyn DestinationWriter>>,
}

impl<'a> RetentionReaper<'a> {
    pub fn new(
        ledger: &'a MetadataLedger,
        destinations: &'a BTreeMap<DestinationKind, Arc<dyn DestinationWriter>>,
    ) -> Self {
        Self {
            ledger,
            destinations,
        }
    }

    /// Run one retention pass
    ///
    /// Artifacts are deleted at every destination the entry lists before the
    /// entry is tombstoned. If any deletion fails the entry stays visible and
    /// the next pass retries it.
    pub fn reap(
        &self,
        now: DateTime<Utc>,
        retention_days: u32,
        protected: Option<&str>,
    ) -> BackupResult<ReapReport> {
        let entries = self.ledger.list_all()?;
        let candidates = select_candidates(&entries, now, retention_days, protected);

        let mut report = ReapReport::default();
        for entry in candidates {
            match self.delete_artifacts(&entry) {
                Ok(()) => {
                    self.ledger.tombstone(&entry.id)?;
                    info!(id = %entry.id, "reaped expired backup");
                    report.reaped.push(entry.id);
                }
                Err(message) => {
                    warn!(id = %entry.id, error = %message, "could not reap backup");
                    report.failures.push(ReapFailure {
                        id: entry.id,
                        message,
                    });
                }
            }
        }

        Ok(report)
    }

    fn delete_artifacts(&self, entry: &BackupMetadata) -> Result<(), String> {
        for kind in &entry.destinations {
            let writer = self
                .destinations
                .get(kind)
                .ok_or_else(|| format!("{} destination is not configured", kind))?;

            for key in [snapshot_key(&entry.id), manifest_key(&entry.id)] {
                writer.delete(&key).map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::CancellationToken;
    use crate::destination::LocalDestination;
    use crate::ledger::BackupType;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap() + Duration::days(n)
    }

    fn completed(id: &str, at: i64, destinations: &[DestinationKind]) -> BackupMetadata {
        BackupMetadata::pending(id, day(at), BackupType::Scheduled, destinations.to_vec())
            .with_status(BackupStatus::Completed)
    }

    fn ids(entries: &[BackupMetadata]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_boundary_is_strict() {
        let local = [DestinationKind::Local];
        let entries = vec![
            completed("d0", 0, &local),
            completed("d1", 1, &local),
            completed("d31", 31, &local),
        ];

        // d1 is exactly 30 days old at day 31
        let selected = select_candidates(&entries, day(31), 30, None);
        assert_eq!(ids(&selected), vec!["d0"]);
    }

    #[test]
    fn test_newest_completed_per_destination_is_kept() {
        let entries = vec![
            completed("local-old", 0, &[DestinationKind::Local]),
            completed("cloud-only", 1, &[DestinationKind::Cloud]),
            completed("local-new", 2, &[DestinationKind::Local]),
        ];

        let selected = select_candidates(&entries, day(400), 30, None);
        assert_eq!(ids(&selected), vec!["local-old"]);
    }

    #[test]
    fn test_failed_newer_entry_does_not_protect() {
        let local = [DestinationKind::Local];
        let failed = BackupMetadata::pending("failed", day(5), BackupType::Manual, local.to_vec())
            .finished_with_error(BackupStatus::Failed, "disk full");
        let entries = vec![completed("good", 0, &local), failed];

        let selected = select_candidates(&entries, day(100), 30, None);
        assert_eq!(ids(&selected), vec!["failed"]);
    }

    #[test]
    fn test_running_and_protected_entries_are_skipped() {
        let local = [DestinationKind::Local];
        let running = BackupMetadata::pending("running", day(0), BackupType::Manual, local.to_vec())
            .with_status(BackupStatus::InProgress);
        let entries = vec![
            running,
            completed("restoring", 1, &local),
            completed("newest", 2, &local),
        ];

        let selected = select_candidates(&entries, day(100), 30, Some("restoring"));
        assert!(selected.is_empty());
    }

    #[test]
    fn test_reap_deletes_artifacts_and_tombstones() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = MetadataLedger::new(temp_dir.path().join("ledger.jsonl"));
        let local: Arc<dyn DestinationWriter> =
            Arc::new(LocalDestination::new(temp_dir.path()));
        let destinations = BTreeMap::from([(DestinationKind::Local, local.clone())]);
        let cancel = CancellationToken::new();

        for (id, at) in [("old", 0), ("new", 40)] {
            ledger
                .append(&completed(id, at, &[DestinationKind::Local]))
                .unwrap();
            local.put(&snapshot_key(id), b"payload", &cancel).unwrap();
            local.put(&manifest_key(id), b"{}", &cancel).unwrap();
        }

        let report = RetentionReaper::new(&ledger, &destinations)
            .reap(day(41), 30, None)
            .unwrap();

        assert_eq!(report.reaped, vec!["old"]);
        assert!(report.failures.is_empty());
        assert!(ledger.get("old").unwrap().is_none());
        assert_eq!(
            local.list().unwrap(),
            vec![manifest_key("new"), snapshot_key("new")]
        );
    }

    #[test]
    fn test_missing_destination_keeps_entry() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = MetadataLedger::new(temp_dir.path().join("ledger.jsonl"));
        let destinations = BTreeMap::new();

        ledger
            .append(&completed("old", 0, &[DestinationKind::Cloud]))
            .unwrap();
        ledger
            .append(&completed("new", 40, &[DestinationKind::Local]))
            .unwrap();

        let report = RetentionReaper::new(&ledger, &destinations)
            .reap(day(41), 30, None)
            .unwrap();

        // "old" is the newest cloud backup, so nothing is eligible
        assert!(report.reaped.is_empty());

        ledger
            .append(&completed("newer-cloud", 39, &[DestinationKind::Cloud]))
            .unwrap();
        let report = RetentionReaper::new(&ledger, &destinations)
            .reap(day(41), 30, None)
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(ledger.get("old").unwrap().is_some());
    }
}
