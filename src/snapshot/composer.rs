//! Snapshot composition
//!
//! Asks each requested domain provider for its records and bundles them into
//! one checksummed snapshot. Composition is all-or-nothing: a snapshot that
//! silently lacks a domain would drop that data on restore.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::backup::CancellationToken;
use crate::domain::{DomainId, DomainRegistry, RecordSet};
use crate::error::{BackupError, BackupResult};

use super::manifest::Snapshot;

/// Composes snapshots from registered domain providers
pub struct SnapshotComposer<'a> {
    registry: &'a DomainRegistry,
}

impl<'a> SnapshotComposer<'a> {
    pub fn new(registry: &'a DomainRegistry) -> Self {
        Self { registry }
    }

    /// Export `domains` and bundle them into a snapshot
    ///
    /// Fails with `BackupError::Export` naming the first domain that has no
    /// provider or whose export fails, and with `BackupError::Cancelled` if
    /// cancellation is requested before any export.
    pub fn compose(
        &self,
        domains: &[DomainId],
        created_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> BackupResult<Snapshot> {
        let mut requested = domains.to_vec();
        requested.sort();
        requested.dedup();

        if requested.is_empty() {
            return Err(BackupError::Config(
                "No domains selected for backup".to_string(),
            ));
        }

        let mut record_sets: BTreeMap<DomainId, RecordSet> = BTreeMap::new();

        for domain in requested {
            cancel.check()?;

            let provider = self.registry.get(domain).ok_or_else(|| BackupError::Export {
                domain,
                message: "no provider registered".to_string(),
            })?;

            let set = provider.export().map_err(|e| BackupError::Export {
                domain,
                message: e.to_string(),
            })?;

            if set.domain != domain {
                return Err(BackupError::Export {
                    domain,
                    message: format!("provider returned records for '{}'", set.domain),
                });
            }

            debug!(domain = %domain, records = set.len(), "exported domain");
            record_sets.insert(domain, set);
        }

        Snapshot::from_record_sets(created_at, record_sets)
    }
}
