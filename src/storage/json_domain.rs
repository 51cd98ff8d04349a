//! File-backed domain provider
//!
//! Keeps one domain's live records in `data/<domain>.json`. Applying a record
//! set replaces the file atomically, so a failed apply leaves the previous
//! records untouched.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::paths::EnginePaths;
use crate::domain::{DomainError, DomainId, DomainProvider, RecordSet};

use super::file_io::{read_json, write_json_atomic};

/// Newest record schema version this provider understands
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecords {
    schema_version: u32,
    records: BTreeMap<String, serde_json::Value>,
}

impl Default for StoredRecords {
    fn default() -> Self {
        Self {
            schema_version: SUPPORTED_SCHEMA_VERSION,
            records: BTreeMap::new(),
        }
    }
}

/// A domain whose records live in a JSON file
pub struct JsonFileDomain {
    domain: DomainId,
    path: PathBuf,
}

impl JsonFileDomain {
    /// Create a provider for `domain` under the standard data directory
    pub fn new(paths: &EnginePaths, domain: DomainId) -> Self {
        Self {
            domain,
            path: paths.domain_file(domain),
        }
    }

    /// Create providers for every domain
    pub fn all(paths: &EnginePaths) -> Vec<Self> {
        DomainId::ALL
            .iter()
            .map(|domain| Self::new(paths, *domain))
            .collect()
    }

    /// Path of the backing file
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn load(&self) -> Result<RecordSet, DomainError> {
        let stored: StoredRecords = read_json(&self.path)
            .map_err(|e| DomainError::new(format!("Failed to read {}: {}", self.domain, e)))?;

        Ok(RecordSet {
            domain: self.domain,
            schema_version: stored.schema_version,
            records: stored.records,
        })
    }
}

impl DomainProvider for JsonFileDomain {
    fn domain(&self) -> DomainId {
        self.domain
    }

    fn export(&self) -> Result<RecordSet, DomainError> {
        self.load()
    }

    fn apply_atomic(&self, records: RecordSet) -> Result<RecordSet, DomainError> {
        if records.domain != self.domain {
            return Err(DomainError::new(format!(
                "Records for '{}' cannot be applied to '{}'",
                records.domain, self.domain
            )));
        }

        if records.schema_version > SUPPORTED_SCHEMA_VERSION {
            return Err(DomainError::new(format!(
                "Schema version {} is newer than supported version {}",
                records.schema_version, SUPPORTED_SCHEMA_VERSION
            )));
        }

        let previous = self.load()?;

        let stored = StoredRecords {
            schema_version: records.schema_version,
            records: records.records,
        };
        write_json_atomic(&self.path, &stored)
            .map_err(|e| DomainError::new(format!("Failed to write {}: {}", self.domain, e)))?;

        Ok(previous)
    }
}
