//! Domain identifiers and exported record sets

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};

/// Identifies one data domain
///
/// Ordering is significant: snapshots list, checksum and restore domains in
/// this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainId {
    /// User profiles
    Profiles,
    /// Communication libraries (books, boards, pages)
    Libraries,
    /// Saved messages and phrases
    Messages,
    /// Symbol sets
    Symbols,
    /// Usage analytics and progress tracking
    Analytics,
    /// Application settings
    Settings,
}

impl DomainId {
    /// Every domain, in canonical order
    pub const ALL: [DomainId; 6] = [
        DomainId::Profiles,
        DomainId::Libraries,
        DomainId::Messages,
        DomainId::Symbols,
        DomainId::Analytics,
        DomainId::Settings,
    ];

    /// Stable lowercase name, used in file names and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainId::Profiles => "profiles",
            DomainId::Libraries => "libraries",
            DomainId::Messages => "messages",
            DomainId::Symbols => "symbols",
            DomainId::Analytics => "analytics",
            DomainId::Settings => "settings",
        }
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainId {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainId::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BackupError::Config(format!("Unknown domain: {}", s)))
    }
}

/// The records exported by one domain
///
/// Records are keyed by their id, so two exports holding the same records in
/// a different order compare (and serialize) identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Domain the records belong to
    pub domain: DomainId,
    /// Schema version of the domain's record format
    pub schema_version: u32,
    /// Records keyed by id
    pub records: BTreeMap<String, serde_json::Value>,
}

impl RecordSet {
    /// Create an empty record set
    pub fn new(domain: DomainId, schema_version: u32) -> Self {
        Self {
            domain,
            schema_version,
            records: BTreeMap::new(),
        }
    }

    /// Builder-style insert
    pub fn with_record(mut self, id: impl Into<String>, value: serde_json::Value) -> Self {
        self.records.insert(id.into(), value);
        self
    }

    /// Insert or replace a record
    pub fn insert(&mut self, id: impl Into<String>, value: serde_json::Value) {
        self.records.insert(id.into(), value);
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Canonical byte representation of the records, used for checksums
    pub fn canonical_bytes(&self) -> BackupResult<Vec<u8>> {
        serde_json::to_vec(&self.records)
            .map_err(|e| BackupError::Encode(format!("Failed to serialize {}: {}", self.domain, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_domain_round_trips_through_str() {
        for domain in DomainId::ALL {
            assert_eq!(domain.as_str().parse::<DomainId>().unwrap(), domain);
        }
        assert!("books".parse::<DomainId>().is_err());
    }

    #[test]
    fn test_domain_serializes_lowercase() {
        let json = serde_json::to_string(&DomainId::Symbols).unwrap();
        assert_eq!(json, "\"symbols\"");
    }

    #[test]
    fn test_record_order_does_not_matter() {
        let a = RecordSet::new(DomainId::Messages, 1)
            .with_record("m1", json!({"text": "hello"}))
            .with_record("m2", json!({"text": "thank you"}));
        let b = RecordSet::new(DomainId::Messages, 1)
            .with_record("m2", json!({"text": "thank you"}))
            .with_record("m1", json!({"text": "hello"}));

        assert_eq!(a, b);
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn test_len_and_empty() {
        let mut set = RecordSet::new(DomainId::Profiles, 1);
        assert!(set.is_empty());
        set.insert("u1", json!({"name": "Sam"}));
        assert_eq!(set.len(), 1);
    }
}
