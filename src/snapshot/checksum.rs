//! Deterministic SHA-256 checksums
//!
//! - **Content checksum**: canonical manifest body followed by each domain's
//!   canonical record bytes, in domain order. Same records, same checksum,
//!   whatever order they were exported in.
//! - **Bytes checksum**: hash of the payload exactly as stored at a
//!   destination (after encryption, if any).

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::domain::{DomainId, RecordSet};
use crate::error::{BackupError, BackupResult};

use super::manifest::ManifestBody;

/// Compute the content checksum of a snapshot
pub(crate) fn content_checksum(
    body: &ManifestBody<'_>,
    record_sets: &BTreeMap<DomainId, RecordSet>,
) -> BackupResult<String> {
    let canonical_body = serde_json::to_vec(body)
        .map_err(|e| BackupError::Encode(format!("Failed to serialize manifest: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical_body);
    for set in record_sets.values() {
        hasher.update(set.canonical_bytes()?);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hex-encoded SHA-256 of raw bytes
pub fn bytes_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
