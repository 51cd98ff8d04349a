//! Snapshot codec
//!
//! Encodes snapshots to bytes and back. Exactly one format is restorable:
//! the canonical JSON document. YAML and CSV exist for human interchange
//! (spreadsheets, reading a backup by eye) and are rejected by `decode`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DomainId, RecordSet};
use crate::error::{BackupError, BackupResult};

use super::manifest::{Manifest, Snapshot, SNAPSHOT_SCHEMA_VERSION};

/// Tag identifying a canonical snapshot document
pub const CANONICAL_FORMAT_TAG: &str = "keepsafe-snapshot";

/// First line of a YAML export
const YAML_HEADER: &str = "# Keepsafe snapshot export";

/// Header row of a CSV export
const CSV_HEADER: [&str; 4] = ["domain", "record_id", "schema_version", "record"];

/// Snapshot byte formats
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    /// Canonical lossless JSON (restorable)
    #[value(alias = "json")]
    Canonical,
    /// Human-readable YAML (export only)
    Yaml,
    /// One row per record (export only)
    Csv,
}

impl SnapshotFormat {
    /// Whether snapshots in this format can be restored
    pub fn is_restorable(&self) -> bool {
        matches!(self, SnapshotFormat::Canonical)
    }

    /// Conventional file extension
    pub fn extension(&self) -> &'static str {
        match self {
            SnapshotFormat::Canonical => "json",
            SnapshotFormat::Yaml => "yaml",
            SnapshotFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotFormat::Canonical => write!(f, "canonical JSON"),
            SnapshotFormat::Yaml => write!(f, "YAML"),
            SnapshotFormat::Csv => write!(f, "CSV"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CanonicalDocument {
    format: String,
    manifest: Manifest,
    record_sets: std::collections::BTreeMap<DomainId, RecordSet>,
}

#[derive(Serialize)]
struct YamlExport<'a> {
    exported_at: DateTime<Utc>,
    app_version: &'static str,
    manifest: &'a Manifest,
    record_sets: &'a std::collections::BTreeMap<DomainId, RecordSet>,
}

/// Encode a snapshot
pub fn encode(snapshot: &Snapshot, format: SnapshotFormat) -> BackupResult<Vec<u8>> {
    match format {
        SnapshotFormat::Canonical => encode_canonical(snapshot),
        SnapshotFormat::Yaml => encode_yaml(snapshot),
        SnapshotFormat::Csv => encode_csv(snapshot),
    }
}

/// Decode a snapshot
///
/// Only `Canonical` is accepted; export-only formats, whether named
/// explicitly or recognised from the bytes, fail with `ExportOnlyFormat`.
/// The decoded snapshot's content checksum is verified.
pub fn decode(bytes: &[u8], format: SnapshotFormat) -> BackupResult<Snapshot> {
    if !format.is_restorable() {
        return Err(BackupError::ExportOnlyFormat { format });
    }

    if let Some(sniffed) = sniff(bytes) {
        if !sniffed.is_restorable() {
            return Err(BackupError::ExportOnlyFormat { format: sniffed });
        }
    }

    let document: CanonicalDocument = serde_json::from_slice(bytes)
        .map_err(|e| BackupError::Decode(format!("Invalid snapshot document: {}", e)))?;

    if document.format != CANONICAL_FORMAT_TAG {
        return Err(BackupError::Decode(format!(
            "Unexpected document format: {}",
            document.format
        )));
    }

    if document.manifest.schema_version > SNAPSHOT_SCHEMA_VERSION {
        return Err(BackupError::Decode(format!(
            "Snapshot schema version {} is newer than supported version {}",
            document.manifest.schema_version, SNAPSHOT_SCHEMA_VERSION
        )));
    }

    let snapshot = Snapshot {
        manifest: document.manifest,
        record_sets: document.record_sets,
    };
    snapshot.verify()?;

    Ok(snapshot)
}

/// Guess the format of encoded bytes
pub fn sniff(bytes: &[u8]) -> Option<SnapshotFormat> {
    let head = &bytes[..bytes.len().min(256)];
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        // The cut may land inside a multi-byte character
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&head[..e.valid_up_to()]).ok()?,
        Err(_) => return None,
    };
    let trimmed = text.trim_start();

    if trimmed.starts_with('{') {
        Some(SnapshotFormat::Canonical)
    } else if trimmed.starts_with(YAML_HEADER) || trimmed.starts_with("---") {
        Some(SnapshotFormat::Yaml)
    } else if trimmed.starts_with(&CSV_HEADER.join(",")) {
        Some(SnapshotFormat::Csv)
    } else {
        None
    }
}

fn encode_canonical(snapshot: &Snapshot) -> BackupResult<Vec<u8>> {
    let document = CanonicalDocument {
        format: CANONICAL_FORMAT_TAG.to_string(),
        manifest: snapshot.manifest.clone(),
        record_sets: snapshot.record_sets.clone(),
    };

    serde_json::to_vec(&document)
        .map_err(|e| BackupError::Encode(format!("Failed to serialize snapshot: {}", e)))
}

fn encode_yaml(snapshot: &Snapshot) -> BackupResult<Vec<u8>> {
    let export = YamlExport {
        exported_at: Utc::now(),
        app_version: env!("CARGO_PKG_VERSION"),
        manifest: &snapshot.manifest,
        record_sets: &snapshot.record_sets,
    };

    let mut out = String::new();
    out.push_str(YAML_HEADER);
    out.push('\n');
    out.push_str(&format!(
        "# Snapshot taken: {}\n",
        snapshot.manifest.created_at.to_rfc3339()
    ));
    out.push_str("#\n");
    out.push_str("# This file is for reading and sharing; it cannot be restored.\n");
    out.push_str("# Use the canonical backup file to restore.\n\n");

    let body = serde_yaml::to_string(&export)
        .map_err(|e| BackupError::Encode(format!("Failed to serialize YAML: {}", e)))?;
    out.push_str(&body);

    Ok(out.into_bytes())
}

fn encode_csv(snapshot: &Snapshot) -> BackupResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record(CSV_HEADER)
        .map_err(|e| BackupError::Encode(e.to_string()))?;

    for (domain, set) in &snapshot.record_sets {
        for (id, record) in &set.records {
            let json = serde_json::to_string(record)
                .map_err(|e| BackupError::Encode(e.to_string()))?;
            writer
                .write_record([
                    domain.as_str(),
                    id.as_str(),
                    &set.schema_version.to_string(),
                    &json,
                ])
                .map_err(|e| BackupError::Encode(e.to_string()))?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| BackupError::Encode(format!("Failed to flush CSV: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample() -> Snapshot {
        let mut sets = BTreeMap::new();
        sets.insert(
            DomainId::Libraries,
            RecordSet::new(DomainId::Libraries, 1).with_record(
                "book-1",
                json!({"title": "Core words", "pages": [{"cells": ["I", "want", "more"]}]}),
            ),
        );
        sets.insert(
            DomainId::Analytics,
            RecordSet::new(DomainId::Analytics, 1)
                .with_record("day-1", json!({"taps": 412, "ratio": 0.25}))
                .with_record("day-2", json!({"taps": 0, "note": null})),
        );
        Snapshot::from_record_sets(Utc::now(), sets).unwrap()
    }

    #[test]
    fn test_canonical_round_trip() {
        let snapshot = sample();
        let bytes = encode(&snapshot, SnapshotFormat::Canonical).unwrap();
        let decoded = decode(&bytes, SnapshotFormat::Canonical).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_canonical_round_trip_keeps_floats_exact() {
        let mut sets = BTreeMap::new();
        sets.insert(
            DomainId::Analytics,
            RecordSet::new(DomainId::Analytics, 1)
                .with_record("day-1", json!({"ratio": 1.0715660391465826e-75}))
                .with_record("day-2", json!({"ratio": 0.1 + 0.2, "drift": -2.2250738585072014e-308})),
        );
        let snapshot = Snapshot::from_record_sets(Utc::now(), sets).unwrap();

        let bytes = encode(&snapshot, SnapshotFormat::Canonical).unwrap();
        let decoded = decode(&bytes, SnapshotFormat::Canonical).unwrap();

        assert_eq!(decoded, snapshot);
        assert_eq!(
            decoded.record_sets[&DomainId::Analytics].records["day-1"]["ratio"].as_f64(),
            Some(1.0715660391465826e-75)
        );
    }

    #[test]
    fn test_round_trip_preserves_encrypted_flag() {
        let mut snapshot = sample();
        snapshot.manifest.encrypted = true;
        let bytes = encode(&snapshot, SnapshotFormat::Canonical).unwrap();
        assert!(decode(&bytes, SnapshotFormat::Canonical).unwrap().manifest.encrypted);
    }

    #[test]
    fn test_decode_rejects_export_only_formats() {
        let snapshot = sample();
        for format in [SnapshotFormat::Yaml, SnapshotFormat::Csv] {
            let bytes = encode(&snapshot, format).unwrap();
            let err = decode(&bytes, format).unwrap_err();
            assert!(matches!(err, BackupError::ExportOnlyFormat { format: f } if f == format));
        }
    }

    #[test]
    fn test_decode_recognises_export_bytes_presented_as_canonical() {
        let snapshot = sample();
        let yaml = encode(&snapshot, SnapshotFormat::Yaml).unwrap();
        let csv = encode(&snapshot, SnapshotFormat::Csv).unwrap();

        assert!(matches!(
            decode(&yaml, SnapshotFormat::Canonical).unwrap_err(),
            BackupError::ExportOnlyFormat {
                format: SnapshotFormat::Yaml
            }
        ));
        assert!(matches!(
            decode(&csv, SnapshotFormat::Canonical).unwrap_err(),
            BackupError::ExportOnlyFormat {
                format: SnapshotFormat::Csv
            }
        ));
    }

    #[test]
    fn test_sniff_survives_multibyte_cut() {
        let mut yaml = format!("{}\n# ", YAML_HEADER);
        while yaml.len() < 255 {
            yaml.push('a');
        }
        yaml.push_str("\u{e9}\u{e9} more");
        assert!(!yaml.is_char_boundary(256));

        assert_eq!(sniff(yaml.as_bytes()), Some(SnapshotFormat::Yaml));
        assert!(matches!(
            decode(yaml.as_bytes(), SnapshotFormat::Canonical).unwrap_err(),
            BackupError::ExportOnlyFormat {
                format: SnapshotFormat::Yaml
            }
        ));
    }

    #[test]
    fn test_decode_detects_tampered_records() {
        let snapshot = sample();
        let bytes = encode(&snapshot, SnapshotFormat::Canonical).unwrap();
        let text = String::from_utf8(bytes).unwrap().replace("Core words", "Core wordz");

        let err = decode(text.as_bytes(), SnapshotFormat::Canonical).unwrap_err();
        assert!(matches!(err, BackupError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_decode_rejects_newer_schema() {
        let mut snapshot = sample();
        snapshot.manifest.schema_version = SNAPSHOT_SCHEMA_VERSION + 1;
        let bytes = encode(&snapshot, SnapshotFormat::Canonical).unwrap();

        let err = decode(&bytes, SnapshotFormat::Canonical).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode(b"\x00\x01binary", SnapshotFormat::Canonical).unwrap_err(),
            BackupError::Decode(_)
        ));
    }

    #[test]
    fn test_csv_has_one_row_per_record() {
        let bytes = encode(&sample(), SnapshotFormat::Csv).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][0], "libraries");
        assert_eq!(&rows[0][1], "book-1");
    }

    #[test]
    fn test_yaml_export_is_readable() {
        let text = String::from_utf8(encode(&sample(), SnapshotFormat::Yaml).unwrap()).unwrap();
        assert!(text.starts_with(YAML_HEADER));
        assert!(text.contains("Core words"));
    }

    #[test]
    fn test_format_properties() {
        assert!(SnapshotFormat::Canonical.is_restorable());
        assert!(!SnapshotFormat::Csv.is_restorable());
        assert_eq!(SnapshotFormat::Yaml.extension(), "yaml");
    }
}
