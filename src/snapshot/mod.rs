//! Snapshots: composition, integrity and encoding
//!
//! # Architecture
//!
//! - `SnapshotComposer`: exports every requested domain into one snapshot
//! - `Manifest` / `Snapshot`: what a backup contains, with a content checksum
//! - `ManifestRecord`: sidecar stored beside each payload at a destination
//! - `codec`: canonical (restorable) and export-only encodings
//!
//! # Canonical Format
//!
//! A JSON document with:
//! - `format`: always `keepsafe-snapshot`
//! - `manifest`: schema version, creation time, domains, record counts,
//!   checksum and encryption flag
//! - `record_sets`: one record set per domain, records keyed by id

pub mod checksum;
pub mod codec;
mod composer;
mod manifest;

pub use checksum::bytes_checksum;
pub use codec::{decode, encode, SnapshotFormat};
pub use composer::SnapshotComposer;
pub use manifest::{Manifest, ManifestRecord, Snapshot, SNAPSHOT_SCHEMA_VERSION};
