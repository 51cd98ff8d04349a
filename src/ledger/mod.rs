//! Backup metadata ledger
//!
//! Every backup attempt, successful or not, is recorded here. The ledger is
//! what `list_backups` shows and what retention reads to decide what to
//! delete.

mod metadata;
mod store;

pub use metadata::{BackupMetadata, BackupStatus, BackupType, LedgerEvent};
pub use store::MetadataLedger;
