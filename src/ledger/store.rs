//! Append-only metadata ledger
//!
//! The ledger file uses a line-delimited JSON format (JSONL) where each line
//! is one `LedgerEvent`. Lines are only ever appended; the current state of a
//! backup is the latest `recorded` event for its id, unless a later `reaped`
//! event tombstones it.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;

use crate::error::{BackupError, BackupResult};

use super::metadata::{BackupMetadata, LedgerEvent};

/// Durable record of every backup attempt
#[derive(Debug)]
pub struct MetadataLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Default)]
struct LedgerState {
    current: HashMap<String, BackupMetadata>,
    reaped: HashSet<String>,
}

impl LedgerState {
    fn visible(self) -> Vec<BackupMetadata> {
        let reaped = self.reaped;
        let mut entries: Vec<BackupMetadata> = self
            .current
            .into_values()
            .filter(|m| !reaped.contains(&m.id))
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        entries
    }
}

impl MetadataLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the current state of an entry
    ///
    /// Rejects transitions out of a terminal status, backwards transitions,
    /// and changes to tombstoned entries.
    pub fn append(&self, metadata: &BackupMetadata) -> BackupResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let state = self.replay()?;
        if state.reaped.contains(&metadata.id) {
            return Err(BackupError::Ledger(format!(
                "Backup {} has been reaped",
                metadata.id
            )));
        }
        if let Some(existing) = state.current.get(&metadata.id) {
            if !existing.status.can_transition_to(metadata.status) {
                return Err(BackupError::Ledger(format!(
                    "Backup {} cannot move from {} to {}",
                    metadata.id, existing.status, metadata.status
                )));
            }
        }

        self.write_event(&LedgerEvent::Recorded {
            at: Utc::now(),
            metadata: metadata.clone(),
        })
    }

    /// Mark an entry as reaped; it disappears from `list` and `get`
    ///
    /// Tombstoning an already reaped entry succeeds.
    pub fn tombstone(&self, id: &str) -> BackupResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let state = self.replay()?;
        if state.reaped.contains(id) {
            return Ok(());
        }
        let existing = state
            .current
            .get(id)
            .ok_or_else(|| BackupError::backup_not_found(id))?;
        if !existing.is_terminal() {
            return Err(BackupError::Ledger(format!(
                "Backup {} is still {}",
                id, existing.status
            )));
        }

        self.write_event(&LedgerEvent::Reaped {
            at: Utc::now(),
            id: id.to_string(),
        })
    }

    /// Current state of a visible entry
    pub fn get(&self, id: &str) -> BackupResult<Option<BackupMetadata>> {
        let state = self.replay()?;
        if state.reaped.contains(id) {
            return Ok(None);
        }
        Ok(state.current.get(id).cloned())
    }

    /// Visible entries, newest first, at most `limit`
    pub fn list(&self, limit: usize) -> BackupResult<Vec<BackupMetadata>> {
        let mut entries = self.list_all()?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// Every visible entry, newest first
    pub fn list_all(&self) -> BackupResult<Vec<BackupMetadata>> {
        Ok(self.replay()?.visible())
    }

    /// Every event in file order
    pub fn events(&self) -> BackupResult<Vec<LedgerEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .map_err(|e| BackupError::Ledger(format!("Failed to open ledger: {}", e)))?;

        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|e| BackupError::Ledger(format!("Failed to read ledger: {}", e)))?;

        let last = lines.len().saturating_sub(1);
        let mut events = Vec::with_capacity(lines.len());

        for (line_num, line) in lines.iter().enumerate() {
            // Skip empty lines
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<LedgerEvent>(line) {
                Ok(event) => events.push(event),
                // A crash mid-append can leave a torn final line
                Err(e) if line_num == last => {
                    warn!(line = line_num + 1, error = %e, "ignoring torn ledger line");
                }
                Err(e) => {
                    return Err(BackupError::Ledger(format!(
                        "Failed to parse ledger entry at line {}: {}",
                        line_num + 1,
                        e
                    )))
                }
            }
        }

        Ok(events)
    }

    fn replay(&self) -> BackupResult<LedgerState> {
        let mut state = LedgerState::default();
        for event in self.events()? {
            match event {
                LedgerEvent::Recorded { metadata, .. } => {
                    state.current.insert(metadata.id.clone(), metadata);
                }
                LedgerEvent::Reaped { id, .. } => {
                    state.reaped.insert(id);
                }
            }
        }
        Ok(state)
    }

    fn write_event(&self, event: &LedgerEvent) -> BackupResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackupError::Ledger(format!("Failed to create ledger dir: {}", e)))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BackupError::Ledger(format!("Failed to open ledger: {}", e)))?;

        // A torn final line never held a complete event; drop it
        if let Some(start) = torn_tail_start(&mut file)? {
            warn!(offset = start, "truncating torn ledger line");
            file.set_len(start)
                .map_err(|e| BackupError::Ledger(format!("Failed to repair ledger: {}", e)))?;
        }

        let json = serde_json::to_string(event)
            .map_err(|e| BackupError::Ledger(format!("Failed to serialize ledger event: {}", e)))?;

        writeln!(file, "{}", json)
            .map_err(|e| BackupError::Ledger(format!("Failed to write ledger event: {}", e)))?;

        file.flush()
            .map_err(|e| BackupError::Ledger(format!("Failed to flush ledger: {}", e)))?;
        file.sync_data()
            .map_err(|e| BackupError::Ledger(format!("Failed to sync ledger: {}", e)))
    }
}

/// Offset where an unterminated final line starts, if there is one
fn torn_tail_start(file: &mut File) -> BackupResult<Option<u64>> {
    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut bytes))
        .map_err(|e| BackupError::Ledger(format!("Failed to read ledger: {}", e)))?;

    match bytes.last() {
        None | Some(b'\n') => Ok(None),
        Some(_) => {
            let start = bytes
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |pos| pos + 1);
            Ok(Some(start as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::DestinationKind;
    use crate::ledger::{BackupStatus, BackupType};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn create_test_ledger() -> (MetadataLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = MetadataLedger::new(temp_dir.path().join("ledger.jsonl"));
        (ledger, temp_dir)
    }

    fn entry(id: &str, days_ago: i64) -> BackupMetadata {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        BackupMetadata::pending(
            id,
            base - Duration::days(days_ago),
            BackupType::Scheduled,
            vec![DestinationKind::Local],
        )
    }

    #[test]
    fn test_empty_ledger() {
        let (ledger, _temp) = create_test_ledger();
        assert!(ledger.list(10).unwrap().is_empty());
        assert!(ledger.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_latest_record_wins() {
        let (ledger, _temp) = create_test_ledger();
        let pending = entry("a", 0);
        ledger.append(&pending).unwrap();
        ledger
            .append(&pending.with_status(BackupStatus::InProgress))
            .unwrap();
        ledger
            .append(&pending.with_status(BackupStatus::Completed))
            .unwrap();

        let current = ledger.get("a").unwrap().unwrap();
        assert_eq!(current.status, BackupStatus::Completed);
        assert_eq!(ledger.list(10).unwrap().len(), 1);
        assert_eq!(ledger.events().unwrap().len(), 3);
    }

    #[test]
    fn test_terminal_entries_are_immutable() {
        let (ledger, _temp) = create_test_ledger();
        let done = entry("a", 0).with_status(BackupStatus::Completed);
        ledger.append(&done).unwrap();

        let err = ledger
            .append(&done.finished_with_error(BackupStatus::Failed, "late"))
            .unwrap_err();
        assert!(matches!(err, BackupError::Ledger(_)));
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let (ledger, _temp) = create_test_ledger();
        let pending = entry("a", 0);
        ledger
            .append(&pending.with_status(BackupStatus::InProgress))
            .unwrap();
        assert!(ledger.append(&pending).is_err());
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let (ledger, _temp) = create_test_ledger();
        for (id, days) in [("old", 5), ("new", 1), ("mid", 3)] {
            ledger
                .append(&entry(id, days).with_status(BackupStatus::Completed))
                .unwrap();
        }

        let ids: Vec<String> = ledger.list(2).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }

    #[test]
    fn test_tombstone_hides_entry() {
        let (ledger, _temp) = create_test_ledger();
        ledger
            .append(&entry("a", 40).with_status(BackupStatus::Completed))
            .unwrap();
        ledger.tombstone("a").unwrap();
        ledger.tombstone("a").unwrap();

        assert!(ledger.get("a").unwrap().is_none());
        assert!(ledger.list_all().unwrap().is_empty());
        assert!(ledger
            .append(&entry("a", 40).with_status(BackupStatus::Completed))
            .is_err());
    }

    #[test]
    fn test_tombstone_rejects_running_and_unknown() {
        let (ledger, _temp) = create_test_ledger();
        ledger.append(&entry("a", 0)).unwrap();
        assert!(matches!(
            ledger.tombstone("a").unwrap_err(),
            BackupError::Ledger(_)
        ));
        assert!(ledger.tombstone("zzz").unwrap_err().is_not_found());
    }

    #[test]
    fn test_torn_final_line_is_ignored() {
        let (ledger, _temp) = create_test_ledger();
        ledger
            .append(&entry("a", 0).with_status(BackupStatus::Completed))
            .unwrap();

        let mut file = OpenOptions::new().append(true).open(ledger.path()).unwrap();
        write!(file, "{{\"event\":\"recor").unwrap();

        assert_eq!(ledger.list_all().unwrap().len(), 1);

        ledger
            .append(&entry("b", 1).with_status(BackupStatus::Completed))
            .unwrap();
        assert_eq!(ledger.list_all().unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_middle_line_is_an_error() {
        let (ledger, _temp) = create_test_ledger();
        std::fs::write(ledger.path(), "not json\n{}\n").unwrap();
        assert!(matches!(
            ledger.list_all().unwrap_err(),
            BackupError::Ledger(_)
        ));
    }
}
