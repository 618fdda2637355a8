//! Non-volatile fault storage.
//!
//! The on-disk format is one `CODE,MESSAGE` record per line, active faults
//! only. Fields are not escaped: a code containing the delimiter corrupts the
//! record. Messages may contain commas since only the first one splits.

use crate::dtc::Fault;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_NVRAM_PATH: &str = "ecu_nvram.txt";
pub const RECORD_DELIMITER: char = ',';

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fault store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A fault record as persisted. Restored faults are always considered active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFault {
    pub code: String,
    pub message: String,
}

/// Persistence collaborator for the diagnostics manager.
pub trait FaultStore: Send {
    /// Called once when the diagnostics manager is constructed.
    fn load(&mut self) -> Result<Vec<StoredFault>, StoreError>;

    /// Called after every state change. Only active faults are written.
    fn save(&mut self, faults: &[Fault]) -> Result<(), StoreError>;
}

/// Parse the line-oriented record format. Malformed lines are skipped.
pub fn parse_records(contents: &str) -> Vec<StoredFault> {
    let mut records = Vec::new();

    for line in contents.lines() {
        let line = line.trim_end_matches('\r');
        let Some((code, message)) = line.split_once(RECORD_DELIMITER) else {
            continue;
        };
        if code.is_empty() || message.is_empty() {
            continue;
        }
        records.push(StoredFault {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    records
}

pub fn format_records(faults: &[Fault]) -> String {
    let mut out = String::new();
    for fault in faults.iter().filter(|f| f.active) {
        out.push_str(&fault.code);
        out.push(RECORD_DELIMITER);
        out.push_str(&fault.message);
        out.push('\n');
    }
    out
}

/// Text file acting as the ECU's flash chip.
#[derive(Debug, Clone)]
pub struct FileFaultStore {
    path: PathBuf,
}

impl FileFaultStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileFaultStore {
    fn default() -> Self {
        Self::new(DEFAULT_NVRAM_PATH)
    }
}

impl FaultStore for FileFaultStore {
    fn load(&mut self) -> Result<Vec<StoredFault>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored faults yet");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let records = parse_records(&contents);
        for record in &records {
            info!(code = %record.code, "Restored stored fault");
        }
        Ok(records)
    }

    fn save(&mut self, faults: &[Fault]) -> Result<(), StoreError> {
        std::fs::write(&self.path, format_records(faults)).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    contents: String,
    save_count: u32,
}

/// In-memory store. Clones share the same backing record, so a second
/// diagnostics manager built from a clone sees what the first one saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryFaultStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryFaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: &str) -> Self {
        let store = Self::default();
        store.lock().contents = contents.to_string();
        store
    }

    pub fn contents(&self) -> String {
        self.lock().contents.clone()
    }

    pub fn save_count(&self) -> u32 {
        self.lock().save_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FaultStore for MemoryFaultStore {
    fn load(&mut self) -> Result<Vec<StoredFault>, StoreError> {
        Ok(parse_records(&self.lock().contents))
    }

    fn save(&mut self, faults: &[Fault]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.contents = format_records(faults);
        inner.save_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(code: &str, message: &str, active: bool) -> Fault {
        Fault {
            code: code.to_string(),
            message: message.to_string(),
            active,
        }
    }

    #[test]
    fn test_format_writes_active_only() {
        let faults = [
            fault("P0217", "Engine Overheat", true),
            fault("P0120", "TPS Circuit Low", false),
        ];
        assert_eq!(format_records(&faults), "P0217,Engine Overheat\n");
    }

    #[test]
    fn test_parse_splits_on_first_delimiter() {
        let records = parse_records("P0300,Random, multiple misfire\r\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "P0300");
        assert_eq!(records[0].message, "Random, multiple misfire");
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let records = parse_records("\nNOCOMMA\nP0120,\n,orphan message\nP0217,Engine Overheat\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "P0217");
    }

    #[test]
    fn test_parse_keeps_long_codes() {
        let records = parse_records("U0100-TCU,Lost comms with TCU\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "U0100-TCU");
    }

    #[test]
    fn test_memory_store_clones_share_contents() {
        let store = MemoryFaultStore::new();
        let mut writer = store.clone();
        writer.save(&[fault("P0120", "TPS Circuit Low", true)]).unwrap();

        assert_eq!(store.save_count(), 1);
        assert_eq!(store.contents(), "P0120,TPS Circuit Low\n");
    }

    #[test]
    fn test_file_store_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileFaultStore::new(dir.path().join("missing.txt"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.txt");
        let mut store = FileFaultStore::new(&path);

        store.save(&[fault("P0217", "Engine Overheat", true)]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "P0217,Engine Overheat\n");

        let records = FileFaultStore::new(&path).load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "Engine Overheat");
    }

    #[test]
    fn test_file_store_unwritable_path_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be written as a file
        let mut store = FileFaultStore::new(dir.path());
        let err = store.save(&[]).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
