//! CSV telemetry export, one row per state-sync sample.

use crate::state::EcuSnapshot;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_TELEMETRY_PATH: &str = "ecu_telemetry.csv";
pub const CSV_HEADER: &str = "Time(s),RPM,Throttle(%),Coolant(C),Load(Nm),Injection(ms),DTC";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("cannot create telemetry log {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("telemetry write failed: {0}")]
    Write(#[from] std::io::Error),
}

/// One exported row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp_s: f64,
    pub snapshot: EcuSnapshot,
}

impl TelemetrySample {
    pub fn to_csv_row(&self) -> String {
        let s = &self.snapshot;
        format!(
            "{:.2},{},{:.2},{:.2},{:.1},{:.3},{}",
            self.timestamp_s,
            s.rpm,
            s.throttle_pct,
            s.coolant_c,
            s.load_nm,
            s.injection_ms,
            s.dtc_label()
        )
    }
}

#[derive(Debug)]
pub struct TelemetryLog<W: Write = BufWriter<File>> {
    writer: W,
    rows: u64,
}

impl TelemetryLog<BufWriter<File>> {
    /// Create (or truncate) `path` and write the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| TelemetryError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Telemetry log opened");
        Self::from_writer(BufWriter::new(file))
    }
}

impl<W: Write> TelemetryLog<W> {
    pub fn from_writer(mut writer: W) -> Result<Self, TelemetryError> {
        writeln!(writer, "{CSV_HEADER}")?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn record(&mut self, sample: &TelemetrySample) -> Result<(), TelemetryError> {
        writeln!(self.writer, "{}", sample.to_csv_row())?;
        // Rows must survive an abort, so no batching
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtc::DtcLabel;

    fn sample(dtc: Option<&str>) -> TelemetrySample {
        TelemetrySample {
            timestamp_s: 1.5,
            snapshot: EcuSnapshot {
                rpm: 812,
                throttle_pct: 20.25,
                coolant_c: 90.0,
                load_nm: 80.0,
                injection_ms: 2.5,
                active_dtc: dtc.and_then(|c| DtcLabel::from(c).ok()),
            },
        }
    }

    #[test]
    fn test_header_then_rows() {
        let mut log = TelemetryLog::from_writer(Vec::new()).unwrap();
        log.record(&sample(None)).unwrap();
        log.record(&sample(Some("P0120"))).unwrap();
        assert_eq!(log.rows(), 2);

        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "1.50,812,20.25,90.00,80.0,2.500,None");
        assert!(lines[2].ends_with(",P0120"));
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.csv");
        std::fs::write(&path, "stale\nrows\n").unwrap();

        let mut log = TelemetryLog::create(&path).unwrap();
        log.record(&sample(None)).unwrap();
        drop(log);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with(CSV_HEADER));
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = TelemetryLog::create(dir.path().join("no/such/dir.csv")).unwrap_err();
        assert!(matches!(err, TelemetryError::Create { .. }));
    }
}
