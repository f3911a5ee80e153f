//! JSONL event log access with file locking.
//!
//! The pump-sync layer appends delivery events one JSON object per line.
//! Readers take a shared lock so they always see whole lines; writers take
//! an exclusive lock per append.

use basal_core::{DoseEntry, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// JSONL-based dose sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Append one dose under an exclusive lock
    pub fn append(&self, dose: &DoseEntry) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(dose)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!(
            "Appended {:?} {:?} to event log",
            dose.dose_type,
            dose.sync_identifier
        );
        Ok(())
    }
}

/// Read every parseable record from a JSONL file
///
/// A missing file is an empty log. Lines that fail to parse are logged and
/// skipped so one corrupt write can't hide the rest of the history.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        tracing::debug!("No event log at {:?}", path);
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Skipping unparseable line {} of {:?}: {}", line_num + 1, path, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} records from {:?}", records.len(), path);
    Ok(records)
}

/// Read a whole JSON document (schedules, override lists)
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use basal_core::{DoseType, DoseUnit, ReservoirReading};
    use chrono::{TimeZone, Utc};

    fn bolus(id: &str) -> DoseEntry {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 7, 30, 0).unwrap();
        DoseEntry::new(DoseType::Bolus, at, at, 2.0, DoseUnit::Units).with_sync_identifier(id)
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("logs").join("events.jsonl");

        let sink = JsonlSink::new(&log_path);
        sink.append(&bolus("a")).unwrap();
        sink.append(&bolus("b")).unwrap();

        let doses: Vec<DoseEntry> = read_records(&log_path).unwrap();
        assert_eq!(doses.len(), 2);
        assert_eq!(doses[1].sync_identifier.as_deref(), Some("b"));
    }

    #[test]
    fn test_missing_log_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let doses: Vec<DoseEntry> = read_records(&temp_dir.path().join("none.jsonl")).unwrap();
        assert!(doses.is_empty());
    }

    #[test]
    fn test_corrupt_lines_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("readings.jsonl");
        std::fs::write(
            &path,
            "{\"timestamp\":\"2024-02-01T07:00:00Z\",\"remaining_units\":100.0}\n\
             {not json\n\
             \n\
             {\"timestamp\":\"2024-02-01T07:05:00Z\",\"remaining_units\":99.5}\n",
        )
        .unwrap();

        let readings: Vec<ReservoirReading> = read_records(&path).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].remaining_units, 99.5);
    }
}
