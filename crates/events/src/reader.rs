//! JSONL event reader - sequential reader for replay and audit

use crate::error::EventError;
use crate::record::EventRecord;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Sequential event reader for replay
pub struct EventReader {
    files: Vec<PathBuf>,
}

impl EventReader {
    /// Create a new reader from a directory. A missing directory reads as empty.
    pub fn from_directory(path: impl AsRef<Path>) -> Result<Self, EventError> {
        let path = path.as_ref();
        let mut files = Vec::new();

        if path.exists() {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let file_path = entry.path();
                if file_path.extension().map_or(false, |ext| ext == "jsonl") {
                    files.push(file_path);
                }
            }
        }

        // Day-stamped names sort chronologically
        files.sort();

        Ok(Self { files })
    }

    /// Read all records from all files in order
    pub fn read_all<E: DeserializeOwned>(&self) -> Result<Vec<EventRecord<E>>, EventError> {
        let mut records = Vec::new();

        for file_path in &self.files {
            let file = File::open(file_path)?;
            let reader = BufReader::new(file);

            for (index, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: EventRecord<E> =
                    serde_json::from_str(&line).map_err(|e| EventError::InvalidFile {
                        file: file_path.display().to_string(),
                        line: index + 1,
                        reason: e.to_string(),
                    })?;
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Read all records with an untyped payload (audit, forward compatibility)
    pub fn read_raw(&self) -> Result<Vec<EventRecord<serde_json::Value>>, EventError> {
        self.read_all()
    }

    /// Get the last record (for sequence and prev_hash)
    pub fn last_record(&self) -> Result<Option<EventRecord<serde_json::Value>>, EventError> {
        Ok(self.read_raw()?.into_iter().last())
    }

    /// Count total records across all files
    pub fn count(&self) -> Result<usize, EventError> {
        let mut count = 0;

        for file_path in &self.files {
            let file = File::open(file_path)?;
            let reader = BufReader::new(file);

            for line in reader.lines() {
                let line = line?;
                if !line.trim().is_empty() {
                    count += 1;
                }
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{verify_chain, GENESIS_HASH};
    use crate::store::EventStore;
    use chrono::{TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use std::io::Write;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum Sample {
        Created { id: u64 },
        Closed { id: u64 },
    }

    #[test]
    fn test_append_then_read_in_order() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut store = EventStore::new(dir.path())?;

        let first = EventRecord::seal(1, Utc::now(), GENESIS_HASH, Sample::Created { id: 7 })?;
        let second = EventRecord::seal(2, Utc::now(), first.hash.clone(), Sample::Closed { id: 7 })?;
        store.append(&first)?;
        store.append(&second)?;
        store.close()?;

        let reader = EventReader::from_directory(dir.path())?;
        let records: Vec<EventRecord<Sample>> = reader.read_all()?;
        assert_eq!(records, vec![first, second]);
        assert_eq!(reader.count()?, 2);
        verify_chain(&records)?;
        Ok(())
    }

    #[test]
    fn test_files_rotate_by_day_and_read_chronologically() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut store = EventStore::new(dir.path())?;

        let day1 = Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2025, 3, 2, 0, 1, 0).unwrap();
        let first = EventRecord::seal(1, day1, GENESIS_HASH, Sample::Created { id: 1 })?;
        let second = EventRecord::seal(2, day2, first.hash.clone(), Sample::Created { id: 2 })?;
        store.append(&first)?;
        store.append(&second)?;
        store.close()?;

        assert!(dir.path().join("2025-03-01.jsonl").exists());
        assert!(dir.path().join("2025-03-02.jsonl").exists());

        let reader = EventReader::from_directory(dir.path())?;
        let last = reader.last_record()?.expect("two records written");
        assert_eq!(last.sequence, 2);
        Ok(())
    }

    #[test]
    fn test_corrupt_line_reports_location() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut file = std::fs::File::create(dir.path().join("2025-01-01.jsonl"))?;
        writeln!(file, "{{not json")?;

        let reader = EventReader::from_directory(dir.path())?;
        let result = reader.read_raw();
        assert!(matches!(result, Err(EventError::InvalidFile { line: 1, .. })));
        Ok(())
    }

    #[test]
    fn test_missing_directory_reads_empty() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let reader = EventReader::from_directory(dir.path().join("nope"))?;
        assert!(reader.read_raw()?.is_empty());
        Ok(())
    }
}
