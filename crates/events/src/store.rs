//! Journal writer
//!
//! Records go to `<dir>/<YYYY-MM-DD>.jsonl`, keyed by the record's own
//! timestamp rather than the wall clock, so a replayed or backdated record
//! lands in the same file on every run. A record is on disk (written,
//! flushed and synced) before `append` returns.

use crate::error::EventError;
use crate::record::EventRecord;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File of one UTC day, held open while records keep arriving for it
struct DayFile {
    day: NaiveDate,
    writer: BufWriter<File>,
}

/// Append-only JSONL journal
pub struct EventStore {
    dir: PathBuf,
    open: Option<DayFile>,
    /// Highest sequence written through this handle
    written: Option<u64>,
}

impl EventStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, EventError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            open: None,
            written: None,
        })
    }

    /// Write one record. Sequences must grow through a given handle.
    pub fn append<E: Serialize>(&mut self, record: &EventRecord<E>) -> Result<(), EventError> {
        if let Some(last) = self.written {
            if record.sequence <= last {
                return Err(EventError::OutOfOrder {
                    last,
                    got: record.sequence,
                });
            }
        }

        let line = serde_json::to_vec(record)?;
        let file = self.file_for(record.timestamp)?;
        file.writer.write_all(&line)?;
        file.writer.write_all(b"\n")?;
        file.writer.flush()?;
        file.writer.get_ref().sync_data()?;

        self.written = Some(record.sequence);
        debug!(sequence = record.sequence, "record appended");
        Ok(())
    }

    /// The open file for `at`'s day, switching files when the day changes
    fn file_for(&mut self, at: DateTime<Utc>) -> Result<&mut DayFile, EventError> {
        let day = at.date_naive();
        let stale = self.open.as_ref().map_or(true, |f| f.day != day);
        if stale {
            self.close()?;
            let path = self.day_path(day);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            info!(file = %path.display(), "journal file opened");
            self.open = Some(DayFile {
                day,
                writer: BufWriter::new(file),
            });
        }
        self.open
            .as_mut()
            .ok_or_else(|| EventError::Io(std::io::Error::other("journal file not open")))
    }

    /// Path of the file holding records stamped on `day`
    pub fn day_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flush and release the open file, if any
    pub fn close(&mut self) -> Result<(), EventError> {
        if let Some(mut file) = self.open.take() {
            file.writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for EventStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::GENESIS_HASH;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_record_lands_in_its_own_day_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut store = EventStore::new(dir.path())?;
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 8, 0, 0).unwrap();

        store.append(&EventRecord::seal(1, at, GENESIS_HASH, json!({"type": "noop"}))?)?;

        let path = store.day_path(at.date_naive());
        assert!(path.ends_with("2024-12-31.jsonl"));
        assert_eq!(fs::read_to_string(path)?.lines().count(), 1);
        Ok(())
    }

    #[test]
    fn test_sequence_must_grow() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut store = EventStore::new(dir.path())?;
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let first = EventRecord::seal(5, at, GENESIS_HASH, json!({"type": "noop"}))?;
        store.append(&first)?;
        let replayed = store.append(&first);

        assert!(matches!(replayed, Err(EventError::OutOfOrder { last: 5, got: 5 })));
        Ok(())
    }
}
