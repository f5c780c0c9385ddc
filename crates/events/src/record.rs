//! Event record envelope and hash chain
//!
//! Each line of the log is one `EventRecord`. The hash covers the sequence,
//! the previous hash, the timestamp and a canonical JSON rendering of the
//! payload (object keys sorted), so a record read back as a generic
//! `serde_json::Value` verifies even when the reader does not know the
//! payload's newer fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Version stamped on newly written records
pub const SCHEMA_VERSION: u16 = 1;

/// `prev_hash` of the first record
pub const GENESIS_HASH: &str = "GENESIS";

fn legacy_schema_version() -> u16 {
    1
}

/// One committed state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord<E> {
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u16,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
    pub event: E,
}

impl<E: Serialize> EventRecord<E> {
    /// Build a record and compute its hash
    pub fn seal(
        sequence: u64,
        timestamp: DateTime<Utc>,
        prev_hash: impl Into<String>,
        event: E,
    ) -> Result<Self, serde_json::Error> {
        let mut record = Self {
            schema_version: SCHEMA_VERSION,
            sequence,
            timestamp,
            prev_hash: prev_hash.into(),
            hash: String::new(),
            event,
        };
        record.hash = record.compute_hash()?;
        Ok(record)
    }

    /// SHA256 over everything except the `hash` field itself
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_value(&self.event)?.to_string();

        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(canonical.as_bytes());

        Ok(hex::encode(hasher.finalize()))
    }
}

/// Errors in hash chain verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Broken link at seq {sequence}: expected prev_hash '{expected}', got '{actual}'")]
    BrokenLink {
        sequence: u64,
        expected: String,
        actual: String,
    },

    #[error("Invalid hash at seq {sequence}: expected '{expected}', got '{actual}'")]
    InvalidHash {
        sequence: u64,
        expected: String,
        actual: String,
    },

    #[error("Invalid sequence: expected {expected}, got {actual}")]
    InvalidSequence { expected: u64, actual: u64 },

    #[error("Unhashable payload at seq {sequence}: {reason}")]
    Unhashable { sequence: u64, reason: String },
}

/// Verify hash chain integrity of records in log order
pub fn verify_chain<E: Serialize>(records: &[EventRecord<E>]) -> Result<(), ChainError> {
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut expected_sequence = 1;

    for record in records {
        if record.sequence != expected_sequence {
            return Err(ChainError::InvalidSequence {
                expected: expected_sequence,
                actual: record.sequence,
            });
        }

        if record.prev_hash != prev_hash {
            return Err(ChainError::BrokenLink {
                sequence: record.sequence,
                expected: prev_hash,
                actual: record.prev_hash.clone(),
            });
        }

        let calculated = record.compute_hash().map_err(|e| ChainError::Unhashable {
            sequence: record.sequence,
            reason: e.to_string(),
        })?;
        if record.hash != calculated {
            return Err(ChainError::InvalidHash {
                sequence: record.sequence,
                expected: calculated,
                actual: record.hash.clone(),
            });
        }

        prev_hash = record.hash.clone();
        expected_sequence += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn chain(len: u64) -> Vec<EventRecord<Note>> {
        let mut records = Vec::new();
        let mut prev = GENESIS_HASH.to_string();
        for seq in 1..=len {
            let record = EventRecord::seal(
                seq,
                Utc::now(),
                prev.clone(),
                Note {
                    text: format!("note-{}", seq),
                },
            )
            .unwrap();
            prev = record.hash.clone();
            records.push(record);
        }
        records
    }

    #[test]
    fn test_hash_deterministic() {
        let record = &chain(1)[0];
        assert_eq!(record.compute_hash().unwrap(), record.hash);
    }

    #[test]
    fn test_verify_valid_chain() {
        assert!(verify_chain(&chain(3)).is_ok());
    }

    #[test]
    fn test_verify_broken_link() {
        let mut records = chain(2);
        records[1].prev_hash = "wrong_hash".to_string();
        assert!(matches!(
            verify_chain(&records),
            Err(ChainError::BrokenLink { sequence: 2, .. })
        ));
    }

    #[test]
    fn test_verify_tampered_payload() {
        let mut records = chain(2);
        records[0].event.text = "forged".to_string();
        assert!(matches!(
            verify_chain(&records),
            Err(ChainError::InvalidHash { sequence: 1, .. })
        ));
    }

    #[test]
    fn test_generic_value_verifies_like_typed_payload() {
        let typed = chain(2);
        let raw: Vec<EventRecord<serde_json::Value>> = typed
            .iter()
            .map(|r| serde_json::from_str(&serde_json::to_string(r).unwrap()).unwrap())
            .collect();
        assert!(verify_chain(&raw).is_ok());
    }

    #[test]
    fn test_missing_schema_version_defaults_to_legacy() {
        let line = json!({
            "sequence": 1,
            "timestamp": "2025-01-01T00:00:00Z",
            "prev_hash": "GENESIS",
            "hash": "x",
            "event": {"text": "old"}
        });
        let record: EventRecord<Note> = serde_json::from_value(line).unwrap();
        assert_eq!(record.schema_version, 1);
    }
}
