//! Journal errors

use thiserror::Error;

use crate::record::ChainError;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Journal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid journal file {file}, line {line}: {reason}")]
    InvalidFile {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("Record {got} appended after {last}")]
    OutOfOrder { last: u64, got: u64 },

    #[error("Journal integrity check failed: {0}")]
    Chain(#[from] ChainError),
}
