//! Guard errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Operation already in progress: {operation} for {caller}")]
    AlreadyInProgress { caller: String, operation: String },

    #[error("Too many operations in flight (cap {cap})")]
    CapacityExceeded { cap: usize },
}
