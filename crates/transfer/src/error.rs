//! Transfer error types

use ballast_core::{Amount, AssetCode};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Insufficient {asset} balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        asset: AssetCode,
        account: String,
        needed: Amount,
        available: Amount,
    },

    /// Service could not be reached or timed out; safe to retry
    #[error("Transfer service unavailable: {0}")]
    Unavailable(String),

    /// Service refused the request; retrying will not help
    #[error("Transfer rejected: {0}")]
    Rejected(String),
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Unavailable(_))
    }
}
