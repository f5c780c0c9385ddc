//! Oracle errors

use ballast_core::AssetCode;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("No price feed for {asset}")]
    AssetNotFound { asset: AssetCode },

    /// Reading older than the staleness bound
    #[error("Price for {asset} observed at {observed_at} is older than {max_age_secs}s")]
    StalePrice {
        asset: AssetCode,
        observed_at: DateTime<Utc>,
        max_age_secs: u64,
    },

    /// The feed could not be reached or answered with garbage
    #[error("Price feed unavailable: {reason}")]
    Unavailable { reason: String },
}
