//! Core oracle types

use async_trait::async_trait;
use ballast_core::{AssetCode, Price, Ratio};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::OracleError;

/// A single price observation for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceReading {
    pub asset: AssetCode,
    /// USD price of one unit
    pub price: Price,
    /// When the feed observed the price (not when we fetched it)
    pub observed_at: DateTime<Utc>,
}

impl PriceReading {
    pub fn new(asset: AssetCode, price: Price, observed_at: DateTime<Utc>) -> Self {
        Self {
            asset,
            price,
            observed_at,
        }
    }

    /// Age in whole seconds at `now`. Readings from the future count as fresh.
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        let age = now.signed_duration_since(self.observed_at).num_seconds();
        age.max(0) as u64
    }

    /// Check if the reading is older than `max_age_secs`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age_secs: u64) -> bool {
        self.age_secs(now) > max_age_secs
    }

    /// Reject the reading if it is stale
    pub fn ensure_fresh(&self, now: DateTime<Utc>, max_age_secs: u64) -> Result<(), OracleError> {
        if self.is_stale(now, max_age_secs) {
            return Err(OracleError::StalePrice {
                asset: self.asset.clone(),
                observed_at: self.observed_at,
                max_age_secs,
            });
        }
        Ok(())
    }

    /// Whether a stable unit trades within `band` of 1.0
    pub fn within_parity(&self, band: Ratio) -> bool {
        self.price.deviation_from_parity() <= band
    }
}

/// Price Oracle trait - interface for price feeds
///
/// The core only consumes readings; validation of the feed itself belongs
/// to the oracle service.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Get the latest reading for an asset
    async fn get_price(&self, asset: &AssetCode) -> Result<PriceReading, OracleError>;

    /// Get readings for multiple assets at once
    async fn get_prices(&self, assets: &[AssetCode]) -> Vec<Result<PriceReading, OracleError>> {
        let mut results = Vec::new();
        for asset in assets {
            results.push(self.get_price(asset).await);
        }
        results
    }

    /// All assets with a feed
    async fn supported_assets(&self) -> Vec<AssetCode>;

    async fn is_supported(&self, asset: &AssetCode) -> bool {
        self.supported_assets().await.contains(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn reading(price: rust_decimal::Decimal, observed_at: DateTime<Utc>) -> PriceReading {
        PriceReading::new(
            "USDC".parse().unwrap(),
            Price::new(price).unwrap(),
            observed_at,
        )
    }

    #[test]
    fn test_staleness_boundary() {
        let now = Utc::now();
        let fresh = reading(dec!(1), now - Duration::seconds(600));
        let stale = reading(dec!(1), now - Duration::seconds(601));

        assert!(fresh.ensure_fresh(now, 600).is_ok());
        assert!(matches!(
            stale.ensure_fresh(now, 600),
            Err(OracleError::StalePrice { max_age_secs: 600, .. })
        ));
    }

    #[test]
    fn test_future_reading_is_fresh() {
        let now = Utc::now();
        let ahead = reading(dec!(1), now + Duration::seconds(30));
        assert_eq!(ahead.age_secs(now), 0);
    }

    #[test]
    fn test_parity_band() {
        let band = Ratio::new(dec!(0.05)).unwrap();
        assert!(reading(dec!(0.95), Utc::now()).within_parity(band));
        assert!(reading(dec!(1.05), Utc::now()).within_parity(band));
        assert!(!reading(dec!(0.94), Utc::now()).within_parity(band));
    }
}
