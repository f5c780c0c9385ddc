//! Mock Oracle for testing
//!
//! Holds fixed readings that tests update programmatically, including
//! backdated readings to exercise the staleness bound.

use async_trait::async_trait;
use ballast_core::{AssetCode, Price};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::OracleError;
use crate::types::{PriceOracle, PriceReading};

/// Mock Price Oracle for testing
pub struct MockOracle {
    readings: RwLock<HashMap<AssetCode, PriceReading>>,
}

impl MockOracle {
    /// Create a new empty mock oracle
    pub fn new() -> Self {
        Self {
            readings: RwLock::new(HashMap::new()),
        }
    }

    /// Set a price observed now
    pub fn set_price(&self, asset: AssetCode, price: Price) {
        self.set_price_at(asset, price, Utc::now());
    }

    /// Set a price with an explicit observation time
    pub fn set_price_at(&self, asset: AssetCode, price: Price, observed_at: DateTime<Utc>) {
        let reading = PriceReading::new(asset.clone(), price, observed_at);
        let mut readings = self.readings.write().unwrap_or_else(|e| e.into_inner());
        readings.insert(asset, reading);
    }

    /// Remove a feed (for testing asset not found)
    pub fn remove_price(&self, asset: &AssetCode) {
        let mut readings = self.readings.write().unwrap_or_else(|e| e.into_inner());
        readings.remove(asset);
    }

    pub fn asset_count(&self) -> usize {
        self.readings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for MockOracle {
    async fn get_price(&self, asset: &AssetCode) -> Result<PriceReading, OracleError> {
        let readings = self.readings.read().unwrap_or_else(|e| e.into_inner());
        readings
            .get(asset)
            .cloned()
            .ok_or_else(|| OracleError::AssetNotFound {
                asset: asset.clone(),
            })
    }

    async fn supported_assets(&self) -> Vec<AssetCode> {
        let readings = self.readings.read().unwrap_or_else(|e| e.into_inner());
        let mut assets: Vec<AssetCode> = readings.keys().cloned().collect();
        assets.sort();
        assets
    }
}
