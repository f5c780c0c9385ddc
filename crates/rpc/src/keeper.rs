//! Keeper operations: price ingest, interest accrual, payout retries

use ballast_core::{AssetCode, Principal};
use ballast_oracle::PriceReading;
use ballast_risk::{admin, interest, PendingPayout, ProtocolError};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::context::{AppContext, Receipt};

impl AppContext {
    /// Record one oracle reading. Allowed in every mode.
    pub async fn ingest_price(&self, reading: &PriceReading) -> Result<Receipt, ProtocolError> {
        let record = self
            .plan_and_commit("ingest_price", |state, now| {
                if admin::below_floor(state, reading) {
                    warn!(
                        asset = %reading.asset,
                        price = %reading.price,
                        "price below sanity floor, protocol goes read-only"
                    );
                }
                admin::plan_price_update(state, reading, now)
            })
            .await?;
        Ok(Receipt::new(record))
    }

    /// Pull the latest reading for every configured asset and stable unit.
    /// Returns how many were recorded.
    pub async fn refresh_prices(&self) -> usize {
        let assets: Vec<(AssetCode, Option<DateTime<Utc>>)> = self
            .with_state(|state| {
                state
                    .assets()
                    .map(|a| (a.asset.clone(), a.last_price_at))
                    .chain(state.stable_units().map(|u| (u.unit.clone(), u.last_price_at)))
                    .collect()
            })
            .await;
        let codes: Vec<AssetCode> = assets.iter().map(|(code, _)| code.clone()).collect();
        let readings = self.oracle.get_prices(&codes).await;

        let mut recorded = 0;
        for ((asset, stored_at), reading) in assets.iter().zip(readings) {
            let reading = match reading {
                Ok(reading) => reading,
                Err(e) => {
                    warn!(asset = %asset, error = %e, "oracle read failed");
                    continue;
                }
            };
            if *stored_at == Some(reading.observed_at) {
                continue;
            }
            match self.ingest_price(&reading).await {
                Ok(_) => recorded += 1,
                Err(ProtocolError::OutdatedReading { .. }) => {
                    debug!(asset = %asset, "reading older than the stored one")
                }
                Err(e) => warn!(asset = %asset, error = %e, "price reading refused"),
            }
        }
        debug!(recorded, "prices refreshed");
        recorded
    }

    /// Charge interest on every indebted vault. Returns None when nothing
    /// had accrued.
    pub async fn accrue_interest(&self, caller: &Principal) -> Result<Option<Receipt>, ProtocolError> {
        let _guard = self.guard(caller, "accrue_interest")?;
        let record = self
            .maybe_commit("accrue_interest", interest::plan_accrue_interest)
            .await?;
        match record {
            Some(record) => Ok(Some(self.finish(record).await)),
            None => Ok(None),
        }
    }

    /// Try again every payout that is still pending. Returns how many
    /// were delivered.
    pub async fn retry_pending_payouts(&self, caller: &Principal) -> Result<usize, ProtocolError> {
        let _guard = self.guard(caller, "retry_payouts")?;
        let pending: Vec<PendingPayout> = self
            .with_state(|state| state.pending_payouts().cloned().collect())
            .await;
        if pending.is_empty() {
            return Ok(0);
        }

        let total = pending.len();
        let unsettled = self.settle(pending.iter()).await;
        let delivered = total - unsettled.len();
        info!(delivered, still_pending = unsettled.len(), "pending payouts retried");
        Ok(delivered)
    }
}
