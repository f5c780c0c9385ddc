//! Token ledger collaborator

use async_trait::async_trait;
use ballast_core::{Amount, AssetCode, Principal};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::debug;

use crate::error::TransferError;

/// Custody account holding collateral, reserves and pulled repayments
pub const PROTOCOL_ACCOUNT: &str = "protocol";

/// Moves units of one asset between an account and protocol custody
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Pull `amount` from `from` into protocol custody
    async fn transfer_from(
        &self,
        asset: &AssetCode,
        from: &Principal,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Push `amount` out of protocol custody to `to`
    async fn transfer_to(
        &self,
        asset: &AssetCode,
        to: &Principal,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Create new units (the debt token) in `to`'s account
    async fn mint(&self, asset: &AssetCode, to: &Principal, amount: Amount)
        -> Result<(), TransferError>;

    /// Destroy units held by `from`
    async fn burn(&self, asset: &AssetCode, from: &Principal, amount: Amount)
        -> Result<(), TransferError>;
}

/// In-memory ledger with failure injection
pub struct InMemoryTokenLedger {
    balances: RwLock<HashMap<(AssetCode, String), Decimal>>,
    /// Number of upcoming calls that fail with `Unavailable`
    failures: AtomicUsize,
    /// Same, counting only calls that pay out of the protocol
    outbound_failures: AtomicUsize,
}

impl InMemoryTokenLedger {
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            failures: AtomicUsize::new(0),
            outbound_failures: AtomicUsize::new(0),
        }
    }

    /// Credit an account directly (test funding)
    pub fn deposit(&self, asset: &AssetCode, account: &str, amount: Amount) {
        let mut balances = self.balances.write().unwrap_or_else(|e| e.into_inner());
        *balances
            .entry((asset.clone(), account.to_string()))
            .or_insert(Decimal::ZERO) += amount.value();
    }

    pub fn balance(&self, asset: &AssetCode, account: &str) -> Amount {
        let balances = self.balances.read().unwrap_or_else(|e| e.into_inner());
        let value = balances
            .get(&(asset.clone(), account.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO);
        Amount::new_unchecked(value)
    }

    /// Make the next `count` calls fail as if the service were down
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` transfers out of custody or mints fail, while
    /// pulls and burns go through
    pub fn fail_next_outbound(&self, count: usize) {
        self.outbound_failures.store(count, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Result<(), TransferError> {
        take_failure(&self.failures)
    }

    fn move_units(
        &self,
        asset: &AssetCode,
        from: Option<&str>,
        to: Option<&str>,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.injected_failure()?;

        let mut balances = self.balances.write().unwrap_or_else(|e| e.into_inner());
        if let Some(from) = from {
            let key = (asset.clone(), from.to_string());
            let available = balances.get(&key).copied().unwrap_or(Decimal::ZERO);
            if available < amount.value() {
                return Err(TransferError::InsufficientBalance {
                    asset: asset.clone(),
                    account: from.to_string(),
                    needed: amount,
                    available: Amount::new_unchecked(available),
                });
            }
            balances.insert(key, available - amount.value());
        }
        if let Some(to) = to {
            *balances
                .entry((asset.clone(), to.to_string()))
                .or_insert(Decimal::ZERO) += amount.value();
        }

        debug!(asset = %asset, ?from, ?to, amount = %amount, "ledger movement");
        Ok(())
    }
}

fn take_failure(counter: &AtomicUsize) -> Result<(), TransferError> {
    let remaining = counter.load(Ordering::SeqCst);
    if remaining > 0 {
        counter.store(remaining - 1, Ordering::SeqCst);
        return Err(TransferError::Unavailable("injected failure".to_string()));
    }
    Ok(())
}

impl Default for InMemoryTokenLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenLedger for InMemoryTokenLedger {
    async fn transfer_from(
        &self,
        asset: &AssetCode,
        from: &Principal,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.move_units(asset, Some(from.as_str()), Some(PROTOCOL_ACCOUNT), amount)
    }

    async fn transfer_to(
        &self,
        asset: &AssetCode,
        to: &Principal,
        amount: Amount,
    ) -> Result<(), TransferError> {
        take_failure(&self.outbound_failures)?;
        self.move_units(asset, Some(PROTOCOL_ACCOUNT), Some(to.as_str()), amount)
    }

    async fn mint(
        &self,
        asset: &AssetCode,
        to: &Principal,
        amount: Amount,
    ) -> Result<(), TransferError> {
        take_failure(&self.outbound_failures)?;
        self.move_units(asset, None, Some(to.as_str()), amount)
    }

    async fn burn(
        &self,
        asset: &AssetCode,
        from: &Principal,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.move_units(asset, Some(from.as_str()), None, amount)
    }
}
