//! Fee collection collaborator

use async_trait::async_trait;
use ballast_core::{Amount, AssetCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use strum_macros::{Display, EnumString};

use crate::error::TransferError;

/// What a fee credit is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Borrowing,
    Redemption,
    ReserveRedemption,
    StableSurcharge,
    Interest,
}

/// One recorded credit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeCredit {
    pub kind: FeeKind,
    pub asset: AssetCode,
    pub amount: Amount,
}

#[async_trait]
pub trait FeeCollector: Send + Sync {
    /// Credit `amount` of `asset` to the fee ledger
    async fn credit(&self, kind: FeeKind, asset: &AssetCode, amount: Amount)
        -> Result<(), TransferError>;
}

/// In-memory fee ledger with failure injection
#[derive(Default)]
pub struct InMemoryFeeCollector {
    credits: RwLock<Vec<FeeCredit>>,
    failures: AtomicUsize,
}

impl InMemoryFeeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn credits(&self) -> Vec<FeeCredit> {
        self.credits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sum of all credits of one kind
    pub fn total(&self, kind: FeeKind) -> Amount {
        self.credits()
            .into_iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.amount)
            .sum()
    }
}

#[async_trait]
impl FeeCollector for InMemoryFeeCollector {
    async fn credit(
        &self,
        kind: FeeKind,
        asset: &AssetCode,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransferError::Unavailable("injected failure".to_string()));
        }

        let mut credits = self.credits.write().unwrap_or_else(|e| e.into_inner());
        credits.push(FeeCredit {
            kind,
            asset: asset.clone(),
            amount,
        });
        Ok(())
    }
}
