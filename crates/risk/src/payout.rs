//! Transfers the protocol owes after a committed event
//!
//! Scheduled by the event that creates the obligation and cleared by
//! `PayoutCompleted` (or by a revert), so they survive restarts.

use ballast_core::{Amount, AssetCode, Principal};
use ballast_transfer::FeeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type PayoutId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PayoutKind {
    /// Push from protocol custody
    Transfer { to: Principal },
    /// Mint new debt tokens
    Mint { to: Principal },
    /// Credit the fee collector
    FeeCredit { kind: FeeKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayout {
    pub id: PayoutId,
    pub asset: AssetCode,
    pub amount: Amount,
    pub kind: PayoutKind,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for PendingPayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PayoutKind::Transfer { to } => {
                write!(f, "#{} transfer {} {} to {}", self.id, self.amount, self.asset, to)
            }
            PayoutKind::Mint { to } => {
                write!(f, "#{} mint {} {} to {}", self.id, self.amount, self.asset, to)
            }
            PayoutKind::FeeCredit { kind } => {
                write!(f, "#{} credit {} {} as {} fee", self.id, self.amount, self.asset, kind)
            }
        }
    }
}

/// Hands out payout ids while an event is being planned
#[derive(Debug)]
pub(crate) struct PayoutAllocator {
    next: PayoutId,
    at: DateTime<Utc>,
    issued: Vec<PendingPayout>,
}

impl PayoutAllocator {
    pub(crate) fn new(next: PayoutId, at: DateTime<Utc>) -> Self {
        Self {
            next,
            at,
            issued: Vec::new(),
        }
    }

    /// Everything issued so far, in order
    pub(crate) fn into_issued(self) -> Vec<PendingPayout> {
        self.issued
    }

    pub(crate) fn payout(&mut self, asset: &AssetCode, amount: Amount, kind: PayoutKind) -> PendingPayout {
        let id = self.next;
        self.next += 1;
        let payout = PendingPayout {
            id,
            asset: asset.clone(),
            amount,
            kind,
            created_at: self.at,
        };
        self.issued.push(payout.clone());
        payout
    }

    /// Fee credit, or nothing for a zero fee
    pub(crate) fn fee(&mut self, asset: &AssetCode, amount: Amount, kind: FeeKind) -> Option<PendingPayout> {
        if amount.is_zero() {
            None
        } else {
            Some(self.payout(asset, amount, PayoutKind::FeeCredit { kind }))
        }
    }

    /// Transfer, or nothing for a zero amount
    pub(crate) fn transfer(&mut self, asset: &AssetCode, amount: Amount, to: &Principal) -> Option<PendingPayout> {
        if amount.is_zero() {
            None
        } else {
            Some(self.payout(asset, amount, PayoutKind::Transfer { to: to.clone() }))
        }
    }
}
