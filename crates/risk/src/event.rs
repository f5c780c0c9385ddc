//! Protocol events
//!
//! One variant per state transition. Events carry every computed amount so
//! the fold never recomputes anything; replaying a log gives back exactly
//! the state that wrote it. Unknown types from newer writers decode as
//! `Event::Unknown`.

use ballast_core::{Amount, AssetCode, Price, Principal, Ratio, VaultId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collateral::AssetParams;
use crate::config::StableRepaymentPolicy;
use crate::payout::{PayoutId, PendingPayout};
use crate::rates::{RateCurve, ThresholdCurve};
use crate::state::RedemptionFeeState;

/// Debt created by a borrow and what it owes out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowLeg {
    /// Minted to the borrower
    pub amount: Amount,
    /// Added to the debt on top of `amount`
    pub fee: Amount,
    pub mint: PendingPayout,
    pub fee_credit: Option<PendingPayout>,
}

impl BorrowLeg {
    pub fn debt_added(&self) -> Amount {
        self.amount + self.fee
    }

    pub fn payout_ids(&self) -> Vec<PayoutId> {
        let mut ids = vec![self.mint.id];
        ids.extend(self.fee_credit.as_ref().map(|p| p.id));
        ids
    }
}

/// How a liquidator settled the debt it repaid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Payment {
    /// Debt tokens burned from the payer
    DebtToken,
    /// Stable units pulled from the payer; `surcharge` of them goes to fees
    Stable {
        unit: AssetCode,
        stable_paid: Amount,
        surcharge: Amount,
        policy: StableRepaymentPolicy,
    },
}

impl Payment {
    /// What the payer owes for `debt_repaid` of debt
    pub fn charge(&self, debt_token: &AssetCode, debt_repaid: Amount) -> (AssetCode, Amount) {
        match self {
            Payment::DebtToken => (debt_token.clone(), debt_repaid),
            Payment::Stable {
                unit, stable_paid, ..
            } => (unit.clone(), *stable_paid),
        }
    }
}

/// Debt and collateral one vault gave up to a redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFill {
    pub vault_id: VaultId,
    pub owner: Principal,
    pub created_at: DateTime<Utc>,
    pub last_accrual: DateTime<Utc>,
    pub debt_reduced: Amount,
    pub collateral_taken: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RedemptionLeg {
    /// Paid 1:1 from a stable-unit reserve
    Reserve {
        unit: AssetCode,
        gross: Amount,
        fee: Amount,
        paid: Amount,
        /// Unbacked supply this leg retired
        #[serde(default)]
        gap_closed: Amount,
        payout_id: PayoutId,
        fee_payout_id: Option<PayoutId>,
    },
    /// Paid in collateral taken from the lowest-ratio vaults
    Vaults {
        asset: AssetCode,
        price: Price,
        fee_rate: Ratio,
        gross: Amount,
        fee: Amount,
        paid: Amount,
        fills: Vec<VaultFill>,
        payout_id: PayoutId,
        fee_payout_id: Option<PayoutId>,
    },
}

impl RedemptionLeg {
    /// Debt tokens this leg consumed
    pub fn gross(&self) -> Amount {
        match self {
            RedemptionLeg::Reserve { gross, .. } | RedemptionLeg::Vaults { gross, .. } => *gross,
        }
    }

    pub fn payout_id(&self) -> PayoutId {
        match self {
            RedemptionLeg::Reserve { payout_id, .. } | RedemptionLeg::Vaults { payout_id, .. } => {
                *payout_id
            }
        }
    }

    pub fn payout_ids(&self) -> Vec<PayoutId> {
        let fee = match self {
            RedemptionLeg::Reserve { fee_payout_id, .. }
            | RedemptionLeg::Vaults { fee_payout_id, .. } => *fee_payout_id,
        };
        let mut ids = vec![self.payout_id()];
        ids.extend(fee);
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestEntry {
    pub vault_id: VaultId,
    /// Annual rate applied
    pub rate: Ratio,
    pub interest: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // === Admin ===
    AssetConfigured {
        asset: AssetCode,
        params: AssetParams,
    },
    AssetEnabled {
        asset: AssetCode,
        enabled: bool,
    },
    GlobalRateCurveSet {
        curve: ThresholdCurve,
    },
    AssetRateCurveSet {
        asset: AssetCode,
        curve: Option<RateCurve>,
    },
    RecoveryRateCurveSet {
        curve: ThresholdCurve,
    },
    HealthyRatioOverrideSet {
        asset: AssetCode,
        ratio: Option<Ratio>,
    },
    RecoveryRateOverrideSet {
        asset: AssetCode,
        rate: Option<Ratio>,
    },
    StableFeeSet {
        fee: Ratio,
    },
    StableUnitConfigured {
        unit: AssetCode,
        enabled: bool,
    },

    // === Oracle ===
    PriceUpdated {
        asset: AssetCode,
        price: Price,
        observed_at: DateTime<Utc>,
    },

    // === Vault ledger ===
    VaultOpened {
        vault_id: VaultId,
        owner: Principal,
        asset: AssetCode,
        collateral: Amount,
        opened_at: DateTime<Utc>,
        #[serde(default)]
        borrow: Option<BorrowLeg>,
    },
    CollateralAdded {
        vault_id: VaultId,
        amount: Amount,
    },
    CollateralWithdrawn {
        vault_id: VaultId,
        amount: Amount,
        payout: PendingPayout,
    },
    Borrowed {
        vault_id: VaultId,
        leg: BorrowLeg,
        borrowed_at: DateTime<Utc>,
    },
    /// The mint for a borrow failed; the debt is taken back
    BorrowReverted {
        vault_id: VaultId,
        leg: BorrowLeg,
    },
    Repaid {
        vault_id: VaultId,
        amount: Amount,
    },
    RepaidWithStable {
        vault_id: VaultId,
        unit: AssetCode,
        /// Debt reduced and added to the reserve
        amount: Amount,
        stable_paid: Amount,
        surcharge: Amount,
        policy: StableRepaymentPolicy,
        fee_credit: Option<PendingPayout>,
    },
    VaultClosed {
        vault_id: VaultId,
        forgiven_debt: Amount,
        payout: Option<PendingPayout>,
    },

    // === Liquidation ===
    VaultLiquidated {
        vault_id: VaultId,
        owner: Principal,
        liquidator: Principal,
        asset: AssetCode,
        price: Price,
        debt_repaid: Amount,
        collateral_seized: Amount,
        surplus: Amount,
        payment: Payment,
        payouts: Vec<PendingPayout>,
    },
    VaultPartiallyLiquidated {
        vault_id: VaultId,
        liquidator: Principal,
        price: Price,
        debt_repaid: Amount,
        collateral_seized: Amount,
        /// Repay amount solved to restore the recovery target
        targeted: bool,
        payment: Payment,
        payouts: Vec<PendingPayout>,
    },

    // === Redemption ===
    Redeemed {
        redeemer: Principal,
        requested: Amount,
        legs: Vec<RedemptionLeg>,
        fee_state_before: RedemptionFeeState,
        fee_state_after: RedemptionFeeState,
        payouts: Vec<PendingPayout>,
        redeemed_at: DateTime<Utc>,
    },
    /// Payout of some legs failed; those legs are undone and the debt
    /// tokens they consumed are reminted to the redeemer
    RedemptionReverted {
        redeemer: Principal,
        redemption_sequence: u64,
        legs: Vec<RedemptionLeg>,
        cancelled_payouts: Vec<PayoutId>,
        restore_fee_state: Option<RedemptionFeeState>,
        remint: Amount,
    },

    // === Keeper ===
    InterestAccrued {
        accrued_at: DateTime<Utc>,
        entries: Vec<InterestEntry>,
        total: Amount,
        fee_credit: Option<PendingPayout>,
    },
    PayoutCompleted {
        payout_id: PayoutId,
    },

    /// Written by a newer version; skipped on replay
    #[serde(other)]
    Unknown,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::AssetConfigured { .. } => "asset_configured",
            Event::AssetEnabled { .. } => "asset_enabled",
            Event::GlobalRateCurveSet { .. } => "global_rate_curve_set",
            Event::AssetRateCurveSet { .. } => "asset_rate_curve_set",
            Event::RecoveryRateCurveSet { .. } => "recovery_rate_curve_set",
            Event::HealthyRatioOverrideSet { .. } => "healthy_ratio_override_set",
            Event::RecoveryRateOverrideSet { .. } => "recovery_rate_override_set",
            Event::StableFeeSet { .. } => "stable_fee_set",
            Event::StableUnitConfigured { .. } => "stable_unit_configured",
            Event::PriceUpdated { .. } => "price_updated",
            Event::VaultOpened { .. } => "vault_opened",
            Event::CollateralAdded { .. } => "collateral_added",
            Event::CollateralWithdrawn { .. } => "collateral_withdrawn",
            Event::Borrowed { .. } => "borrowed",
            Event::BorrowReverted { .. } => "borrow_reverted",
            Event::Repaid { .. } => "repaid",
            Event::RepaidWithStable { .. } => "repaid_with_stable",
            Event::VaultClosed { .. } => "vault_closed",
            Event::VaultLiquidated { .. } => "vault_liquidated",
            Event::VaultPartiallyLiquidated { .. } => "vault_partially_liquidated",
            Event::Redeemed { .. } => "redeemed",
            Event::RedemptionReverted { .. } => "redemption_reverted",
            Event::InterestAccrued { .. } => "interest_accrued",
            Event::PayoutCompleted { .. } => "payout_completed",
            Event::Unknown => "unknown",
        }
    }

    /// Vaults this event touches
    pub fn vault_ids(&self) -> Vec<VaultId> {
        match self {
            Event::VaultOpened { vault_id, .. }
            | Event::CollateralAdded { vault_id, .. }
            | Event::CollateralWithdrawn { vault_id, .. }
            | Event::Borrowed { vault_id, .. }
            | Event::BorrowReverted { vault_id, .. }
            | Event::Repaid { vault_id, .. }
            | Event::RepaidWithStable { vault_id, .. }
            | Event::VaultClosed { vault_id, .. }
            | Event::VaultLiquidated { vault_id, .. }
            | Event::VaultPartiallyLiquidated { vault_id, .. } => vec![*vault_id],
            Event::Redeemed { legs, .. } | Event::RedemptionReverted { legs, .. } => legs
                .iter()
                .flat_map(|leg| match leg {
                    RedemptionLeg::Vaults { fills, .. } => {
                        fills.iter().map(|f| f.vault_id).collect()
                    }
                    RedemptionLeg::Reserve { .. } => Vec::new(),
                })
                .collect(),
            Event::InterestAccrued { entries, .. } => {
                entries.iter().map(|e| e.vault_id).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Payouts this event schedules
    pub fn scheduled_payouts(&self) -> Vec<&PendingPayout> {
        match self {
            Event::VaultOpened { borrow, .. } => borrow
                .iter()
                .flat_map(|leg| std::iter::once(&leg.mint).chain(leg.fee_credit.iter()))
                .collect(),
            Event::Borrowed { leg, .. } => std::iter::once(&leg.mint)
                .chain(leg.fee_credit.iter())
                .collect(),
            Event::CollateralWithdrawn { payout, .. } => vec![payout],
            Event::RepaidWithStable { fee_credit, .. } => fee_credit.iter().collect(),
            Event::VaultClosed { payout, .. } => payout.iter().collect(),
            Event::VaultLiquidated { payouts, .. }
            | Event::VaultPartiallyLiquidated { payouts, .. }
            | Event::Redeemed { payouts, .. } => payouts.iter().collect(),
            Event::InterestAccrued { fee_credit, .. } => fee_credit.iter().collect(),
            _ => Vec::new(),
        }
    }
}
