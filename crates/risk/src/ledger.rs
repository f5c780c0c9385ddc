//! Vault ledger operations
//!
//! Each `plan_*` function validates a request against the current state
//! and returns the event that performs it. Nothing is mutated here.

use ballast_core::{Amount, AssetCode, Principal, Ratio, VaultId};
use ballast_transfer::FeeKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::collateral::AssetConfig;
use crate::config::StableRepaymentPolicy;
use crate::error::ProtocolError;
use crate::event::{BorrowLeg, Event, Payment};
use crate::payout::{PayoutAllocator, PayoutKind};
use crate::state::{Mode, ProtocolState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenVault {
    pub owner: Principal,
    pub asset: AssetCode,
    pub collateral: Amount,
    /// Borrow in the same call
    pub borrow: Option<Amount>,
}

fn require_positive(amount: Amount) -> Result<(), ProtocolError> {
    if amount.is_zero() {
        return Err(ProtocolError::ZeroAmount);
    }
    Ok(())
}

/// Borrowing fee on `amount` in the current mode (zero during Recovery)
pub fn borrowing_fee(state: &ProtocolState, amount: Amount) -> Amount {
    match state.mode() {
        Mode::Recovery => Amount::ZERO,
        Mode::Normal | Mode::ReadOnly => amount.mul_ratio_up(state.config().borrowing_fee),
    }
}

#[allow(clippy::too_many_arguments)]
fn plan_borrow_leg(
    state: &ProtocolState,
    config: &AssetConfig,
    owner: &Principal,
    collateral: Amount,
    current_debt: Amount,
    amount: Amount,
    now: DateTime<Utc>,
    payouts: &mut PayoutAllocator,
) -> Result<BorrowLeg, ProtocolError> {
    require_positive(amount)?;
    let minimum = state.config().min_borrow;
    if amount < minimum {
        return Err(ProtocolError::AmountTooSmall { amount, minimum });
    }

    let price = state.fresh_price(&config.asset, now)?;
    let fee = borrowing_fee(state, amount);
    let new_debt = current_debt + amount + fee;
    let ratio = Ratio::collateral(collateral.value_at(price), new_debt);
    if ratio < config.params.borrow_threshold {
        return Err(ProtocolError::BelowBorrowThreshold {
            ratio,
            threshold: config.params.borrow_threshold,
        });
    }

    let debt_token = &state.config().debt_token;
    Ok(BorrowLeg {
        amount,
        fee,
        mint: payouts.payout(debt_token, amount, PayoutKind::Mint { to: owner.clone() }),
        fee_credit: payouts.fee(debt_token, fee, FeeKind::Borrowing),
    })
}

pub fn plan_open_vault(
    state: &ProtocolState,
    request: &OpenVault,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    let config = state.enabled_asset(&request.asset)?;
    require_positive(request.collateral)?;

    let mut payouts = PayoutAllocator::new(state.next_payout_id, now);
    let borrow = request
        .borrow
        .map(|amount| {
            plan_borrow_leg(
                state,
                config,
                &request.owner,
                request.collateral,
                Amount::ZERO,
                amount,
                now,
                &mut payouts,
            )
        })
        .transpose()?;

    Ok(Event::VaultOpened {
        vault_id: state.next_vault_id,
        owner: request.owner.clone(),
        asset: request.asset.clone(),
        collateral: request.collateral,
        opened_at: now,
        borrow,
    })
}

pub fn plan_add_collateral(
    state: &ProtocolState,
    caller: &Principal,
    vault_id: VaultId,
    amount: Amount,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    state.owned_vault(vault_id, caller)?;
    require_positive(amount)?;
    Ok(Event::CollateralAdded { vault_id, amount })
}

/// Most collateral the vault can release and stay at the borrow threshold
pub fn max_withdrawable(
    state: &ProtocolState,
    vault_id: VaultId,
    now: DateTime<Utc>,
) -> Result<Amount, ProtocolError> {
    let vault = state.existing_vault(vault_id)?;
    if vault.debt.is_zero() {
        return Ok(vault.collateral);
    }
    let config = state.asset_config(&vault.asset)?;
    let price = state.fresh_price(&vault.asset, now)?;
    let locked = Amount::new_unchecked(
        vault.debt.value() * config.params.borrow_threshold.value() / price.value(),
    )
    .round_up();
    Ok(vault.collateral.saturating_sub(&locked))
}

pub fn plan_withdraw_collateral(
    state: &ProtocolState,
    caller: &Principal,
    vault_id: VaultId,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    let vault = state.owned_vault(vault_id, caller)?;
    require_positive(amount)?;

    let maximum = max_withdrawable(state, vault_id, now)?;
    if amount > maximum {
        return Err(ProtocolError::WithdrawExceedsLimit {
            requested: amount,
            maximum,
        });
    }

    let mut payouts = PayoutAllocator::new(state.next_payout_id, now);
    Ok(Event::CollateralWithdrawn {
        vault_id,
        amount,
        payout: payouts.payout(
            &vault.asset,
            amount,
            PayoutKind::Transfer {
                to: vault.owner.clone(),
            },
        ),
    })
}

pub fn plan_borrow(
    state: &ProtocolState,
    caller: &Principal,
    vault_id: VaultId,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    let vault = state.owned_vault(vault_id, caller)?;
    let config = state.enabled_asset(&vault.asset)?;

    let mut payouts = PayoutAllocator::new(state.next_payout_id, now);
    let leg = plan_borrow_leg(
        state,
        config,
        &vault.owner,
        vault.collateral,
        vault.debt,
        amount,
        now,
        &mut payouts,
    )?;
    Ok(Event::Borrowed {
        vault_id,
        leg,
        borrowed_at: now,
    })
}

/// Undo a borrow whose mint failed
pub fn plan_borrow_revert(
    state: &ProtocolState,
    vault_id: VaultId,
    leg: &BorrowLeg,
) -> Result<Event, ProtocolError> {
    let vault = state.existing_vault(vault_id)?;
    if vault.debt < leg.debt_added() {
        return Err(ProtocolError::InvariantViolation(format!(
            "vault {} debt {} below borrowed {}",
            vault_id,
            vault.debt,
            leg.debt_added()
        )));
    }
    Ok(Event::BorrowReverted {
        vault_id,
        leg: leg.clone(),
    })
}

pub fn plan_repay(
    state: &ProtocolState,
    caller: &Principal,
    vault_id: VaultId,
    amount: Amount,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    let vault = state.owned_vault(vault_id, caller)?;
    require_positive(amount)?;
    if amount > vault.debt {
        return Err(ProtocolError::RepayExceedsDebt {
            requested: amount,
            debt: vault.debt,
        });
    }
    Ok(Event::Repaid { vault_id, amount })
}

/// Stable units needed to settle a debt amount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableQuote {
    pub unit: AssetCode,
    pub stable_paid: Amount,
    pub surcharge: Amount,
    pub policy: StableRepaymentPolicy,
}

impl StableQuote {
    pub fn payment(&self) -> Payment {
        Payment::Stable {
            unit: self.unit.clone(),
            stable_paid: self.stable_paid,
            surcharge: self.surcharge,
            policy: self.policy,
        }
    }
}

/// `amount / (1 − surcharge)` stable units, rounded up. The unit must be
/// fresh and within the parity band.
pub fn quote_stable_payment(
    state: &ProtocolState,
    unit: &AssetCode,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<StableQuote, ProtocolError> {
    state.parity_price(unit, now)?;
    let keep = Decimal::ONE - state.stable_fee().value();
    if keep <= Decimal::ZERO {
        return Err(ProtocolError::InvalidParameters(format!(
            "stable fee {} leaves nothing to repay with",
            state.stable_fee()
        )));
    }
    let stable_paid = Amount::new_unchecked(amount.value() / keep).round_up();
    Ok(StableQuote {
        unit: unit.clone(),
        stable_paid,
        surcharge: stable_paid.saturating_sub(&amount),
        policy: state.config().stable_repayment_policy,
    })
}

pub fn plan_repay_with_stable(
    state: &ProtocolState,
    caller: &Principal,
    vault_id: VaultId,
    unit: &AssetCode,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    let vault = state.owned_vault(vault_id, caller)?;
    require_positive(amount)?;
    if amount > vault.debt {
        return Err(ProtocolError::RepayExceedsDebt {
            requested: amount,
            debt: vault.debt,
        });
    }

    let quote = quote_stable_payment(state, unit, amount, now)?;

    let mut payouts = PayoutAllocator::new(state.next_payout_id, now);
    Ok(Event::RepaidWithStable {
        vault_id,
        unit: unit.clone(),
        amount,
        stable_paid: quote.stable_paid,
        surcharge: quote.surcharge,
        policy: quote.policy,
        fee_credit: payouts.fee(unit, quote.surcharge, FeeKind::StableSurcharge),
    })
}

pub fn plan_close_vault(
    state: &ProtocolState,
    caller: &Principal,
    vault_id: VaultId,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    let vault = state.owned_vault(vault_id, caller)?;
    if vault.debt > state.config().dust_threshold {
        return Err(ProtocolError::DebtOutstanding {
            vault_id,
            debt: vault.debt,
        });
    }

    let mut payouts = PayoutAllocator::new(state.next_payout_id, now);
    Ok(Event::VaultClosed {
        vault_id,
        forgiven_debt: vault.debt,
        payout: payouts.transfer(&vault.asset, vault.collateral, &vault.owner),
    })
}
