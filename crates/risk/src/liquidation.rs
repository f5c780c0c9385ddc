//! Liquidation engine
//!
//! A vault is liquidatable below its asset's liquidation threshold: the
//! liquidation ratio in Normal, the borrow threshold in Recovery. Three
//! shapes:
//!
//! - full: the liquidator repays the whole debt and receives collateral
//!   worth `debt × (1 + bonus)`, capped at what the vault holds; any
//!   surplus goes back to the owner and the vault is deleted
//! - partial: the liquidator repays at most a configured share of the debt
//! - targeted: in Recovery, a vault between the liquidation ratio and the
//!   borrow threshold is only brought back to its recovery target

use ballast_core::{Amount, AssetCode, Price, Principal, Ratio, VaultId};
use ballast_transfer::FeeKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::collateral::AssetConfig;
use crate::error::ProtocolError;
use crate::event::{Event, Payment};
use crate::ledger::quote_stable_payment;
use crate::payout::{PayoutAllocator, PayoutKind};
use crate::state::{Mode, ProtocolState};
use crate::vault::Vault;

/// A vault below its threshold, as reported by the liquidatable query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiquidationCandidate {
    pub vault_id: VaultId,
    pub owner: Principal,
    pub asset: AssetCode,
    pub ratio: Ratio,
    pub threshold: Ratio,
    pub debt: Amount,
}

/// Vaults below their threshold at the stored prices, lowest ratio first
pub fn liquidatable_vaults(state: &ProtocolState) -> Vec<LiquidationCandidate> {
    let mut candidates: Vec<_> = state
        .vaults()
        .filter(|v| !v.debt.is_zero())
        .filter_map(|vault| {
            let config = state.asset(&vault.asset)?;
            let ratio = state.collateral_ratio(vault)?;
            let threshold = config.liquidation_threshold(state.mode());
            (ratio < threshold).then(|| LiquidationCandidate {
                vault_id: vault.id,
                owner: vault.owner.clone(),
                asset: vault.asset.clone(),
                ratio,
                threshold,
                debt: vault.debt,
            })
        })
        .collect();
    candidates.sort_by(|a, b| a.ratio.cmp(&b.ratio).then(a.vault_id.cmp(&b.vault_id)));
    candidates
}

struct Target<'a> {
    vault: &'a Vault,
    config: &'a AssetConfig,
    price: Price,
    ratio: Ratio,
}

fn liquidation_target<'a>(
    state: &'a ProtocolState,
    vault_id: VaultId,
    now: DateTime<Utc>,
) -> Result<Target<'a>, ProtocolError> {
    let vault = state.existing_vault(vault_id)?;
    let config = state.asset_config(&vault.asset)?;
    let price = state.fresh_price(&vault.asset, now)?;
    let ratio = vault.ratio_at(price);
    let threshold = config.liquidation_threshold(state.mode());
    if vault.debt.is_zero() || ratio >= threshold {
        return Err(ProtocolError::NotLiquidatable {
            vault_id,
            ratio,
            threshold,
        });
    }
    Ok(Target {
        vault,
        config,
        price,
        ratio,
    })
}

/// `repay × (1 + bonus) / price`, rounded down
fn seized_for(repay: Amount, config: &AssetConfig, price: Price) -> Amount {
    Amount::new_unchecked(repay.value() * config.bonus_multiplier().value() / price.value())
        .round_down()
}

/// Repay that restores the recovery target:
/// `(target × debt − collateral_value) / (target − (1 + bonus))`, rounded up
fn solve_targeted_repay(vault: &Vault, config: &AssetConfig, price: Price) -> Option<Amount> {
    let target = config.params.recovery_target_ratio.value();
    let denominator = target - config.bonus_multiplier().value();
    if denominator <= rust_decimal::Decimal::ZERO {
        return None;
    }
    let numerator = target * vault.debt.value() - vault.collateral.value() * price.value();
    Amount::new(numerator / denominator).ok().map(|a| a.round_up())
}

fn is_targeted_band(state: &ProtocolState, target: &Target<'_>) -> bool {
    state.mode() == Mode::Recovery
        && target.ratio >= target.config.params.liquidation_ratio
        && target.ratio < target.config.params.borrow_threshold
}

/// Repay a targeted Recovery liquidation would use right now, if the vault
/// sits in the targeted band
pub fn targeted_repay_amount(
    state: &ProtocolState,
    vault_id: VaultId,
    now: DateTime<Utc>,
) -> Result<Option<Amount>, ProtocolError> {
    let target = liquidation_target(state, vault_id, now)?;
    if !is_targeted_band(state, &target) {
        return Ok(None);
    }
    Ok(solve_targeted_repay(target.vault, target.config, target.price)
        .filter(|repay| *repay < target.vault.debt))
}

fn payment_for(
    state: &ProtocolState,
    unit: Option<&AssetCode>,
    repay: Amount,
    now: DateTime<Utc>,
) -> Result<Payment, ProtocolError> {
    match unit {
        Some(unit) => Ok(quote_stable_payment(state, unit, repay, now)?.payment()),
        None => Ok(Payment::DebtToken),
    }
}

fn surcharge_credit(payment: &Payment, payouts: &mut PayoutAllocator) {
    if let Payment::Stable {
        unit, surcharge, ..
    } = payment
    {
        payouts.fee(unit, *surcharge, FeeKind::StableSurcharge);
    }
}

/// Liquidate a vault. Full unless the vault qualifies for a targeted
/// Recovery liquidation.
pub fn plan_liquidate_vault(
    state: &ProtocolState,
    liquidator: &Principal,
    vault_id: VaultId,
    payment_unit: Option<&AssetCode>,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    let target = liquidation_target(state, vault_id, now)?;

    if is_targeted_band(state, &target) {
        if let Some(repay) = solve_targeted_repay(target.vault, target.config, target.price) {
            let seized = seized_for(repay, target.config, target.price);
            if repay < target.vault.debt && seized < target.vault.collateral {
                return partial_event(state, liquidator, &target, repay, seized, true, payment_unit, now);
            }
        }
    }

    let vault = target.vault;
    let seized = seized_for(vault.debt, target.config, target.price).min(vault.collateral);
    let surplus = vault.collateral.saturating_sub(&seized);
    let payment = payment_for(state, payment_unit, vault.debt, now)?;

    let mut payouts = PayoutAllocator::new(state.next_payout_id, now);
    payouts.transfer(&vault.asset, seized, liquidator);
    payouts.transfer(&vault.asset, surplus, &vault.owner);
    surcharge_credit(&payment, &mut payouts);

    Ok(Event::VaultLiquidated {
        vault_id,
        owner: vault.owner.clone(),
        liquidator: liquidator.clone(),
        asset: vault.asset.clone(),
        price: target.price,
        debt_repaid: vault.debt,
        collateral_seized: seized,
        surplus,
        payment,
        payouts: payouts.into_issued(),
    })
}

/// Repay part of a liquidatable vault's debt, bounded by the configured
/// fraction
pub fn plan_partial_liquidation(
    state: &ProtocolState,
    liquidator: &Principal,
    vault_id: VaultId,
    repay: Amount,
    payment_unit: Option<&AssetCode>,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    if repay.is_zero() {
        return Err(ProtocolError::ZeroAmount);
    }
    let target = liquidation_target(state, vault_id, now)?;

    let maximum = target
        .vault
        .debt
        .mul_ratio(state.config().partial_liquidation_fraction);
    if repay > maximum {
        return Err(ProtocolError::PartialExceedsFraction {
            requested: repay,
            maximum,
        });
    }

    let seized = seized_for(repay, target.config, target.price);
    if seized >= target.vault.collateral {
        return Err(ProtocolError::WouldExhaustCollateral {
            seized,
            collateral: target.vault.collateral,
        });
    }

    partial_event(state, liquidator, &target, repay, seized, false, payment_unit, now)
}

#[allow(clippy::too_many_arguments)]
fn partial_event(
    state: &ProtocolState,
    liquidator: &Principal,
    target: &Target<'_>,
    repay: Amount,
    seized: Amount,
    targeted: bool,
    payment_unit: Option<&AssetCode>,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    let payment = payment_for(state, payment_unit, repay, now)?;

    let mut payouts = PayoutAllocator::new(state.next_payout_id, now);
    payouts.payout(
        &target.vault.asset,
        seized,
        PayoutKind::Transfer {
            to: liquidator.clone(),
        },
    );
    surcharge_credit(&payment, &mut payouts);

    Ok(Event::VaultPartiallyLiquidated {
        vault_id: target.vault.id,
        liquidator: liquidator.clone(),
        price: target.price,
        debt_repaid: repay,
        collateral_seized: seized,
        targeted,
        payment,
        payouts: payouts.into_issued(),
    })
}

/// Asset and amount the liquidator pays for a planned liquidation
pub fn liquidator_charge(event: &Event, debt_token: &AssetCode) -> Option<(AssetCode, Amount)> {
    match event {
        Event::VaultLiquidated {
            debt_repaid,
            payment,
            ..
        }
        | Event::VaultPartiallyLiquidated {
            debt_repaid,
            payment,
            ..
        } => Some(payment.charge(debt_token, *debt_repaid)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{amount, asset, principal, ratio, Harness};
    use rust_decimal_macros::dec;

    fn eth() -> AssetCode {
        asset("ETH")
    }

    #[test]
    fn test_full_liquidation_takes_everything_at_seven() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let risky = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        // Keeps TCR well above the recovery threshold
        h.open_with_debt("bob", &eth(), dec!(100), dec!(100));
        h.set_price(&eth(), dec!(7));
        assert_eq!(h.state.mode(), Mode::Normal);

        let keeper = principal("keeper");
        let event = plan_liquidate_vault(&h.state, &keeper, risky, None, h.now).unwrap();
        match &event {
            Event::VaultLiquidated {
                debt_repaid,
                collateral_seized,
                surplus,
                payouts,
                ..
            } => {
                assert_eq!(*debt_repaid, amount(dec!(70)));
                assert_eq!(*collateral_seized, amount(dec!(10)));
                assert_eq!(*surplus, Amount::ZERO);
                assert_eq!(payouts.len(), 1);
                assert_eq!(payouts[0].kind, PayoutKind::Transfer { to: keeper.clone() });
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            liquidator_charge(&event, &h.state.config().debt_token),
            Some((asset("BLUSD"), amount(dec!(70))))
        );

        h.commit(event);
        assert!(h.state.vault(risky).is_none());
        assert!(h.state.vaults_by_owner(&principal("alice")).is_empty());
    }

    #[test]
    fn test_full_liquidation_returns_surplus() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let id = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        h.open_with_debt("bob", &eth(), dec!(100), dec!(100));
        // ratio 91 / 70 = 1.3 < 1.33
        h.set_price(&eth(), dec!(9.1));

        let event = plan_liquidate_vault(&h.state, &principal("keeper"), id, None, h.now).unwrap();
        match &event {
            Event::VaultLiquidated {
                collateral_seized,
                surplus,
                payouts,
                ..
            } => {
                // 77 / 9.1
                assert_eq!(*collateral_seized, amount(dec!(8.46153846)));
                assert_eq!(*surplus, amount(dec!(1.53846154)));
                assert_eq!(*collateral_seized + *surplus, amount(dec!(10)));
                // Seized value never exceeds debt × (1 + bonus)
                assert!(collateral_seized.value() * dec!(9.1) <= dec!(77));
                assert_eq!(payouts[1].kind, PayoutKind::Transfer { to: principal("alice") });
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_healthy_vault_not_liquidatable() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let id = h.open_with_debt("alice", &eth(), dec!(10), dec!(50));

        let result = plan_liquidate_vault(&h.state, &principal("keeper"), id, None, h.now);
        assert!(matches!(result, Err(ProtocolError::NotLiquidatable { .. })));
        assert!(liquidatable_vaults(&h.state).is_empty());
    }

    #[test]
    fn test_partial_liquidation_bounds() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let id = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        h.open_with_debt("bob", &eth(), dec!(100), dec!(100));
        h.set_price(&eth(), dec!(9));

        let keeper = principal("keeper");
        let over = plan_partial_liquidation(&h.state, &keeper, id, amount(dec!(35.01)), None, h.now);
        assert!(matches!(over, Err(ProtocolError::PartialExceedsFraction { .. })));

        let event =
            plan_partial_liquidation(&h.state, &keeper, id, amount(dec!(30)), None, h.now).unwrap();
        h.commit(event);

        let vault = h.state.vault(id).unwrap();
        assert_eq!(vault.debt, amount(dec!(40)));
        // 30 × 1.1 / 9 = 3.66666666
        assert_eq!(vault.collateral, amount(dec!(6.33333334)));
    }

    #[test]
    fn test_partial_rejects_exhausting_collateral() {
        let mut config = crate::config::ProtocolConfig::default();
        config.partial_liquidation_fraction = ratio(dec!(1));
        let mut h = Harness::with_config(config);
        h.configure(&eth(), dec!(10));
        let id = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        h.open_with_debt("bob", &eth(), dec!(100), dec!(100));
        h.set_price(&eth(), dec!(7));

        let result =
            plan_partial_liquidation(&h.state, &principal("keeper"), id, amount(dec!(70)), None, h.now);
        assert!(matches!(result, Err(ProtocolError::WouldExhaustCollateral { .. })));
    }

    #[test]
    fn test_targeted_liquidation_restores_target() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        // 100 / 70 = 1.43: between 1.33 and 1.5, and drags TCR into Recovery
        let id = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        assert_eq!(h.state.mode(), Mode::Recovery);

        let repay = targeted_repay_amount(&h.state, id, h.now).unwrap().unwrap();
        // (1.55 × 70 − 100) / 0.45
        assert_eq!(repay, amount(dec!(18.88888889)));

        let event = plan_liquidate_vault(&h.state, &principal("keeper"), id, None, h.now).unwrap();
        assert!(matches!(
            event,
            Event::VaultPartiallyLiquidated { targeted: true, .. }
        ));
        h.commit(event);

        let vault = h.state.vault(id).unwrap();
        let after = h.state.collateral_ratio(vault).unwrap().value();
        assert!((after - dec!(1.55)).abs() < dec!(0.0001), "ratio {}", after);
    }

    #[test]
    fn test_below_liquidation_ratio_in_recovery_is_full() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let id = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        h.set_price(&eth(), dec!(9));
        // 90 / 70 = 1.29 < 1.33; TCR 1.29 keeps Recovery
        assert_eq!(h.state.mode(), Mode::Recovery);
        assert_eq!(targeted_repay_amount(&h.state, id, h.now).unwrap(), None);

        let event = plan_liquidate_vault(&h.state, &principal("keeper"), id, None, h.now).unwrap();
        assert!(matches!(event, Event::VaultLiquidated { .. }));
    }

    #[test]
    fn test_liquidatable_list_sorted_and_mode_aware() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let a = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        let b = h.open_with_debt("bob", &eth(), dec!(10), dec!(68));
        h.open_with_debt("carol", &eth(), dec!(1000), dec!(100));
        assert_eq!(h.state.mode(), Mode::Normal);
        // Both above 1.33 in Normal
        assert!(liquidatable_vaults(&h.state).is_empty());

        h.set_price(&eth(), dec!(9));
        let list: Vec<_> = liquidatable_vaults(&h.state).iter().map(|c| c.vault_id).collect();
        assert_eq!(list, vec![a, b]);
    }

    #[test]
    fn test_stable_payment_charges_unit() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let usdc = asset("USDC");
        h.stable(&usdc, dec!(1));
        let id = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        h.open_with_debt("bob", &eth(), dec!(100), dec!(100));
        h.set_price(&eth(), dec!(7));

        let event =
            plan_liquidate_vault(&h.state, &principal("keeper"), id, Some(&usdc), h.now).unwrap();
        let (unit, charge) = liquidator_charge(&event, &h.state.config().debt_token).unwrap();
        assert_eq!(unit, usdc);
        // 70 / 0.995
        assert_eq!(charge, amount(dec!(70.35175880)));
        h.commit(event);

        assert_eq!(h.state.stable_unit(&usdc).unwrap().reserve, amount(dec!(70)));
        assert_eq!(h.state.unbacked_supply(), amount(dec!(70)));
    }

    #[test]
    fn test_read_only_rejects() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let id = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        h.set_price(&eth(), dec!(5));
        assert_eq!(h.state.mode(), Mode::ReadOnly);

        let result = plan_liquidate_vault(&h.state, &principal("keeper"), id, None, h.now);
        assert!(matches!(result, Err(ProtocolError::ReadOnlyMode)));
    }
}
