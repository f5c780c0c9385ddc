//! Dynamic interest
//!
//! A vault's annual rate is `base_rate × layer1 × layer2`. Layer 1 comes
//! from the asset's own curve or the global threshold curve resolved to the
//! asset's levels, evaluated at the vault's ratio. Layer 2 applies only in
//! Recovery: the recovery curve resolved to the debt-weighted averages,
//! evaluated at TCR. A per-asset override replaces all of it in Recovery.

use ballast_core::{Amount, Ratio, VaultId};
use ballast_transfer::FeeKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::ProtocolError;
use crate::event::{Event, InterestEntry};
use crate::payout::PayoutAllocator;
use crate::state::{Mode, ProtocolState};
use crate::vault::Vault;

pub const SECONDS_PER_YEAR: i64 = 31_536_000;

/// How a vault's rate was made up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateBreakdown {
    pub vault_id: VaultId,
    pub base_rate: Ratio,
    pub layer1: Ratio,
    pub layer2: Ratio,
    /// Recovery override in force
    pub overridden: bool,
    pub rate: Ratio,
}

pub fn rate_breakdown(state: &ProtocolState, vault: &Vault) -> Result<RateBreakdown, ProtocolError> {
    let config = state.asset_config(&vault.asset)?;
    let base_rate = config.params.base_rate;

    if state.mode() == Mode::Recovery {
        if let Some(rate) = config.recovery_rate_override {
            return Ok(RateBreakdown {
                vault_id: vault.id,
                base_rate,
                layer1: Ratio::ONE,
                layer2: Ratio::ONE,
                overridden: true,
                rate,
            });
        }
    }

    let curve = config
        .rate_curve
        .clone()
        .unwrap_or_else(|| state.global_curve().resolve(&config.levels()));
    let ratio = state.collateral_ratio(vault).unwrap_or(Ratio::INFINITE);
    let layer1 = curve.multiplier_at(ratio);

    let layer2 = match state.mode() {
        Mode::Recovery => state
            .recovery_curve()
            .resolve(&state.averages().levels())
            .multiplier_at(state.tcr()),
        Mode::Normal | Mode::ReadOnly => Ratio::ONE,
    };

    Ok(RateBreakdown {
        vault_id: vault.id,
        base_rate,
        layer1,
        layer2,
        overridden: false,
        rate: base_rate * layer1 * layer2,
    })
}

/// Current annual rate of a vault
pub fn vault_rate(state: &ProtocolState, vault_id: VaultId) -> Result<Ratio, ProtocolError> {
    let vault = state.existing_vault(vault_id)?;
    Ok(rate_breakdown(state, vault)?.rate)
}

/// Simple interest on every indebted vault since its last accrual.
/// Returns None when nothing has accrued.
pub fn plan_accrue_interest(
    state: &ProtocolState,
    now: DateTime<Utc>,
) -> Result<Option<Event>, ProtocolError> {
    state.ensure_writable()?;

    let mut entries = Vec::new();
    for vault in state.vaults().filter(|v| !v.debt.is_zero()) {
        let elapsed = now.signed_duration_since(vault.last_accrual).num_seconds();
        if elapsed <= 0 {
            continue;
        }
        let rate = rate_breakdown(state, vault)?.rate;
        let interest = Amount::new_unchecked(
            vault.debt.value() * rate.value() * rust_decimal::Decimal::from(elapsed)
                / rust_decimal::Decimal::from(SECONDS_PER_YEAR),
        )
        .round_down();
        if interest.is_zero() {
            continue;
        }
        entries.push(InterestEntry {
            vault_id: vault.id,
            rate,
            interest,
        });
    }

    if entries.is_empty() {
        return Ok(None);
    }

    let total: Amount = entries.iter().map(|e| e.interest).sum();
    debug!(vaults = entries.len(), %total, "interest accrued");

    let mut payouts = PayoutAllocator::new(state.next_payout_id, now);
    Ok(Some(Event::InterestAccrued {
        accrued_at: now,
        fee_credit: payouts.fee(&state.config().debt_token, total, FeeKind::Interest),
        entries,
        total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{amount, asset, ratio, Harness};
    use ballast_core::AssetCode;
    use rust_decimal_macros::dec;

    fn eth() -> AssetCode {
        asset("ETH")
    }

    #[test]
    fn test_layer1_follows_vault_ratio() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let healthy = h.open_with_debt("alice", &eth(), dec!(100), dec!(100));
        let at_borrow = h.open_with_debt("bob", &eth(), dec!(15), dec!(100));
        assert_eq!(h.state.mode(), Mode::Normal);

        assert_eq!(vault_rate(&h.state, healthy).unwrap(), ratio(dec!(0.05)));
        // 2x at the borrow threshold
        assert_eq!(vault_rate(&h.state, at_borrow).unwrap(), ratio(dec!(0.10)));
    }

    #[test]
    fn test_asset_curve_replaces_global() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let id = h.open_with_debt("alice", &eth(), dec!(100), dec!(100));
        let curve = crate::rates::RateCurve::new(
            vec![
                crate::rates::RateMarker::new(ratio(dec!(1)), ratio(dec!(4))),
                crate::rates::RateMarker::new(ratio(dec!(20)), ratio(dec!(2))),
            ],
            crate::rates::Interpolation::Linear,
        )
        .unwrap();
        h.commit(Event::AssetRateCurveSet {
            asset: eth(),
            curve: Some(curve),
        });

        // ratio 10 sits between the markers: 4 − 2 × 9/19
        let breakdown = rate_breakdown(&h.state, h.state.vault(id).unwrap()).unwrap();
        assert!(breakdown.layer1 > ratio(dec!(3)) && breakdown.layer1 < ratio(dec!(3.1)));
        assert_eq!(breakdown.layer2, Ratio::ONE);
    }

    #[test]
    fn test_layer2_in_recovery_and_override() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let id = h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        assert_eq!(h.state.mode(), Mode::Recovery);

        let breakdown = rate_breakdown(&h.state, h.state.vault(id).unwrap()).unwrap();
        assert!(breakdown.layer2 > Ratio::ONE);
        assert_eq!(
            breakdown.rate,
            breakdown.base_rate * breakdown.layer1 * breakdown.layer2
        );

        h.commit(Event::RecoveryRateOverrideSet {
            asset: eth(),
            rate: Some(ratio(dec!(0.02))),
        });
        let breakdown = rate_breakdown(&h.state, h.state.vault(id).unwrap()).unwrap();
        assert!(breakdown.overridden);
        assert_eq!(breakdown.rate, ratio(dec!(0.02)));
    }

    #[test]
    fn test_accrue_one_year() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let id = h.open_with_debt("alice", &eth(), dec!(100), dec!(100));
        h.advance(chrono::Duration::seconds(SECONDS_PER_YEAR));

        let event = plan_accrue_interest(&h.state, h.now).unwrap().unwrap();
        match &event {
            Event::InterestAccrued {
                total, fee_credit, ..
            } => {
                assert_eq!(*total, amount(dec!(5)));
                assert_eq!(fee_credit.as_ref().unwrap().amount, amount(dec!(5)));
            }
            other => panic!("unexpected {:?}", other),
        }
        h.commit(event);

        let vault = h.state.vault(id).unwrap();
        assert_eq!(vault.debt, amount(dec!(105)));
        assert_eq!(vault.last_accrual, h.now);
        assert!(plan_accrue_interest(&h.state, h.now).unwrap().is_none());
    }

    #[test]
    fn test_accrue_rejected_in_read_only() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        h.open_with_debt("alice", &eth(), dec!(10), dec!(70));
        h.set_price(&eth(), dec!(5));
        assert_eq!(h.state.mode(), Mode::ReadOnly);
        h.advance(chrono::Duration::hours(1));

        assert!(matches!(
            plan_accrue_interest(&h.state, h.now),
            Err(ProtocolError::ReadOnlyMode)
        ));
    }
}
