//! Redemption engine
//!
//! Debt tokens are exchanged for value at par in two tiers. The stable-unit
//! reserve pays first at a flat fee. Whatever is left is taken from the
//! vaults of one collateral asset by water-filling: the lowest-ratio band is
//! raised to the next vault's ratio, proportionally to debt, then merged
//! with it, until the amount is used up.

use ballast_core::{Amount, AssetCode, Principal, Ratio, AMOUNT_SCALE};
use ballast_transfer::FeeKind;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::error::ProtocolError;
use crate::event::{Event, RedemptionLeg, VaultFill};
use crate::payout::{PayoutAllocator, PayoutKind, PendingPayout};
use crate::state::{ProtocolState, RedemptionFeeState};
use crate::vault::Vault;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemRequest {
    pub redeemer: Principal,
    /// Debt tokens to burn
    pub amount: Amount,
    /// Reserve unit to draw first
    pub preferred_unit: Option<AssetCode>,
    /// Collateral to receive for any part the reserve cannot cover
    pub collateral_asset: Option<AssetCode>,
}

fn floor8(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
}

/// Vault-tier fee rate for redeeming `gross`:
/// `base × decay^hours + gross / total_debt × factor`, clamped to
/// `[floor, ceiling]`
pub fn redemption_fee_rate(state: &ProtocolState, gross: Amount, now: DateTime<Utc>) -> Ratio {
    let config = state.config();
    let fee_state = state.redemption_fee_state();

    let hours = fee_state
        .last_redemption_at
        .map(|at| now.signed_duration_since(at).num_hours().max(0) as u64)
        .unwrap_or(0);
    let decayed = fee_state.base_rate * config.redemption_decay.powu(hours);

    let total_debt = state.total_debt();
    let proportion = gross.ratio_to(total_debt).unwrap_or(Ratio::ONE);

    (decayed + proportion * config.redeemed_proportion_factor)
        .clamp_between(config.redemption_fee_floor, config.redemption_fee_ceiling)
}

fn reserve_order(state: &ProtocolState, preferred: Option<&AssetCode>) -> Vec<AssetCode> {
    let mut units: Vec<AssetCode> = preferred.into_iter().cloned().collect();
    units.extend(
        state
            .stable_units()
            .map(|s| s.unit.clone())
            .filter(|u| Some(u) != preferred),
    );
    units
}

/// One vault as the water-filling sees it
struct Slot<'a> {
    vault: &'a Vault,
    debt: Decimal,
    value: Decimal,
    reduced: Decimal,
}

impl Slot<'_> {
    fn ratio(&self) -> Decimal {
        self.value / self.debt
    }

    fn take(&mut self, amount: Decimal) {
        self.debt -= amount;
        self.value -= amount;
        self.reduced += amount;
    }
}

/// Split `amount` over `band` in proportion to debt. Shares round down; the
/// leftover goes to the first vaults that still have debt.
fn distribute(band: &mut [Slot<'_>], amount: Decimal) {
    let total: Decimal = band.iter().map(|s| s.debt).sum();
    if total.is_zero() {
        return;
    }
    let mut handed = Decimal::ZERO;
    for slot in band.iter_mut() {
        let share = floor8(amount * slot.debt / total).min(slot.debt);
        slot.take(share);
        handed += share;
    }
    let mut rest = amount - handed;
    for slot in band.iter_mut() {
        if rest <= Decimal::ZERO {
            break;
        }
        let extra = rest.min(slot.debt);
        slot.take(extra);
        rest -= extra;
    }
}

/// Water-fill `net` debt over `slots`, which must be sorted by ratio
fn water_fill(slots: &mut [Slot<'_>], net: Decimal) {
    let mut remaining = net;
    let mut end = 1;
    while remaining > Decimal::ZERO && end <= slots.len() {
        let Some(next) = slots.get(end).map(Slot::ratio) else {
            distribute(&mut slots[..end], remaining);
            return;
        };

        let debt: Decimal = slots[..end].iter().map(|s| s.debt).sum();
        let value: Decimal = slots[..end].iter().map(|s| s.value).sum();
        if debt.is_zero() || next <= value / debt {
            end += 1;
            continue;
        }

        // Redeeming x at par moves the band ratio to (value − x) / (debt − x)
        let needed = floor8((next * debt - value) / (next - Decimal::ONE));
        if needed >= remaining {
            distribute(&mut slots[..end], remaining);
            return;
        }
        distribute(&mut slots[..end], needed);
        remaining -= needed;
        end += 1;
    }
}

fn plan_vault_leg(
    state: &ProtocolState,
    asset: &AssetCode,
    gross: Amount,
    now: DateTime<Utc>,
    payouts: &mut PayoutAllocator,
    redeemer: &Principal,
) -> Result<(RedemptionLeg, Ratio), ProtocolError> {
    let price = state.fresh_price(asset, now)?;
    let fee_rate = redemption_fee_rate(state, gross, now);
    let fee = gross.mul_ratio(fee_rate);
    let net = gross.saturating_sub(&fee);

    let mut slots: Vec<Slot<'_>> = state
        .vaults()
        .filter(|v| v.asset == *asset && !v.debt.is_zero())
        .map(|vault| Slot {
            vault,
            debt: vault.debt.value(),
            value: vault.collateral.value() * price.value(),
            reduced: Decimal::ZERO,
        })
        .filter(|s| s.ratio() >= Decimal::ONE)
        .collect();
    slots.sort_by(|a, b| a.ratio().cmp(&b.ratio()).then(a.vault.id.cmp(&b.vault.id)));

    let eligible: Decimal = slots.iter().map(|s| s.debt).sum();
    if net.value() > eligible {
        return Err(ProtocolError::InsufficientRedeemable {
            requested: net,
            available: Amount::new_unchecked(eligible),
        });
    }

    water_fill(&mut slots, net.value());

    let fills: Vec<VaultFill> = slots
        .iter()
        .filter(|s| s.reduced > Decimal::ZERO)
        .map(|s| {
            let debt_reduced = Amount::new_unchecked(s.reduced);
            VaultFill {
                vault_id: s.vault.id,
                owner: s.vault.owner.clone(),
                created_at: s.vault.created_at,
                last_accrual: s.vault.last_accrual,
                debt_reduced,
                collateral_taken: debt_reduced.units_at(price).min(s.vault.collateral),
            }
        })
        .collect();
    let paid: Amount = fills.iter().map(|f| f.collateral_taken).sum();

    debug!(
        asset = %asset,
        %gross,
        %fee_rate,
        vaults = fills.len(),
        "vault redemption planned"
    );

    let payout = payouts.payout(
        asset,
        paid,
        PayoutKind::Transfer {
            to: redeemer.clone(),
        },
    );
    let fee_payout = payouts.fee(&state.config().debt_token, fee, FeeKind::Redemption);
    let leg = RedemptionLeg::Vaults {
        asset: asset.clone(),
        price,
        fee_rate,
        gross,
        fee,
        paid,
        fills,
        payout_id: payout.id,
        fee_payout_id: fee_payout.map(|p| p.id),
    };
    Ok((leg, fee_rate))
}

pub fn plan_redeem(
    state: &ProtocolState,
    request: &RedeemRequest,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    state.ensure_writable()?;
    if request.amount.is_zero() {
        return Err(ProtocolError::ZeroAmount);
    }
    let minimum = state.config().min_redemption;
    if request.amount < minimum {
        return Err(ProtocolError::AmountTooSmall {
            amount: request.amount,
            minimum,
        });
    }

    let mut payouts = PayoutAllocator::new(state.next_payout_id, now);
    let mut legs = Vec::new();
    let mut remaining = request.amount;
    let mut unbacked = state.unbacked_supply();
    let reserve_fee = state.config().reserve_redemption_fee;

    // Tier 1: reserves
    for unit in reserve_order(state, request.preferred_unit.as_ref()) {
        if remaining.is_zero() {
            break;
        }
        let Some(stable) = state.stable_unit(&unit) else {
            continue;
        };
        if stable.reserve.is_zero() {
            continue;
        }
        if let Err(e) = state.parity_price(&unit, now) {
            debug!(unit = %unit, error = %e, "reserve skipped");
            continue;
        }

        let gross = remaining.min(stable.reserve);
        let fee = gross.mul_ratio(reserve_fee);
        let paid = gross.saturating_sub(&fee);
        let gap_closed = unbacked.min(gross);
        unbacked = unbacked.saturating_sub(&gap_closed);

        let payout = payouts.payout(
            &unit,
            paid,
            PayoutKind::Transfer {
                to: request.redeemer.clone(),
            },
        );
        let fee_payout = payouts.fee(&unit, fee, FeeKind::ReserveRedemption);
        legs.push(RedemptionLeg::Reserve {
            unit: unit.clone(),
            gross,
            fee,
            paid,
            gap_closed,
            payout_id: payout.id,
            fee_payout_id: fee_payout.map(|p| p.id),
        });
        remaining = remaining.saturating_sub(&gross);
    }

    // Tier 2: vaults
    let fee_state_before = state.redemption_fee_state();
    let mut fee_state_after = fee_state_before;
    if !remaining.is_zero() {
        let Some(asset) = request.collateral_asset.as_ref() else {
            return Err(ProtocolError::InsufficientRedeemable {
                requested: request.amount,
                available: request.amount.saturating_sub(&remaining),
            });
        };
        state.asset_config(asset)?;
        let (leg, fee_rate) =
            plan_vault_leg(state, asset, remaining, now, &mut payouts, &request.redeemer)?;
        legs.push(leg);
        fee_state_after = RedemptionFeeState {
            base_rate: fee_rate,
            last_redemption_at: Some(now),
        };
    }

    Ok(Event::Redeemed {
        redeemer: request.redeemer.clone(),
        requested: request.amount,
        legs,
        fee_state_before,
        fee_state_after,
        payouts: payouts.into_issued(),
        redeemed_at: now,
    })
}

/// Undo the legs of a committed redemption from `first_unpaid` on
///
/// The fee state goes back only if nothing has redeemed since.
pub fn plan_redemption_revert(
    state: &ProtocolState,
    redemption_sequence: u64,
    redeemed: &Event,
    first_unpaid: usize,
) -> Result<Event, ProtocolError> {
    let Event::Redeemed {
        redeemer,
        legs,
        fee_state_before,
        fee_state_after,
        ..
    } = redeemed
    else {
        return Err(ProtocolError::InvariantViolation(format!(
            "cannot revert {} as a redemption",
            redeemed.name()
        )));
    };

    let unpaid: Vec<RedemptionLeg> = legs.iter().skip(first_unpaid).cloned().collect();
    let reverts_vaults = unpaid
        .iter()
        .any(|leg| matches!(leg, RedemptionLeg::Vaults { .. }));
    let restore_fee_state = (reverts_vaults && state.redemption_fee_state() == *fee_state_after)
        .then_some(*fee_state_before);

    let cancelled_payouts = unpaid
        .iter()
        .flat_map(RedemptionLeg::payout_ids)
        .filter(|id| state.pending_payout(*id).is_some())
        .collect();

    Ok(Event::RedemptionReverted {
        redeemer: redeemer.clone(),
        redemption_sequence,
        remint: unpaid.iter().map(RedemptionLeg::gross).sum(),
        legs: unpaid,
        cancelled_payouts,
        restore_fee_state,
    })
}

/// Payouts of one leg, looked up in the event that scheduled them
pub fn leg_payouts<'a>(redeemed: &'a Event, leg: &RedemptionLeg) -> Vec<&'a PendingPayout> {
    let ids = leg.payout_ids();
    redeemed
        .scheduled_payouts()
        .into_iter()
        .filter(|p| ids.contains(&p.id))
        .collect()
}
