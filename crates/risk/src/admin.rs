//! Operator operations and price ingest
//!
//! Admin changes are allowed in every mode, ReadOnly included, so the
//! operator can repair parameters while users are locked out.

use ballast_core::{AssetCode, Principal, Ratio};
use ballast_oracle::PriceReading;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::collateral::AssetParams;
use crate::error::ProtocolError;
use crate::event::Event;
use crate::rates::{RateCurve, ThresholdCurve};
use crate::state::ProtocolState;

fn ensure_unclaimed_code(state: &ProtocolState, code: &AssetCode) -> Result<(), ProtocolError> {
    if *code == state.config().debt_token {
        return Err(ProtocolError::InvalidParameters(format!(
            "{} is the debt token",
            code
        )));
    }
    Ok(())
}

pub fn plan_configure_asset(
    state: &ProtocolState,
    caller: &Principal,
    asset: &AssetCode,
    params: &AssetParams,
) -> Result<Event, ProtocolError> {
    state.require_operator(caller)?;
    ensure_unclaimed_code(state, asset)?;
    if state.stable_unit(asset).is_some() {
        return Err(ProtocolError::InvalidParameters(format!(
            "{} is a stable unit",
            asset
        )));
    }

    let mut params = params.clone();
    if params.price_floor.is_zero() {
        params.price_floor = state.config().default_price_floor;
    }
    params.validate()?;

    Ok(Event::AssetConfigured {
        asset: asset.clone(),
        params,
    })
}

pub fn plan_enable_asset(
    state: &ProtocolState,
    caller: &Principal,
    asset: &AssetCode,
    enabled: bool,
) -> Result<Event, ProtocolError> {
    state.require_operator(caller)?;
    state.asset_config(asset)?;
    Ok(Event::AssetEnabled {
        asset: asset.clone(),
        enabled,
    })
}

pub fn plan_set_global_curve(
    state: &ProtocolState,
    caller: &Principal,
    curve: ThresholdCurve,
) -> Result<Event, ProtocolError> {
    state.require_operator(caller)?;
    Ok(Event::GlobalRateCurveSet { curve })
}

/// Set or clear an asset's own Layer 1 curve
pub fn plan_set_asset_curve(
    state: &ProtocolState,
    caller: &Principal,
    asset: &AssetCode,
    curve: Option<RateCurve>,
) -> Result<Event, ProtocolError> {
    state.require_operator(caller)?;
    state.asset_config(asset)?;
    Ok(Event::AssetRateCurveSet {
        asset: asset.clone(),
        curve,
    })
}

pub fn plan_set_recovery_curve(
    state: &ProtocolState,
    caller: &Principal,
    curve: ThresholdCurve,
) -> Result<Event, ProtocolError> {
    state.require_operator(caller)?;
    Ok(Event::RecoveryRateCurveSet { curve })
}

pub fn plan_set_healthy_override(
    state: &ProtocolState,
    caller: &Principal,
    asset: &AssetCode,
    ratio: Option<Ratio>,
) -> Result<Event, ProtocolError> {
    state.require_operator(caller)?;
    let config = state.asset_config(asset)?;
    if let Some(ratio) = ratio {
        if ratio <= config.params.borrow_threshold {
            return Err(ProtocolError::InvalidParameters(format!(
                "healthy ratio {} must exceed borrow threshold {}",
                ratio, config.params.borrow_threshold
            )));
        }
    }
    Ok(Event::HealthyRatioOverrideSet {
        asset: asset.clone(),
        ratio,
    })
}

pub fn plan_set_recovery_rate_override(
    state: &ProtocolState,
    caller: &Principal,
    asset: &AssetCode,
    rate: Option<Ratio>,
) -> Result<Event, ProtocolError> {
    state.require_operator(caller)?;
    state.asset_config(asset)?;
    Ok(Event::RecoveryRateOverrideSet {
        asset: asset.clone(),
        rate,
    })
}

pub fn plan_set_stable_fee(
    state: &ProtocolState,
    caller: &Principal,
    fee: Ratio,
) -> Result<Event, ProtocolError> {
    state.require_operator(caller)?;
    if fee >= Ratio::ONE {
        return Err(ProtocolError::InvalidParameters(format!(
            "stable fee {} must be below 1",
            fee
        )));
    }
    Ok(Event::StableFeeSet { fee })
}

pub fn plan_configure_stable_unit(
    state: &ProtocolState,
    caller: &Principal,
    unit: &AssetCode,
    enabled: bool,
) -> Result<Event, ProtocolError> {
    state.require_operator(caller)?;
    ensure_unclaimed_code(state, unit)?;
    if state.asset(unit).is_some() {
        return Err(ProtocolError::InvalidParameters(format!(
            "{} is a collateral asset",
            unit
        )));
    }
    Ok(Event::StableUnitConfigured {
        unit: unit.clone(),
        enabled,
    })
}

/// Ingest an oracle reading for a collateral asset or stable unit
///
/// Readings older than the stored one, or already stale, are refused.
pub fn plan_price_update(
    state: &ProtocolState,
    reading: &PriceReading,
    now: DateTime<Utc>,
) -> Result<Event, ProtocolError> {
    let stored_at = if let Some(config) = state.asset(&reading.asset) {
        config.last_price_at
    } else if let Some(stable) = state.stable_unit(&reading.asset) {
        stable.last_price_at
    } else {
        return Err(ProtocolError::AssetNotConfigured(reading.asset.clone()));
    };

    if stored_at.is_some_and(|at| reading.observed_at < at) {
        return Err(ProtocolError::OutdatedReading {
            asset: reading.asset.clone(),
            observed_at: reading.observed_at,
        });
    }
    reading.ensure_fresh(now, state.config().price_staleness_secs)?;

    Ok(Event::PriceUpdated {
        asset: reading.asset.clone(),
        price: reading.price,
        observed_at: reading.observed_at,
    })
}

/// Whether a reading would push its asset under the sanity floor
pub fn below_floor(state: &ProtocolState, reading: &PriceReading) -> bool {
    state
        .asset(&reading.asset)
        .map(|c| reading.price.value() < c.params.price_floor)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Mode;
    use crate::testing::{asset, params, principal, ratio, Harness};
    use ballast_core::Price;
    use rust_decimal_macros::dec;

    fn eth() -> AssetCode {
        asset("ETH")
    }

    #[test]
    fn test_only_operator() {
        let h = Harness::new();
        let result = plan_configure_asset(&h.state, &principal("mallory"), &eth(), &params());
        assert!(matches!(result, Err(ProtocolError::Unauthorized(_))));

        let result = plan_set_stable_fee(&h.state, &principal("mallory"), ratio(dec!(0.01)));
        assert!(matches!(result, Err(ProtocolError::Unauthorized(_))));
    }

    #[test]
    fn test_configure_validates_and_fills_floor() {
        let h = Harness::new();
        let mut bad = params();
        bad.liquidation_ratio = ratio(dec!(1.6));
        let result = plan_configure_asset(&h.state, &h.operator(), &eth(), &bad);
        assert!(matches!(result, Err(ProtocolError::InvalidParameters(_))));

        let mut no_floor = params();
        no_floor.price_floor = Decimal::ZERO;
        let event = plan_configure_asset(&h.state, &h.operator(), &eth(), &no_floor).unwrap();
        assert!(matches!(
            event,
            Event::AssetConfigured { params, .. } if params.price_floor == dec!(0.01)
        ));
    }

    #[test]
    fn test_codes_cannot_collide() {
        let mut h = Harness::new();
        let blusd = asset("BLUSD");
        assert!(plan_configure_asset(&h.state, &h.operator(), &blusd, &params()).is_err());

        h.configure(&eth(), dec!(10));
        let result = plan_configure_stable_unit(&h.state, &h.operator(), &eth(), true);
        assert!(matches!(result, Err(ProtocolError::InvalidParameters(_))));
    }

    #[test]
    fn test_disable_asset_through_event() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let event = plan_enable_asset(&h.state, &h.operator(), &eth(), false).unwrap();
        h.commit(event);
        assert!(!h.state.asset(&eth()).unwrap().enabled);

        let missing = plan_enable_asset(&h.state, &h.operator(), &asset("SOL"), false);
        assert!(matches!(missing, Err(ProtocolError::AssetNotConfigured(_))));
    }

    #[test]
    fn test_healthy_override_must_exceed_borrow() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let result =
            plan_set_healthy_override(&h.state, &h.operator(), &eth(), Some(ratio(dec!(1.4))));
        assert!(result.is_err());

        let event =
            plan_set_healthy_override(&h.state, &h.operator(), &eth(), Some(ratio(dec!(3)))).unwrap();
        h.commit(event);
        assert_eq!(h.state.asset(&eth()).unwrap().healthy_ratio(), ratio(dec!(3)));
    }

    #[test]
    fn test_price_update_rules() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));

        let unknown = PriceReading::new(asset("SOL"), Price::new(dec!(1)).unwrap(), h.now);
        assert!(matches!(
            plan_price_update(&h.state, &unknown, h.now),
            Err(ProtocolError::AssetNotConfigured(_))
        ));

        let older = PriceReading::new(
            eth(),
            Price::new(dec!(11)).unwrap(),
            h.now - chrono::Duration::seconds(5),
        );
        assert!(matches!(
            plan_price_update(&h.state, &older, h.now),
            Err(ProtocolError::OutdatedReading { .. })
        ));

        h.advance(chrono::Duration::seconds(1000));
        let stale = PriceReading::new(
            eth(),
            Price::new(dec!(11)).unwrap(),
            h.now - chrono::Duration::seconds(700),
        );
        assert!(matches!(
            plan_price_update(&h.state, &stale, h.now),
            Err(ProtocolError::Oracle(_))
        ));

        let fresh = PriceReading::new(eth(), Price::new(dec!(11)).unwrap(), h.now);
        let event = plan_price_update(&h.state, &fresh, h.now).unwrap();
        h.commit(event);
        assert_eq!(h.state.asset(&eth()).unwrap().last_price, Some(fresh.price));
    }

    #[test]
    fn test_floor_breach_forces_read_only_and_admin_still_works() {
        let mut h = Harness::new();
        h.configure(&eth(), dec!(10));
        let crash = PriceReading::new(eth(), Price::new(dec!(0.001)).unwrap(), h.now);
        assert!(below_floor(&h.state, &crash));
        let event = plan_price_update(&h.state, &crash, h.now).unwrap();
        h.commit(event);
        assert_eq!(h.state.mode(), Mode::ReadOnly);

        let event = plan_set_stable_fee(&h.state, &h.operator(), ratio(dec!(0.01))).unwrap();
        h.commit(event);
        assert_eq!(h.state.stable_fee(), ratio(dec!(0.01)));

        h.set_price(&eth(), dec!(10));
        assert_eq!(h.state.mode(), Mode::Normal);
    }
}
