//! Per-asset configuration and stable units

use ballast_core::{AssetCode, Price, Ratio};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::rates::{RateCurve, ThresholdLevels};
use crate::state::Mode;

/// Admin-set parameters of a collateral asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetParams {
    /// Below this ratio a vault is liquidatable in Normal mode
    pub liquidation_ratio: Ratio,
    /// Borrow and withdraw must keep the ratio at or above this
    pub borrow_threshold: Ratio,
    /// Extra collateral a liquidator receives, as a share of the debt repaid
    pub liquidation_bonus: Ratio,
    /// Annual interest rate before curve multipliers
    pub base_rate: Ratio,
    /// Ratio a targeted Recovery liquidation restores
    pub recovery_target_ratio: Ratio,
    pub decimals: u8,
    /// Prices below this force ReadOnly
    pub price_floor: Decimal,
}

impl AssetParams {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.liquidation_ratio <= Ratio::ONE {
            return Err(ProtocolError::InvalidParameters(
                "liquidation ratio must exceed 1".to_string(),
            ));
        }
        if self.liquidation_ratio >= self.borrow_threshold {
            return Err(ProtocolError::InvalidParameters(format!(
                "liquidation ratio {} must be below borrow threshold {}",
                self.liquidation_ratio, self.borrow_threshold
            )));
        }
        if self.recovery_target_ratio <= self.borrow_threshold {
            return Err(ProtocolError::InvalidParameters(format!(
                "recovery target {} must exceed borrow threshold {}",
                self.recovery_target_ratio, self.borrow_threshold
            )));
        }
        if self.recovery_target_ratio <= Ratio::ONE + self.liquidation_bonus {
            return Err(ProtocolError::InvalidParameters(
                "recovery target must exceed 1 + liquidation bonus".to_string(),
            ));
        }
        if self.price_floor < Decimal::ZERO {
            return Err(ProtocolError::InvalidParameters(
                "price floor cannot be negative".to_string(),
            ));
        }
        if self.decimals > 18 {
            return Err(ProtocolError::InvalidParameters(
                "at most 18 decimals".to_string(),
            ));
        }
        Ok(())
    }
}

/// A collateral type and everything the protocol knows about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub asset: AssetCode,
    pub params: AssetParams,
    /// Replaces the global curve for this asset when set
    pub rate_curve: Option<RateCurve>,
    pub healthy_ratio_override: Option<Ratio>,
    /// Flat rate used during Recovery instead of the curves
    pub recovery_rate_override: Option<Ratio>,
    pub enabled: bool,
    pub last_price: Option<Price>,
    pub last_price_at: Option<DateTime<Utc>>,
}

impl AssetConfig {
    pub fn new(asset: AssetCode, params: AssetParams) -> Self {
        Self {
            asset,
            params,
            rate_curve: None,
            healthy_ratio_override: None,
            recovery_rate_override: None,
            enabled: true,
            last_price: None,
            last_price_at: None,
        }
    }

    /// `2 × recovery_target − borrow_threshold`
    pub fn warning_ratio(&self) -> Ratio {
        let target = self.params.recovery_target_ratio;
        (target + target) - self.params.borrow_threshold
    }

    /// Admin override, or `1.5 × borrow_threshold`
    pub fn healthy_ratio(&self) -> Ratio {
        self.healthy_ratio_override.unwrap_or_else(|| {
            Ratio::new_unchecked(self.params.borrow_threshold.value() * Decimal::new(15, 1))
        })
    }

    pub fn levels(&self) -> ThresholdLevels {
        ThresholdLevels {
            liquidation: self.params.liquidation_ratio,
            borrow: self.params.borrow_threshold,
            warning: self.warning_ratio(),
            healthy: self.healthy_ratio(),
        }
    }

    /// Liquidation ratio in Normal, borrow threshold in Recovery
    pub fn liquidation_threshold(&self, mode: Mode) -> Ratio {
        match mode {
            Mode::Recovery => self.params.borrow_threshold,
            Mode::Normal | Mode::ReadOnly => self.params.liquidation_ratio,
        }
    }

    pub fn below_price_floor(&self) -> bool {
        self.last_price
            .map(|p| p.value() < self.params.price_floor)
            .unwrap_or(false)
    }

    /// `1 + liquidation_bonus`
    pub fn bonus_multiplier(&self) -> Ratio {
        Ratio::ONE + self.params.liquidation_bonus
    }
}

/// An alternate stable unit accepted for repayment and held as reserve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableUnit {
    pub unit: AssetCode,
    pub enabled: bool,
    pub reserve: ballast_core::Amount,
    pub last_price: Option<Price>,
    pub last_price_at: Option<DateTime<Utc>>,
}

impl StableUnit {
    pub fn new(unit: AssetCode) -> Self {
        Self {
            unit,
            enabled: true,
            reserve: ballast_core::Amount::ZERO,
            last_price: None,
            last_price_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> AssetParams {
        AssetParams {
            liquidation_ratio: Ratio::new(dec!(1.33)).unwrap(),
            borrow_threshold: Ratio::new(dec!(1.5)).unwrap(),
            liquidation_bonus: Ratio::new(dec!(0.1)).unwrap(),
            base_rate: Ratio::new(dec!(0.02)).unwrap(),
            recovery_target_ratio: Ratio::new(dec!(1.55)).unwrap(),
            decimals: 8,
            price_floor: dec!(0.01),
        }
    }

    #[test]
    fn test_derived_thresholds() {
        let config = AssetConfig::new("ETH".parse().unwrap(), params());
        assert_eq!(config.warning_ratio().value(), dec!(1.60));
        assert_eq!(config.healthy_ratio().value(), dec!(2.25));
        assert_eq!(config.liquidation_threshold(Mode::Normal).value(), dec!(1.33));
        assert_eq!(config.liquidation_threshold(Mode::Recovery).value(), dec!(1.5));
    }

    #[test]
    fn test_healthy_override() {
        let mut config = AssetConfig::new("ETH".parse().unwrap(), params());
        config.healthy_ratio_override = Some(Ratio::new(dec!(3)).unwrap());
        assert_eq!(config.levels().healthy.value(), dec!(3));
    }

    #[test]
    fn test_params_validation() {
        assert!(params().validate().is_ok());

        let inverted = AssetParams {
            liquidation_ratio: Ratio::new(dec!(1.6)).unwrap(),
            ..params()
        };
        assert!(inverted.validate().is_err());

        let low_target = AssetParams {
            recovery_target_ratio: Ratio::new(dec!(1.4)).unwrap(),
            ..params()
        };
        assert!(low_target.validate().is_err());
    }
}
