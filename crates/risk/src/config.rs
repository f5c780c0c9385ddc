//! Protocol configuration with configurable thresholds
//!
//! Loaded from a JSON file or defaults, then overridden from the
//! environment. Per-asset parameters are not here: they are admin events.

use ballast_core::{Amount, AssetCode, Principal, Ratio};
use ballast_transfer::RetryPolicy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const ENV_OPERATOR: &str = "BALLAST_OPERATOR";
pub const ENV_PRICE_STALENESS_SECS: &str = "BALLAST_PRICE_STALENESS_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How debt repaid in a stable unit (not the debt token) is accounted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StableRepaymentPolicy {
    /// Leave debt-token supply as is and record the gap as unbacked supply
    #[default]
    TrackGap,

    /// Burn the repaid amount from the protocol's own debt-token holdings
    BurnFromProtocol,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    // === Identity ===
    /// Only this principal may run admin operations
    #[serde(default = "default_operator")]
    pub operator: Principal,

    /// Code of the minted debt token
    #[serde(default = "default_debt_token")]
    pub debt_token: AssetCode,

    // === Oracle & modes ===
    /// Maximum age of a stored price before operations reject
    #[serde(default = "default_price_staleness_secs")]
    pub price_staleness_secs: u64,

    /// Price floor applied to assets configured without one
    #[serde(default = "default_price_floor")]
    pub default_price_floor: Decimal,

    /// TCR below this forces ReadOnly
    #[serde(default = "default_read_only_floor")]
    pub read_only_floor: Ratio,

    /// Recovery entry threshold while there is no debt to weight by
    #[serde(default = "default_recovery_threshold")]
    pub default_recovery_threshold: Ratio,

    // === Vaults ===
    /// Fee on newly borrowed debt in Normal mode
    #[serde(default = "default_borrowing_fee")]
    pub borrowing_fee: Ratio,

    /// Debt at or below this is forgiven on close
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: Amount,

    #[serde(default = "default_min_borrow")]
    pub min_borrow: Amount,

    // === Liquidation ===
    /// Largest share of a vault's debt one partial liquidation may repay
    #[serde(default = "default_partial_fraction")]
    pub partial_liquidation_fraction: Ratio,

    /// Recovery target used for assets configured without one
    #[serde(default = "default_recovery_target")]
    pub default_recovery_target: Ratio,

    // === Stable units ===
    /// Initial stable-repayment surcharge (admin can change it later)
    #[serde(default = "default_stable_surcharge")]
    pub stable_surcharge: Ratio,

    /// Allowed distance of a stable unit's price from 1.0
    #[serde(default = "default_parity_band")]
    pub stable_parity_band: Ratio,

    #[serde(default)]
    pub stable_repayment_policy: StableRepaymentPolicy,

    // === Redemption ===
    /// Flat fee on the reserve tier
    #[serde(default = "default_reserve_fee")]
    pub reserve_redemption_fee: Ratio,

    #[serde(default = "default_redemption_floor")]
    pub redemption_fee_floor: Ratio,

    #[serde(default = "default_redemption_ceiling")]
    pub redemption_fee_ceiling: Ratio,

    /// Hourly decay of the redemption base rate
    #[serde(default = "default_redemption_decay")]
    pub redemption_decay: Ratio,

    /// Weight of (redeemed / total debt) in the redemption fee
    #[serde(default = "default_redeemed_factor")]
    pub redeemed_proportion_factor: Ratio,

    #[serde(default = "default_min_redemption")]
    pub min_redemption: Amount,

    // === Guard ===
    #[serde(default = "default_guard_timeout_secs")]
    pub guard_timeout_secs: u64,

    #[serde(default = "default_guard_cap")]
    pub guard_cap: usize,

    #[serde(default = "default_guard_sweep_secs")]
    pub guard_sweep_interval_secs: u64,

    // === Transfers ===
    #[serde(default)]
    pub retry: RetryPolicy,
}

// Default value functions for serde
fn default_operator() -> Principal {
    Principal::new_unchecked("operator")
}

fn default_debt_token() -> AssetCode {
    AssetCode::new_unchecked("BLUSD")
}

fn default_price_staleness_secs() -> u64 {
    600 // 10 minutes
}

fn default_price_floor() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_read_only_floor() -> Ratio {
    Ratio::ONE
}

fn default_recovery_threshold() -> Ratio {
    Ratio::new_unchecked(Decimal::new(15, 1))
}

fn default_borrowing_fee() -> Ratio {
    Ratio::new_unchecked(Decimal::new(5, 3))
}

fn default_dust_threshold() -> Amount {
    Amount::new_unchecked(Decimal::new(1, 8))
}

fn default_min_borrow() -> Amount {
    Amount::from_units(1)
}

fn default_partial_fraction() -> Ratio {
    Ratio::new_unchecked(Decimal::new(5, 1))
}

fn default_recovery_target() -> Ratio {
    Ratio::new_unchecked(Decimal::new(155, 2))
}

fn default_stable_surcharge() -> Ratio {
    Ratio::new_unchecked(Decimal::new(5, 3))
}

fn default_parity_band() -> Ratio {
    Ratio::new_unchecked(Decimal::new(5, 2))
}

fn default_reserve_fee() -> Ratio {
    Ratio::new_unchecked(Decimal::new(5, 3))
}

fn default_redemption_floor() -> Ratio {
    Ratio::new_unchecked(Decimal::new(5, 3))
}

fn default_redemption_ceiling() -> Ratio {
    Ratio::new_unchecked(Decimal::new(5, 2))
}

fn default_redemption_decay() -> Ratio {
    Ratio::new_unchecked(Decimal::new(94, 2))
}

fn default_redeemed_factor() -> Ratio {
    Ratio::new_unchecked(Decimal::new(5, 1))
}

fn default_min_redemption() -> Amount {
    Amount::from_units(1)
}

fn default_guard_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_guard_cap() -> usize {
    10_000
}

fn default_guard_sweep_secs() -> u64 {
    60
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            operator: default_operator(),
            debt_token: default_debt_token(),
            price_staleness_secs: default_price_staleness_secs(),
            default_price_floor: default_price_floor(),
            read_only_floor: default_read_only_floor(),
            default_recovery_threshold: default_recovery_threshold(),
            borrowing_fee: default_borrowing_fee(),
            dust_threshold: default_dust_threshold(),
            min_borrow: default_min_borrow(),
            partial_liquidation_fraction: default_partial_fraction(),
            default_recovery_target: default_recovery_target(),
            stable_surcharge: default_stable_surcharge(),
            stable_parity_band: default_parity_band(),
            stable_repayment_policy: StableRepaymentPolicy::default(),
            reserve_redemption_fee: default_reserve_fee(),
            redemption_fee_floor: default_redemption_floor(),
            redemption_fee_ceiling: default_redemption_ceiling(),
            redemption_decay: default_redemption_decay(),
            redeemed_proportion_factor: default_redeemed_factor(),
            min_redemption: default_min_redemption(),
            guard_timeout_secs: default_guard_timeout_secs(),
            guard_cap: default_guard_cap(),
            guard_sweep_interval_secs: default_guard_sweep_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProtocolConfig {
    /// Load configuration from JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// File (if given) or defaults, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process env in `load`)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_OPERATOR) {
            self.operator = Principal::new(value.clone()).map_err(|_| ConfigError::InvalidEnv {
                var: ENV_OPERATOR,
                value,
            })?;
        }
        if let Some(value) = lookup(ENV_PRICE_STALENESS_SECS) {
            self.price_staleness_secs =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_PRICE_STALENESS_SECS,
                    value,
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redemption_fee_floor > self.redemption_fee_ceiling {
            return Err(ConfigError::Invalid(
                "redemption fee floor above ceiling".to_string(),
            ));
        }
        let fraction = self.partial_liquidation_fraction;
        if fraction == Ratio::ZERO || fraction > Ratio::ONE {
            return Err(ConfigError::Invalid(
                "partial liquidation fraction must be in (0, 1]".to_string(),
            ));
        }
        if self.stable_surcharge >= Ratio::ONE {
            return Err(ConfigError::Invalid(
                "stable surcharge must be below 1".to_string(),
            ));
        }
        if self.redemption_decay > Ratio::ONE {
            return Err(ConfigError::Invalid(
                "redemption decay must not exceed 1".to_string(),
            ));
        }
        if self.min_borrow.is_zero() || self.min_redemption.is_zero() {
            return Err(ConfigError::Invalid(
                "minimum borrow and redemption must be positive".to_string(),
            ));
        }
        if self.guard_cap == 0 {
            return Err(ConfigError::Invalid("guard cap must be positive".to_string()));
        }
        Ok(())
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.price_staleness_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ProtocolConfig::default();

        assert_eq!(config.operator.as_str(), "operator");
        assert_eq!(config.price_staleness_secs, 600);
        assert_eq!(config.borrowing_fee.value(), dec!(0.005));
        assert_eq!(config.dust_threshold.value(), dec!(0.00000001));
        assert_eq!(config.partial_liquidation_fraction.value(), dec!(0.5));
        assert_eq!(config.default_recovery_target.value(), dec!(1.55));
        assert_eq!(config.redemption_decay.value(), dec!(0.94));
        assert_eq!(config.guard_timeout_secs, 300);
        assert_eq!(config.guard_cap, 10_000);
        assert_eq!(config.retry.delays_secs, vec![1, 2, 4, 8, 16]);
        assert_eq!(config.stable_repayment_policy, StableRepaymentPolicy::TrackGap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"price_staleness_secs": 60, "stable_repayment_policy": "burn_from_protocol"}}"#
        )
        .unwrap();

        let config = ProtocolConfig::from_file(file.path()).unwrap();
        assert_eq!(config.price_staleness_secs, 60);
        assert_eq!(
            config.stable_repayment_policy,
            StableRepaymentPolicy::BurnFromProtocol
        );
        assert_eq!(config.guard_cap, 10_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ProtocolConfig::default();
        config
            .apply_env_overrides(|var| match var {
                ENV_OPERATOR => Some("admin".to_string()),
                ENV_PRICE_STALENESS_SECS => Some("120".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.operator.as_str(), "admin");
        assert_eq!(config.price_staleness_secs, 120);
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = ProtocolConfig::default();
        let result = config.apply_env_overrides(|var| match var {
            ENV_PRICE_STALENESS_SECS => Some("soon".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_validate_rejects_inverted_fee_bounds() {
        let config = ProtocolConfig {
            redemption_fee_floor: Ratio::new(dec!(0.1)).unwrap(),
            ..ProtocolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_minimums() {
        let no_min_borrow = ProtocolConfig {
            min_borrow: Amount::ZERO,
            ..ProtocolConfig::default()
        };
        assert!(no_min_borrow.validate().is_err());

        let no_min_redemption = ProtocolConfig {
            min_redemption: Amount::ZERO,
            ..ProtocolConfig::default()
        };
        assert!(no_min_redemption.validate().is_err());
    }
}
