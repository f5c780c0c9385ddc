//! Protocol state - the single owned aggregate
//!
//! A cache of the event log. Mutated only by the fold in `apply`; every
//! operation plans against `&ProtocolState` and returns an event. Derived
//! figures (TCR, weighted averages, mode) are recomputed synchronously
//! after every applied event, never lazily.

use ballast_core::{Amount, AssetCode, Price, Principal, Ratio, VaultId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum_macros::Display;
use tracing::info;

use crate::collateral::{AssetConfig, StableUnit};
use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::payout::{PayoutId, PendingPayout};
use crate::rates::{ThresholdCurve, ThresholdLevels};
use crate::vault::Vault;

/// Protocol operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    #[default]
    Normal,
    /// TCR below the recovery threshold
    Recovery,
    /// TCR below the read-only floor or a price below its sanity floor
    ReadOnly,
}

/// Redemption fee memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RedemptionFeeState {
    pub base_rate: Ratio,
    pub last_redemption_at: Option<DateTime<Utc>>,
}

/// Debt-weighted averages of the per-asset thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAverages {
    pub liquidation_ratio: Ratio,
    /// Weighted borrow threshold; the Recovery entry threshold
    pub recovery_threshold: Ratio,
    pub recovery_target: Ratio,
    pub warning_ratio: Ratio,
    pub healthy_ratio: Ratio,
}

impl CachedAverages {
    fn fallback(config: &ProtocolConfig) -> Self {
        let threshold = config.default_recovery_threshold;
        Self {
            liquidation_ratio: threshold,
            recovery_threshold: threshold,
            recovery_target: config.default_recovery_target,
            warning_ratio: threshold,
            healthy_ratio: Ratio::new_unchecked(threshold.value() * Decimal::new(15, 1)),
        }
    }

    /// Levels for resolving the recovery curve
    pub fn levels(&self) -> ThresholdLevels {
        ThresholdLevels {
            liquidation: self.liquidation_ratio,
            borrow: self.recovery_threshold,
            warning: self.warning_ratio,
            healthy: self.healthy_ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTotals {
    pub collateral: Amount,
    pub debt: Amount,
}

/// Snapshot for the status query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub mode: Mode,
    pub tcr: Ratio,
    pub averages: CachedAverages,
    pub total_collateral_value: Amount,
    pub total_debt: Amount,
    pub vault_count: usize,
    pub unbacked_supply: Amount,
    pub forgiven_dust: Amount,
    pub pending_payouts: usize,
    pub redemption_base_rate: Ratio,
    pub stable_fee: Ratio,
    pub last_sequence: u64,
}

#[derive(Debug, Clone)]
pub struct ProtocolState {
    pub(crate) config: ProtocolConfig,
    pub(crate) vaults: BTreeMap<VaultId, Vault>,
    pub(crate) owner_index: BTreeMap<Principal, BTreeSet<VaultId>>,
    pub(crate) assets: BTreeMap<AssetCode, AssetConfig>,
    pub(crate) totals: BTreeMap<AssetCode, AssetTotals>,
    pub(crate) stable_units: BTreeMap<AssetCode, StableUnit>,
    pub(crate) global_curve: ThresholdCurve,
    pub(crate) recovery_curve: ThresholdCurve,
    /// Surcharge on stable-unit payments
    pub(crate) stable_fee: Ratio,
    pub(crate) redemption_fee: RedemptionFeeState,
    pub(crate) pending_payouts: BTreeMap<PayoutId, PendingPayout>,
    pub(crate) next_vault_id: VaultId,
    pub(crate) next_payout_id: PayoutId,
    /// Debt repaid in stable units that was not burned from supply
    pub(crate) unbacked_supply: Amount,
    pub(crate) forgiven_dust: Amount,
    pub(crate) last_sequence: u64,
    pub(crate) last_hash: Option<String>,

    mode: Mode,
    tcr: Ratio,
    averages: CachedAverages,
}

impl ProtocolState {
    pub fn new(config: ProtocolConfig) -> Self {
        let averages = CachedAverages::fallback(&config);
        let stable_fee = config.stable_surcharge;
        Self {
            config,
            vaults: BTreeMap::new(),
            owner_index: BTreeMap::new(),
            assets: BTreeMap::new(),
            totals: BTreeMap::new(),
            stable_units: BTreeMap::new(),
            global_curve: ThresholdCurve::default_global(),
            recovery_curve: ThresholdCurve::default_recovery(),
            stable_fee,
            redemption_fee: RedemptionFeeState::default(),
            pending_payouts: BTreeMap::new(),
            next_vault_id: 1,
            next_payout_id: 1,
            unbacked_supply: Amount::ZERO,
            forgiven_dust: Amount::ZERO,
            last_sequence: 0,
            last_hash: None,
            mode: Mode::Normal,
            tcr: Ratio::INFINITE,
            averages,
        }
    }

    // === Queries ===

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Total collateral ratio
    pub fn tcr(&self) -> Ratio {
        self.tcr
    }

    pub fn averages(&self) -> &CachedAverages {
        &self.averages
    }

    pub fn recovery_threshold(&self) -> Ratio {
        self.averages.recovery_threshold
    }

    pub fn vault(&self, id: VaultId) -> Option<&Vault> {
        self.vaults.get(&id)
    }

    pub fn vaults(&self) -> impl Iterator<Item = &Vault> {
        self.vaults.values()
    }

    pub fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    pub fn vaults_by_owner(&self, owner: &Principal) -> Vec<&Vault> {
        self.owner_index
            .get(owner)
            .map(|ids| ids.iter().filter_map(|id| self.vaults.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn asset(&self, code: &AssetCode) -> Option<&AssetConfig> {
        self.assets.get(code)
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetConfig> {
        self.assets.values()
    }

    pub fn stable_unit(&self, unit: &AssetCode) -> Option<&StableUnit> {
        self.stable_units.get(unit)
    }

    pub fn stable_units(&self) -> impl Iterator<Item = &StableUnit> {
        self.stable_units.values()
    }

    pub fn stable_fee(&self) -> Ratio {
        self.stable_fee
    }

    pub fn global_curve(&self) -> &ThresholdCurve {
        &self.global_curve
    }

    pub fn recovery_curve(&self) -> &ThresholdCurve {
        &self.recovery_curve
    }

    pub fn redemption_fee_state(&self) -> RedemptionFeeState {
        self.redemption_fee
    }

    pub fn totals(&self, asset: &AssetCode) -> AssetTotals {
        self.totals.get(asset).copied().unwrap_or_default()
    }

    pub fn total_debt(&self) -> Amount {
        self.totals.values().map(|t| t.debt).sum()
    }

    pub fn total_collateral_value(&self) -> Amount {
        self.totals
            .iter()
            .filter_map(|(code, totals)| {
                let price = self.assets.get(code)?.last_price?;
                Some(totals.collateral.value_at(price))
            })
            .sum()
    }

    pub fn unbacked_supply(&self) -> Amount {
        self.unbacked_supply
    }

    pub fn pending_payouts(&self) -> impl Iterator<Item = &PendingPayout> {
        self.pending_payouts.values()
    }

    pub fn pending_payout(&self, id: PayoutId) -> Option<&PendingPayout> {
        self.pending_payouts.get(&id)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Ratio at the last stored price; None if the asset was never priced
    pub fn collateral_ratio(&self, vault: &Vault) -> Option<Ratio> {
        let price = self.assets.get(&vault.asset)?.last_price?;
        Some(vault.ratio_at(price))
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            mode: self.mode,
            tcr: self.tcr,
            averages: self.averages,
            total_collateral_value: self.total_collateral_value(),
            total_debt: self.total_debt(),
            vault_count: self.vaults.len(),
            unbacked_supply: self.unbacked_supply,
            forgiven_dust: self.forgiven_dust,
            pending_payouts: self.pending_payouts.len(),
            redemption_base_rate: self.redemption_fee.base_rate,
            stable_fee: self.stable_fee,
            last_sequence: self.last_sequence,
        }
    }

    // === Checks used while planning ===

    pub(crate) fn ensure_writable(&self) -> Result<(), ProtocolError> {
        if self.mode == Mode::ReadOnly {
            return Err(ProtocolError::ReadOnlyMode);
        }
        Ok(())
    }

    pub(crate) fn require_operator(&self, caller: &Principal) -> Result<(), ProtocolError> {
        if *caller != self.config.operator {
            return Err(ProtocolError::Unauthorized(caller.clone()));
        }
        Ok(())
    }

    pub(crate) fn asset_config(&self, code: &AssetCode) -> Result<&AssetConfig, ProtocolError> {
        self.assets
            .get(code)
            .ok_or_else(|| ProtocolError::AssetNotConfigured(code.clone()))
    }

    pub(crate) fn enabled_asset(&self, code: &AssetCode) -> Result<&AssetConfig, ProtocolError> {
        let config = self.asset_config(code)?;
        if !config.enabled {
            return Err(ProtocolError::AssetDisabled(code.clone()));
        }
        Ok(config)
    }

    pub(crate) fn existing_vault(&self, id: VaultId) -> Result<&Vault, ProtocolError> {
        self.vaults.get(&id).ok_or(ProtocolError::VaultNotFound(id))
    }

    pub(crate) fn owned_vault(&self, id: VaultId, caller: &Principal) -> Result<&Vault, ProtocolError> {
        let vault = self.existing_vault(id)?;
        if vault.owner != *caller {
            return Err(ProtocolError::NotVaultOwner {
                vault_id: id,
                caller: caller.clone(),
            });
        }
        Ok(vault)
    }

    fn check_age(
        &self,
        asset: &AssetCode,
        price: Option<Price>,
        at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Price, ProtocolError> {
        let (price, at) = match (price, at) {
            (Some(price), Some(at)) => (price, at),
            _ => return Err(ProtocolError::NoPrice(asset.clone())),
        };
        let age_secs = now.signed_duration_since(at).num_seconds().max(0) as u64;
        if age_secs > self.config.price_staleness_secs {
            return Err(ProtocolError::StalePrice {
                asset: asset.clone(),
                age_secs,
                max_age_secs: self.config.price_staleness_secs,
            });
        }
        Ok(price)
    }

    /// Stored price of a collateral asset, rejected when stale
    pub(crate) fn fresh_price(&self, asset: &AssetCode, now: DateTime<Utc>) -> Result<Price, ProtocolError> {
        let config = self.asset_config(asset)?;
        self.check_age(asset, config.last_price, config.last_price_at, now)
    }

    /// Stored price of a stable unit, rejected when stale or off parity
    pub(crate) fn parity_price(&self, unit: &AssetCode, now: DateTime<Utc>) -> Result<Price, ProtocolError> {
        let stable = self
            .stable_units
            .get(unit)
            .filter(|s| s.enabled)
            .ok_or_else(|| ProtocolError::StableUnitNotConfigured(unit.clone()))?;
        let price = self.check_age(unit, stable.last_price, stable.last_price_at, now)?;
        if price.deviation_from_parity() > self.config.stable_parity_band {
            return Err(ProtocolError::StableOffParity {
                unit: unit.clone(),
                price,
            });
        }
        Ok(price)
    }

    // === Mutation helpers for the fold ===

    pub(crate) fn vault_mut(&mut self, id: VaultId) -> Result<&mut Vault, ProtocolError> {
        self.vaults
            .get_mut(&id)
            .ok_or_else(|| ProtocolError::InvariantViolation(format!("vault {} missing", id)))
    }

    pub(crate) fn insert_vault(&mut self, vault: Vault) {
        let totals = self.totals.entry(vault.asset.clone()).or_default();
        totals.collateral += vault.collateral;
        totals.debt += vault.debt;
        self.owner_index
            .entry(vault.owner.clone())
            .or_default()
            .insert(vault.id);
        self.next_vault_id = self.next_vault_id.max(vault.id + 1);
        self.vaults.insert(vault.id, vault);
    }

    pub(crate) fn remove_vault(&mut self, id: VaultId) -> Result<Vault, ProtocolError> {
        let vault = self
            .vaults
            .remove(&id)
            .ok_or_else(|| ProtocolError::InvariantViolation(format!("vault {} missing", id)))?;
        if let Some(totals) = self.totals.get_mut(&vault.asset) {
            totals.collateral = totals.collateral.saturating_sub(&vault.collateral);
            totals.debt = totals.debt.saturating_sub(&vault.debt);
        }
        if let Some(ids) = self.owner_index.get_mut(&vault.owner) {
            ids.remove(&id);
            if ids.is_empty() {
                self.owner_index.remove(&vault.owner);
            }
        }
        Ok(vault)
    }

    /// Signed change of a vault's collateral and debt, keeping totals in step
    pub(crate) fn adjust_vault(
        &mut self,
        id: VaultId,
        collateral: Delta,
        debt: Delta,
    ) -> Result<(), ProtocolError> {
        let vault = self.vault_mut(id)?;
        vault.collateral = collateral.apply(vault.collateral, "collateral", id)?;
        vault.debt = debt.apply(vault.debt, "debt", id)?;
        let asset = vault.asset.clone();

        let totals = self.totals.entry(asset).or_default();
        totals.collateral = collateral.apply_saturating(totals.collateral);
        totals.debt = debt.apply_saturating(totals.debt);
        Ok(())
    }

    /// Drop a vault once it holds nothing
    pub(crate) fn remove_if_empty(&mut self, id: VaultId) -> Result<(), ProtocolError> {
        if self.vaults.get(&id).map(Vault::is_empty).unwrap_or(false) {
            self.remove_vault(id)?;
        }
        Ok(())
    }

    pub(crate) fn schedule(&mut self, payout: &PendingPayout) {
        self.next_payout_id = self.next_payout_id.max(payout.id + 1);
        self.pending_payouts.insert(payout.id, payout.clone());
    }

    pub(crate) fn stable_unit_mut(&mut self, unit: &AssetCode) -> &mut StableUnit {
        self.stable_units
            .entry(unit.clone())
            .or_insert_with(|| StableUnit::new(unit.clone()))
    }

    // === Derived figures ===

    /// Recompute TCR, averages and mode
    pub(crate) fn refresh(&mut self) {
        let total_debt = self.total_debt();
        self.tcr = Ratio::collateral(self.total_collateral_value(), total_debt);
        self.averages = self.weighted_averages(total_debt);

        let below_floor = self.assets.values().any(AssetConfig::below_price_floor);
        let mode = if below_floor || self.tcr < self.config.read_only_floor {
            Mode::ReadOnly
        } else if self.tcr < self.averages.recovery_threshold {
            Mode::Recovery
        } else {
            Mode::Normal
        };

        if mode != self.mode {
            info!(
                from = %self.mode,
                to = %mode,
                tcr = %self.tcr,
                threshold = %self.averages.recovery_threshold,
                below_floor,
                "protocol mode changed"
            );
            self.mode = mode;
        }
    }

    fn weighted_averages(&self, total_debt: Amount) -> CachedAverages {
        if self.assets.is_empty() {
            return CachedAverages::fallback(&self.config);
        }

        // Weight by debt; with no debt anywhere every asset counts once
        let weight = |code: &AssetCode| -> Decimal {
            if total_debt.is_zero() {
                Decimal::ONE
            } else {
                self.totals(code).debt.value()
            }
        };
        let total_weight: Decimal = self.assets.keys().map(weight).sum();
        if total_weight.is_zero() {
            return CachedAverages::fallback(&self.config);
        }

        let average = |f: &dyn Fn(&AssetConfig) -> Ratio| -> Ratio {
            let sum: Decimal = self
                .assets
                .values()
                .map(|c| f(c).value() * weight(&c.asset))
                .sum();
            Ratio::new_unchecked(sum / total_weight)
        };

        let recovery_threshold = if total_debt.is_zero() {
            self.config.default_recovery_threshold
        } else {
            average(&|c| c.params.borrow_threshold)
        };

        CachedAverages {
            liquidation_ratio: average(&|c| c.params.liquidation_ratio),
            recovery_threshold,
            recovery_target: average(&|c| c.params.recovery_target_ratio),
            warning_ratio: average(&|c| c.warning_ratio()),
            healthy_ratio: average(&|c| c.healthy_ratio()),
        }
    }
}

/// Signed amount change applied by the fold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delta {
    None,
    Add(Amount),
    Sub(Amount),
}

impl Delta {
    fn apply(self, current: Amount, field: &str, id: VaultId) -> Result<Amount, ProtocolError> {
        match self {
            Delta::None => Ok(current),
            Delta::Add(amount) => Ok(current + amount),
            Delta::Sub(amount) => current.checked_sub(&amount).ok_or_else(|| {
                ProtocolError::InvariantViolation(format!(
                    "vault {} {} {} cannot cover {}",
                    id, field, current, amount
                ))
            }),
        }
    }

    fn apply_saturating(self, current: Amount) -> Amount {
        match self {
            Delta::None => current,
            Delta::Add(amount) => current + amount,
            Delta::Sub(amount) => current.saturating_sub(&amount),
        }
    }
}
