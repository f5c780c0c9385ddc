//! Operator operations
//!
//! Thin wrappers over the admin planners. They go through the same guard
//! and commit path as user operations and work in every mode.

use ballast_core::{AssetCode, Principal, Ratio};
use ballast_risk::{admin, AssetParams, Event, ProtocolError, ProtocolState, RateCurve, ThresholdCurve};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::context::{AppContext, Receipt};

impl AppContext {
    async fn administer(
        &self,
        caller: &Principal,
        operation: &str,
        plan: impl FnOnce(&ProtocolState, DateTime<Utc>) -> Result<Event, ProtocolError>,
    ) -> Result<Receipt, ProtocolError> {
        let _guard = self.guard(caller, operation)?;
        let record = self.plan_and_commit(operation, plan).await?;
        info!(operator = %caller, operation, sequence = record.sequence, "admin change applied");
        Ok(Receipt::new(record))
    }

    pub async fn configure_asset(
        &self,
        caller: &Principal,
        asset: &AssetCode,
        params: &AssetParams,
    ) -> Result<Receipt, ProtocolError> {
        self.administer(caller, "configure_asset", |state, _| {
            admin::plan_configure_asset(state, caller, asset, params)
        })
        .await
    }

    pub async fn enable_asset(
        &self,
        caller: &Principal,
        asset: &AssetCode,
        enabled: bool,
    ) -> Result<Receipt, ProtocolError> {
        self.administer(caller, "enable_asset", |state, _| {
            admin::plan_enable_asset(state, caller, asset, enabled)
        })
        .await
    }

    pub async fn set_global_curve(
        &self,
        caller: &Principal,
        curve: ThresholdCurve,
    ) -> Result<Receipt, ProtocolError> {
        self.administer(caller, "set_global_curve", |state, _| {
            admin::plan_set_global_curve(state, caller, curve)
        })
        .await
    }

    pub async fn set_asset_curve(
        &self,
        caller: &Principal,
        asset: &AssetCode,
        curve: Option<RateCurve>,
    ) -> Result<Receipt, ProtocolError> {
        self.administer(caller, "set_asset_curve", |state, _| {
            admin::plan_set_asset_curve(state, caller, asset, curve)
        })
        .await
    }

    pub async fn set_recovery_curve(
        &self,
        caller: &Principal,
        curve: ThresholdCurve,
    ) -> Result<Receipt, ProtocolError> {
        self.administer(caller, "set_recovery_curve", |state, _| {
            admin::plan_set_recovery_curve(state, caller, curve)
        })
        .await
    }

    pub async fn set_healthy_override(
        &self,
        caller: &Principal,
        asset: &AssetCode,
        ratio: Option<Ratio>,
    ) -> Result<Receipt, ProtocolError> {
        self.administer(caller, "set_healthy_override", |state, _| {
            admin::plan_set_healthy_override(state, caller, asset, ratio)
        })
        .await
    }

    pub async fn set_recovery_rate_override(
        &self,
        caller: &Principal,
        asset: &AssetCode,
        rate: Option<Ratio>,
    ) -> Result<Receipt, ProtocolError> {
        self.administer(caller, "set_recovery_rate_override", |state, _| {
            admin::plan_set_recovery_rate_override(state, caller, asset, rate)
        })
        .await
    }

    pub async fn set_stable_fee(&self, caller: &Principal, fee: Ratio) -> Result<Receipt, ProtocolError> {
        self.administer(caller, "set_stable_fee", |state, _| {
            admin::plan_set_stable_fee(state, caller, fee)
        })
        .await
    }

    pub async fn configure_stable_unit(
        &self,
        caller: &Principal,
        unit: &AssetCode,
        enabled: bool,
    ) -> Result<Receipt, ProtocolError> {
        self.administer(caller, "configure_stable_unit", |state, _| {
            admin::plan_configure_stable_unit(state, caller, unit, enabled)
        })
        .await
    }
}
