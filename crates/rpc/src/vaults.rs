//! Vault owner and liquidator operations
//!
//! Each operation holds its `(caller, operation)` guard for its whole
//! duration and settles token movement around the commit:
//!
//! - tokens the caller pays are pulled before the commit and handed back
//!   if the commit is refused
//! - tokens the protocol pays are pushed after the commit, with retries;
//!   what cannot be delivered stays pending for the keeper
//! - a borrow's mint and a redemption's collateral legs get one attempt;
//!   a failure reverts the operation instead

use ballast_core::{Amount, AssetCode, Principal, VaultId};
use ballast_risk::liquidation::{self, liquidator_charge};
use ballast_risk::redemption::{self, leg_payouts};
use ballast_risk::{
    ledger, BorrowLeg, Event, OpenVault, Payment, PayoutId, ProtocolError, ProtocolState,
    RedeemRequest, StableRepaymentPolicy,
};
use ballast_events::EventRecord;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::context::{AppContext, Receipt};

impl AppContext {
    /// Open a vault, optionally borrowing in the same step
    pub async fn open_vault(&self, request: OpenVault) -> Result<Receipt, ProtocolError> {
        let _guard = self.guard(&request.owner, "open_vault")?;

        self.inspect("open_vault", |state, now| ledger::plan_open_vault(state, &request, now))
            .await?;
        self.pull(&request.owner, &request.asset, request.collateral)
            .await?;

        let committed = self
            .plan_and_commit("open_vault", |state, now| {
                ledger::plan_open_vault(state, &request, now)
            })
            .await;
        let record = match committed {
            Ok(record) => record,
            Err(e) => {
                self.give_back(&request.owner, &request.asset, request.collateral)
                    .await;
                return Err(e);
            }
        };

        let mut receipt = Receipt::new(record);
        if let Event::VaultOpened {
            vault_id,
            borrow: Some(leg),
            ..
        } = &receipt.event
        {
            let unsettled = self.deliver_borrow(*vault_id, leg).await?;
            receipt.unsettled = unsettled;
        }

        info!(
            owner = %request.owner,
            vault_id = ?receipt.vault_id(),
            asset = %request.asset,
            collateral = %request.collateral,
            "vault opened"
        );
        Ok(receipt)
    }

    pub async fn add_collateral(
        &self,
        caller: &Principal,
        vault_id: VaultId,
        amount: Amount,
    ) -> Result<Receipt, ProtocolError> {
        let _guard = self.guard(caller, "add_collateral")?;

        let asset = self
            .inspect("add_collateral", |state, _| {
                ledger::plan_add_collateral(state, caller, vault_id, amount)?;
                vault_asset(state, vault_id)
            })
            .await?;
        self.pull(caller, &asset, amount).await?;

        let committed = self
            .plan_and_commit("add_collateral", |state, _| {
                ledger::plan_add_collateral(state, caller, vault_id, amount)
            })
            .await;
        match committed {
            Ok(record) => Ok(Receipt::new(record)),
            Err(e) => {
                self.give_back(caller, &asset, amount).await;
                Err(e)
            }
        }
    }

    pub async fn withdraw_collateral(
        &self,
        caller: &Principal,
        vault_id: VaultId,
        amount: Amount,
    ) -> Result<Receipt, ProtocolError> {
        let _guard = self.guard(caller, "withdraw_collateral")?;
        let record = self
            .plan_and_commit("withdraw_collateral", |state, now| {
                ledger::plan_withdraw_collateral(state, caller, vault_id, amount, now)
            })
            .await?;
        Ok(self.finish(record).await)
    }

    /// Borrow against a vault. A mint that cannot be delivered takes the
    /// debt back out with `BorrowReverted`.
    pub async fn borrow(
        &self,
        caller: &Principal,
        vault_id: VaultId,
        amount: Amount,
    ) -> Result<Receipt, ProtocolError> {
        let _guard = self.guard(caller, "borrow")?;
        let record = self
            .plan_and_commit("borrow", |state, now| {
                ledger::plan_borrow(state, caller, vault_id, amount, now)
            })
            .await?;

        let mut receipt = Receipt::new(record);
        if let Event::Borrowed { leg, .. } = &receipt.event {
            let unsettled = self.deliver_borrow(vault_id, leg).await?;
            receipt.unsettled = unsettled;
        }
        Ok(receipt)
    }

    async fn deliver_borrow(&self, vault_id: VaultId, leg: &BorrowLeg) -> Result<Vec<PayoutId>, ProtocolError> {
        if let Err(e) = self.deliver_once(&leg.mint).await {
            warn!(vault_id, amount = %leg.amount, error = %e, "mint failed, reverting borrow");
            let reverted = self
                .plan_and_commit("revert_borrow", |state, _| {
                    ledger::plan_borrow_revert(state, vault_id, leg)
                })
                .await;
            if let Err(revert_error) = reverted {
                error!(
                    vault_id,
                    payout = %leg.mint,
                    error = %revert_error,
                    "borrow could not be reverted, mint left pending"
                );
            }
            return Err(e.into());
        }
        Ok(self.settle(leg.fee_credit.iter()).await)
    }

    /// Repay with debt tokens, which are burned
    pub async fn repay(
        &self,
        caller: &Principal,
        vault_id: VaultId,
        amount: Amount,
    ) -> Result<Receipt, ProtocolError> {
        let _guard = self.guard(caller, "repay")?;
        let debt_token = self.debt_token().clone();

        self.inspect("repay", |state, _| ledger::plan_repay(state, caller, vault_id, amount))
            .await?;
        self.pull(caller, &debt_token, amount).await?;

        let committed = self
            .plan_and_commit("repay", |state, _| {
                ledger::plan_repay(state, caller, vault_id, amount)
            })
            .await;
        match committed {
            Ok(record) => Ok(Receipt::new(record)),
            Err(e) => {
                self.give_back(caller, &debt_token, amount).await;
                Err(e)
            }
        }
    }

    /// Repay `amount` of debt with a stable unit at parity
    ///
    /// The caller pays the quoted stable amount; if the quote moves between
    /// the pull and the commit the payment is returned.
    pub async fn repay_with_stable(
        &self,
        caller: &Principal,
        vault_id: VaultId,
        unit: &AssetCode,
        amount: Amount,
    ) -> Result<Receipt, ProtocolError> {
        let _guard = self.guard(caller, "repay_with_stable")?;

        let quote = self
            .inspect("repay_with_stable", |state, now| {
                ledger::plan_repay_with_stable(state, caller, vault_id, unit, amount, now)?;
                ledger::quote_stable_payment(state, unit, amount, now)
            })
            .await?;
        self.pull(caller, unit, quote.stable_paid).await?;

        let committed = self
            .plan_and_commit("repay_with_stable", |state, now| {
                let current = ledger::quote_stable_payment(state, unit, amount, now)?;
                if current.stable_paid != quote.stable_paid {
                    return Err(ProtocolError::QuoteChanged {
                        quoted: quote.stable_paid,
                        current: current.stable_paid,
                    });
                }
                ledger::plan_repay_with_stable(state, caller, vault_id, unit, amount, now)
            })
            .await;
        let record = match committed {
            Ok(record) => record,
            Err(e) => {
                self.give_back(caller, unit, quote.stable_paid).await;
                return Err(e);
            }
        };

        if let Some(amount) = protocol_burn(&record.event) {
            self.burn_from_protocol(amount).await;
        }
        Ok(self.finish(record).await)
    }

    /// Close a debt-free vault and return its collateral
    pub async fn close_vault(&self, caller: &Principal, vault_id: VaultId) -> Result<Receipt, ProtocolError> {
        let _guard = self.guard(caller, "close_vault")?;
        let record = self
            .plan_and_commit("close_vault", |state, now| {
                ledger::plan_close_vault(state, caller, vault_id, now)
            })
            .await?;
        info!(owner = %caller, vault_id, "vault closed");
        Ok(self.finish(record).await)
    }

    // === Liquidation ===

    /// Liquidate a vault below its threshold. In Recovery a vault that is
    /// only below the borrow threshold is brought back to its target.
    pub async fn liquidate(
        &self,
        liquidator: &Principal,
        vault_id: VaultId,
        payment_unit: Option<&AssetCode>,
    ) -> Result<Receipt, ProtocolError> {
        self.liquidate_with(liquidator, "liquidate", |state, now| {
            liquidation::plan_liquidate_vault(state, liquidator, vault_id, payment_unit, now)
        })
        .await
    }

    pub async fn partial_liquidate(
        &self,
        liquidator: &Principal,
        vault_id: VaultId,
        repay: Amount,
        payment_unit: Option<&AssetCode>,
    ) -> Result<Receipt, ProtocolError> {
        self.liquidate_with(liquidator, "liquidate", |state, now| {
            liquidation::plan_partial_liquidation(state, liquidator, vault_id, repay, payment_unit, now)
        })
        .await
    }

    async fn liquidate_with<F>(
        &self,
        liquidator: &Principal,
        operation: &str,
        plan: F,
    ) -> Result<Receipt, ProtocolError>
    where
        F: Fn(&ProtocolState, DateTime<Utc>) -> Result<Event, ProtocolError>,
    {
        let _guard = self.guard(liquidator, operation)?;
        let debt_token = self.debt_token().clone();

        let quoted = self.inspect(operation, |state, now| plan(state, now)).await?;
        let (asset, charge) = liquidator_charge(&quoted, &debt_token).ok_or_else(|| {
            ProtocolError::InvariantViolation(format!("{} is not a liquidation", quoted.name()))
        })?;
        self.pull(liquidator, &asset, charge).await?;

        let committed = self
            .plan_and_commit(operation, |state, now| {
                let event = plan(state, now)?;
                match liquidator_charge(&event, &debt_token) {
                    Some((current_asset, current)) if current_asset == asset && current == charge => {
                        Ok(event)
                    }
                    Some((_, current)) => Err(ProtocolError::QuoteChanged {
                        quoted: charge,
                        current,
                    }),
                    None => Err(ProtocolError::InvariantViolation(format!(
                        "{} is not a liquidation",
                        event.name()
                    ))),
                }
            })
            .await;
        let record = match committed {
            Ok(record) => record,
            Err(e) => {
                self.give_back(liquidator, &asset, charge).await;
                return Err(e);
            }
        };

        if let Some(amount) = protocol_burn(&record.event) {
            self.burn_from_protocol(amount).await;
        }
        let receipt = self.finish(record).await;
        info!(
            liquidator = %liquidator,
            vault_id = ?receipt.vault_id(),
            event = receipt.event.name(),
            paid = %charge,
            asset = %asset,
            "vault liquidated"
        );
        Ok(receipt)
    }

    // === Redemption ===

    /// Burn debt tokens for reserve units and then collateral
    ///
    /// Legs are paid in order. If a leg cannot be paid, it and every leg
    /// after it are reverted and their debt tokens reminted to the redeemer;
    /// legs already paid stay paid.
    pub async fn redeem(&self, request: RedeemRequest) -> Result<Receipt, ProtocolError> {
        let _guard = self.guard(&request.redeemer, "redeem")?;
        let debt_token = self.debt_token().clone();

        self.inspect("redeem", |state, now| redemption::plan_redeem(state, &request, now))
            .await?;
        self.pull(&request.redeemer, &debt_token, request.amount)
            .await?;

        let committed = self
            .plan_and_commit("redeem", |state, now| {
                redemption::plan_redeem(state, &request, now)
            })
            .await;
        let record = match committed {
            Ok(record) => record,
            Err(e) => {
                self.give_back(&request.redeemer, &debt_token, request.amount)
                    .await;
                return Err(e);
            }
        };

        let mut unsettled = Vec::new();
        if let Event::Redeemed { legs, .. } = &record.event {
            for (index, leg) in legs.iter().enumerate() {
                let (main, fees): (Vec<_>, Vec<_>) = leg_payouts(&record.event, leg)
                    .into_iter()
                    .partition(|p| p.id == leg.payout_id());

                for payout in main {
                    if let Err(e) = self.deliver_once(payout).await {
                        warn!(
                            redeemer = %request.redeemer,
                            leg = index,
                            error = %e,
                            "redemption payout failed, reverting unpaid legs"
                        );
                        self.revert_redemption(&record, index, &request.redeemer)
                            .await;
                        return Err(e.into());
                    }
                }
                unsettled.extend(self.settle(fees).await);
            }
        }

        info!(
            redeemer = %request.redeemer,
            amount = %request.amount,
            sequence = record.sequence,
            "redemption settled"
        );
        let mut receipt = Receipt::new(record);
        receipt.unsettled = unsettled;
        Ok(receipt)
    }

    async fn revert_redemption(&self, record: &EventRecord<Event>, first_unpaid: usize, redeemer: &Principal) {
        let reverted = self
            .plan_and_commit("revert_redemption", |state, _| {
                redemption::plan_redemption_revert(state, record.sequence, &record.event, first_unpaid)
            })
            .await;
        match reverted {
            Ok(revert) => {
                if let Event::RedemptionReverted { remint, .. } = &revert.event {
                    self.give_back(redeemer, self.debt_token(), *remint).await;
                }
            }
            Err(e) => error!(
                sequence = record.sequence,
                error = %e,
                "redemption could not be reverted, manual follow-up required"
            ),
        }
    }
}

fn vault_asset(state: &ProtocolState, vault_id: VaultId) -> Result<AssetCode, ProtocolError> {
    state
        .vault(vault_id)
        .map(|v| v.asset.clone())
        .ok_or(ProtocolError::VaultNotFound(vault_id))
}

/// Debt tokens the protocol must burn from its own holdings after a stable
/// payment under `BurnFromProtocol`
fn protocol_burn(event: &Event) -> Option<Amount> {
    let burn_policy = |policy: &StableRepaymentPolicy| *policy == StableRepaymentPolicy::BurnFromProtocol;
    match event {
        Event::RepaidWithStable { amount, policy, .. } if burn_policy(policy) => Some(*amount),
        Event::VaultLiquidated {
            debt_repaid,
            payment: Payment::Stable { policy, .. },
            ..
        }
        | Event::VaultPartiallyLiquidated {
            debt_repaid,
            payment: Payment::Stable { policy, .. },
            ..
        } if burn_policy(policy) => Some(*debt_repaid),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::Price;
    use rust_decimal_macros::dec;

    fn unit() -> AssetCode {
        "USDX".parse().unwrap()
    }

    #[test]
    fn test_protocol_burn_only_under_burn_policy() {
        let repaid = |policy| Event::RepaidWithStable {
            vault_id: 1,
            unit: unit(),
            amount: Amount::from_units(100),
            stable_paid: Amount::from_units(101),
            surcharge: Amount::ZERO,
            policy,
            fee_credit: None,
        };
        assert_eq!(
            protocol_burn(&repaid(StableRepaymentPolicy::BurnFromProtocol)),
            Some(Amount::from_units(100))
        );
        assert_eq!(protocol_burn(&repaid(StableRepaymentPolicy::TrackGap)), None);
    }

    #[test]
    fn test_protocol_burn_ignores_debt_token_liquidation() {
        let event = Event::VaultPartiallyLiquidated {
            vault_id: 1,
            liquidator: Principal::new("keeper").unwrap(),
            price: Price::new(dec!(7)).unwrap(),
            debt_repaid: Amount::from_units(20),
            collateral_seized: Amount::from_units(3),
            targeted: false,
            payment: Payment::DebtToken,
            payouts: Vec::new(),
        };
        assert_eq!(protocol_burn(&event), None);
    }
}
