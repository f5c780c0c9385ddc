//! Deterministic fold of events into protocol state
//!
//! Used both after a live commit and when rebuilding state from the log.
//! Nothing here validates business rules: events were validated when they
//! were planned, so the fold only checks that state is consistent.

use ballast_core::Amount;
use ballast_events::EventRecord;
use tracing::{debug, warn};

use crate::collateral::AssetConfig;
use crate::config::{ProtocolConfig, StableRepaymentPolicy};
use crate::error::ProtocolError;
use crate::event::{Event, Payment, RedemptionLeg};
use crate::state::{Delta, ProtocolState};
use crate::vault::Vault;

impl ProtocolState {
    /// Apply one committed record. Sequences must follow on without gaps.
    pub fn apply(&mut self, record: &EventRecord<Event>) -> Result<(), ProtocolError> {
        let expected = self.last_sequence + 1;
        if record.sequence != expected {
            return Err(ProtocolError::InvariantViolation(format!(
                "expected sequence {}, got {}",
                expected, record.sequence
            )));
        }

        if record.event == Event::Unknown {
            warn!(sequence = record.sequence, "skipping unknown event type");
        } else {
            self.apply_event(&record.event)?;
        }

        self.last_sequence = record.sequence;
        self.last_hash = Some(record.hash.clone());
        self.refresh();
        debug!(sequence = record.sequence, event = record.event.name(), "event applied");
        Ok(())
    }

    /// Rebuild state from empty by folding `records` in order
    pub fn replay<'a>(
        config: ProtocolConfig,
        records: impl IntoIterator<Item = &'a EventRecord<Event>>,
    ) -> Result<Self, ProtocolError> {
        let mut state = ProtocolState::new(config);
        for record in records {
            state.apply(record)?;
        }
        Ok(state)
    }

    fn apply_event(&mut self, event: &Event) -> Result<(), ProtocolError> {
        match event {
            Event::AssetConfigured { asset, params } => {
                self.assets
                    .entry(asset.clone())
                    .and_modify(|c| c.params = params.clone())
                    .or_insert_with(|| AssetConfig::new(asset.clone(), params.clone()));
            }
            Event::AssetEnabled { asset, enabled } => {
                self.asset_mut(asset)?.enabled = *enabled;
            }
            Event::GlobalRateCurveSet { curve } => {
                self.global_curve = curve.clone();
            }
            Event::AssetRateCurveSet { asset, curve } => {
                self.asset_mut(asset)?.rate_curve = curve.clone();
            }
            Event::RecoveryRateCurveSet { curve } => {
                self.recovery_curve = curve.clone();
            }
            Event::HealthyRatioOverrideSet { asset, ratio } => {
                self.asset_mut(asset)?.healthy_ratio_override = *ratio;
            }
            Event::RecoveryRateOverrideSet { asset, rate } => {
                self.asset_mut(asset)?.recovery_rate_override = *rate;
            }
            Event::StableFeeSet { fee } => {
                self.stable_fee = *fee;
            }
            Event::StableUnitConfigured { unit, enabled } => {
                self.stable_unit_mut(unit).enabled = *enabled;
            }

            Event::PriceUpdated {
                asset,
                price,
                observed_at,
            } => {
                if let Some(config) = self.assets.get_mut(asset) {
                    config.last_price = Some(*price);
                    config.last_price_at = Some(*observed_at);
                } else if let Some(stable) = self.stable_units.get_mut(asset) {
                    stable.last_price = Some(*price);
                    stable.last_price_at = Some(*observed_at);
                } else {
                    return Err(ProtocolError::AssetNotConfigured(asset.clone()));
                }
            }

            Event::VaultOpened {
                vault_id,
                owner,
                asset,
                collateral,
                opened_at,
                borrow,
            } => {
                self.insert_vault(Vault {
                    id: *vault_id,
                    owner: owner.clone(),
                    asset: asset.clone(),
                    collateral: *collateral,
                    debt: Amount::ZERO,
                    created_at: *opened_at,
                    last_accrual: *opened_at,
                });
                if let Some(leg) = borrow {
                    self.adjust_vault(*vault_id, Delta::None, Delta::Add(leg.debt_added()))?;
                }
            }
            Event::CollateralAdded { vault_id, amount } => {
                self.adjust_vault(*vault_id, Delta::Add(*amount), Delta::None)?;
            }
            Event::CollateralWithdrawn {
                vault_id, amount, ..
            } => {
                self.adjust_vault(*vault_id, Delta::Sub(*amount), Delta::None)?;
                self.remove_if_empty(*vault_id)?;
            }
            Event::Borrowed {
                vault_id,
                leg,
                borrowed_at,
            } => {
                let vault = self.vault_mut(*vault_id)?;
                if vault.debt.is_zero() {
                    vault.last_accrual = *borrowed_at;
                }
                self.adjust_vault(*vault_id, Delta::None, Delta::Add(leg.debt_added()))?;
            }
            Event::BorrowReverted { vault_id, leg } => {
                self.adjust_vault(*vault_id, Delta::None, Delta::Sub(leg.debt_added()))?;
                for id in leg.payout_ids() {
                    self.pending_payouts.remove(&id);
                }
                self.remove_if_empty(*vault_id)?;
            }
            Event::Repaid { vault_id, amount } => {
                self.adjust_vault(*vault_id, Delta::None, Delta::Sub(*amount))?;
                self.remove_if_empty(*vault_id)?;
            }
            Event::RepaidWithStable {
                vault_id,
                unit,
                amount,
                policy,
                ..
            } => {
                self.adjust_vault(*vault_id, Delta::None, Delta::Sub(*amount))?;
                self.credit_stable(unit, *amount, *policy);
                self.remove_if_empty(*vault_id)?;
            }
            Event::VaultClosed {
                vault_id,
                forgiven_debt,
                ..
            } => {
                self.remove_vault(*vault_id)?;
                self.forgiven_dust += *forgiven_debt;
            }

            Event::VaultLiquidated {
                vault_id,
                debt_repaid,
                payment,
                ..
            } => {
                self.remove_vault(*vault_id)?;
                self.apply_payment(payment, *debt_repaid);
            }
            Event::VaultPartiallyLiquidated {
                vault_id,
                debt_repaid,
                collateral_seized,
                payment,
                ..
            } => {
                self.adjust_vault(
                    *vault_id,
                    Delta::Sub(*collateral_seized),
                    Delta::Sub(*debt_repaid),
                )?;
                self.apply_payment(payment, *debt_repaid);
                self.remove_if_empty(*vault_id)?;
            }

            Event::Redeemed {
                legs,
                fee_state_after,
                ..
            } => {
                for leg in legs {
                    self.apply_leg(leg)?;
                }
                self.redemption_fee = *fee_state_after;
            }
            Event::RedemptionReverted {
                legs,
                cancelled_payouts,
                restore_fee_state,
                ..
            } => {
                for leg in legs {
                    self.revert_leg(leg)?;
                }
                for id in cancelled_payouts {
                    self.pending_payouts.remove(id);
                }
                if let Some(fee_state) = restore_fee_state {
                    self.redemption_fee = *fee_state;
                }
            }

            Event::InterestAccrued {
                accrued_at,
                entries,
                ..
            } => {
                for entry in entries {
                    self.adjust_vault(entry.vault_id, Delta::None, Delta::Add(entry.interest))?;
                    self.vault_mut(entry.vault_id)?.last_accrual = *accrued_at;
                }
            }
            Event::PayoutCompleted { payout_id } => {
                if self.pending_payouts.remove(payout_id).is_none() {
                    warn!(payout_id, "completed payout was not pending");
                }
            }
            Event::Unknown => {}
        }

        for payout in event.scheduled_payouts() {
            self.schedule(payout);
        }
        Ok(())
    }

    fn asset_mut(&mut self, code: &ballast_core::AssetCode) -> Result<&mut AssetConfig, ProtocolError> {
        self.assets
            .get_mut(code)
            .ok_or_else(|| ProtocolError::AssetNotConfigured(code.clone()))
    }

    fn credit_stable(
        &mut self,
        unit: &ballast_core::AssetCode,
        amount: Amount,
        policy: StableRepaymentPolicy,
    ) {
        self.stable_unit_mut(unit).reserve += amount;
        if policy == StableRepaymentPolicy::TrackGap {
            self.unbacked_supply += amount;
        }
    }

    fn apply_payment(&mut self, payment: &Payment, debt_repaid: Amount) {
        if let Payment::Stable { unit, policy, .. } = payment {
            self.credit_stable(unit, debt_repaid, *policy);
        }
    }

    fn apply_leg(&mut self, leg: &RedemptionLeg) -> Result<(), ProtocolError> {
        match leg {
            RedemptionLeg::Reserve {
                unit,
                gross,
                gap_closed,
                ..
            } => {
                let stable = self.stable_unit_mut(unit);
                stable.reserve = stable.reserve.checked_sub(gross).ok_or_else(|| {
                    ProtocolError::InvariantViolation(format!("{} reserve cannot cover {}", unit, gross))
                })?;
                self.unbacked_supply = self.unbacked_supply.saturating_sub(gap_closed);
            }
            RedemptionLeg::Vaults { fills, .. } => {
                for fill in fills {
                    self.adjust_vault(
                        fill.vault_id,
                        Delta::Sub(fill.collateral_taken),
                        Delta::Sub(fill.debt_reduced),
                    )?;
                    self.remove_if_empty(fill.vault_id)?;
                }
            }
        }
        Ok(())
    }

    fn revert_leg(&mut self, leg: &RedemptionLeg) -> Result<(), ProtocolError> {
        match leg {
            RedemptionLeg::Reserve {
                unit,
                gross,
                gap_closed,
                ..
            } => {
                self.stable_unit_mut(unit).reserve += *gross;
                self.unbacked_supply += *gap_closed;
            }
            RedemptionLeg::Vaults { asset, fills, .. } => {
                for fill in fills {
                    if self.vaults.contains_key(&fill.vault_id) {
                        self.adjust_vault(
                            fill.vault_id,
                            Delta::Add(fill.collateral_taken),
                            Delta::Add(fill.debt_reduced),
                        )?;
                    } else {
                        // Emptied by the redemption; bring it back
                        self.insert_vault(Vault {
                            id: fill.vault_id,
                            owner: fill.owner.clone(),
                            asset: asset.clone(),
                            collateral: fill.collateral_taken,
                            debt: fill.debt_reduced,
                            created_at: fill.created_at,
                            last_accrual: fill.last_accrual,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{plan_repay, plan_withdraw_collateral};
    use crate::state::Mode;
    use crate::testing::{amount, asset, principal, Harness};
    use ballast_events::{EventReader, EventStore, GENESIS_HASH};
    use rust_decimal_macros::dec;

    fn busy_harness() -> Harness {
        let mut h = Harness::new();
        let eth = asset("ETH");
        h.configure(&eth, dec!(10));
        let a = h.open("alice", &eth, dec!(10), Some(dec!(40)));
        h.open("bob", &eth, dec!(5), None);
        let event = plan_repay(&h.state, &principal("alice"), a, amount(dec!(10))).unwrap();
        h.commit(event);
        let event =
            plan_withdraw_collateral(&h.state, &principal("alice"), a, amount(dec!(1)), h.now)
                .unwrap();
        h.commit(event);
        h
    }

    #[test]
    fn test_replay_matches_live_state() {
        let h = busy_harness();
        let replayed = ProtocolState::replay(h.state.config().clone(), &h.records).unwrap();

        assert_eq!(replayed.status(), h.state.status());
        let live: Vec<_> = h.state.vaults().cloned().collect();
        let rebuilt: Vec<_> = replayed.vaults().cloned().collect();
        assert_eq!(live, rebuilt);
        assert_eq!(replayed.last_hash(), h.state.last_hash());
        assert_eq!(
            replayed.pending_payouts().count(),
            h.state.pending_payouts().count()
        );
        assert!(replayed.check_invariants().is_ok());
    }

    #[test]
    fn test_replay_through_store() {
        let h = busy_harness();
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = EventStore::new(dir.path()).unwrap();
            for record in &h.records {
                store.append(record).unwrap();
            }
        }

        let records = EventReader::from_directory(dir.path())
            .unwrap()
            .read_all::<Event>()
            .unwrap();
        assert_eq!(records.len(), h.records.len());
        assert!(ballast_events::verify_chain(&records).is_ok());

        let replayed = ProtocolState::replay(h.state.config().clone(), &records).unwrap();
        assert_eq!(replayed.status(), h.state.status());
    }

    #[test]
    fn test_sequence_gap_rejected() {
        let mut h = busy_harness();
        let record = EventRecord::seal(
            h.state.last_sequence() + 2,
            h.now,
            GENESIS_HASH,
            Event::StableFeeSet {
                fee: crate::testing::ratio(dec!(0.01)),
            },
        )
        .unwrap();
        assert!(matches!(
            h.state.apply(&record),
            Err(ProtocolError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_unknown_event_skipped() {
        let mut h = busy_harness();
        let before = h.state.status();
        h.commit(Event::Unknown);
        let after = h.state.status();
        assert_eq!(after.last_sequence, before.last_sequence + 1);
        assert_eq!(after.total_debt, before.total_debt);
    }

    #[test]
    fn test_mode_follows_prices() {
        let mut h = Harness::new();
        let eth = asset("ETH");
        h.configure(&eth, dec!(10));
        h.open_with_debt("alice", &eth, dec!(10), dec!(60));
        assert_eq!(h.state.mode(), Mode::Normal);

        h.set_price(&eth, dec!(8.5));
        assert_eq!(h.state.mode(), Mode::Recovery);

        h.set_price(&eth, dec!(5.9));
        assert_eq!(h.state.mode(), Mode::ReadOnly);

        h.set_price(&eth, dec!(9));
        assert_eq!(h.state.mode(), Mode::Normal);
        assert_eq!(h.state.tcr().value(), dec!(1.5));
    }

    #[test]
    fn test_recovery_threshold_is_debt_weighted() {
        let mut h = Harness::new();
        let eth = asset("ETH");
        let btc = asset("BTC");
        h.configure(&eth, dec!(10));
        let mut btc_params = crate::testing::params();
        btc_params.borrow_threshold = crate::testing::ratio(dec!(2));
        btc_params.recovery_target_ratio = crate::testing::ratio(dec!(2.1));
        h.commit(Event::AssetConfigured {
            asset: btc.clone(),
            params: btc_params,
        });
        h.set_price(&btc, dec!(100));

        // No debt yet: configured default
        assert_eq!(h.state.recovery_threshold().value(), dec!(1.5));

        h.open_with_debt("alice", &eth, dec!(100), dec!(300));
        h.open_with_debt("bob", &btc, dec!(10), dec!(100));
        // (1.5 × 300 + 2 × 100) / 400
        assert_eq!(h.state.recovery_threshold().value(), dec!(1.625));
    }
}
