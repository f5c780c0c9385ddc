//! Read-only queries

use ballast_core::{Amount, AssetCode, Principal, Ratio, VaultId};
use ballast_events::{verify_chain, EventError, EventReader, EventRecord};
use ballast_risk::interest::rate_breakdown;
use ballast_risk::{
    ledger, liquidation, redemption, Event, LiquidationCandidate, PendingPayout, ProtocolError,
    RateBreakdown, StableQuote, SystemStatus, Vault,
};

use crate::context::AppContext;

impl AppContext {
    pub async fn status(&self) -> SystemStatus {
        self.with_state(|state| state.status()).await
    }

    pub async fn vault(&self, vault_id: VaultId) -> Option<Vault> {
        self.with_state(|state| state.vault(vault_id).cloned()).await
    }

    pub async fn vaults_by_owner(&self, owner: &Principal) -> Vec<Vault> {
        self.with_state(|state| state.vaults_by_owner(owner).into_iter().cloned().collect())
            .await
    }

    /// Collateral ratio at the stored price
    pub async fn collateral_ratio(&self, vault_id: VaultId) -> Result<Option<Ratio>, ProtocolError> {
        self.with_state(|state| {
            let vault = state
                .vault(vault_id)
                .ok_or(ProtocolError::VaultNotFound(vault_id))?;
            Ok(state.collateral_ratio(vault))
        })
        .await
    }

    /// Every layer of the vault's interest rate
    pub async fn vault_rate(&self, vault_id: VaultId) -> Result<RateBreakdown, ProtocolError> {
        self.with_state(|state| {
            let vault = state
                .vault(vault_id)
                .ok_or(ProtocolError::VaultNotFound(vault_id))?;
            rate_breakdown(state, vault)
        })
        .await
    }

    pub async fn liquidatable(&self) -> Vec<LiquidationCandidate> {
        self.with_state(liquidation::liquidatable_vaults).await
    }

    pub async fn max_withdrawable(&self, vault_id: VaultId) -> Result<Amount, ProtocolError> {
        let now = self.clock.now();
        self.with_state(|state| ledger::max_withdrawable(state, vault_id, now))
            .await
    }

    /// Fee a borrow of `amount` would add to the debt
    pub async fn borrowing_fee(&self, amount: Amount) -> Amount {
        self.with_state(|state| ledger::borrowing_fee(state, amount))
            .await
    }

    /// Vault-tier redemption fee rate for redeeming `amount` now
    pub async fn redemption_fee_rate(&self, amount: Amount) -> Ratio {
        let now = self.clock.now();
        self.with_state(|state| redemption::redemption_fee_rate(state, amount, now))
            .await
    }

    pub async fn stable_quote(&self, unit: &AssetCode, amount: Amount) -> Result<StableQuote, ProtocolError> {
        let now = self.clock.now();
        self.with_state(|state| ledger::quote_stable_payment(state, unit, amount, now))
            .await
    }

    /// Repay amount a targeted liquidation would use, if the vault is in
    /// the targeted band
    pub async fn targeted_repay_amount(&self, vault_id: VaultId) -> Result<Option<Amount>, ProtocolError> {
        let now = self.clock.now();
        self.with_state(|state| liquidation::targeted_repay_amount(state, vault_id, now))
            .await
    }

    pub async fn pending_payouts(&self) -> Vec<PendingPayout> {
        self.with_state(|state| state.pending_payouts().cloned().collect())
            .await
    }

    pub async fn invariant_violations(&self) -> Vec<String> {
        self.with_state(|state| state.invariant_violations()).await
    }

    /// Committed records that touched `vault_id`, read back from the journal
    pub fn vault_history(&self, vault_id: VaultId) -> Result<Vec<EventRecord<Event>>, ProtocolError> {
        let reader = EventReader::from_directory(self.journal_path())?;
        Ok(reader
            .read_all::<Event>()?
            .into_iter()
            .filter(|r| r.event.vault_ids().contains(&vault_id))
            .collect())
    }

    /// Verify the journal's hash chain. Returns the number of records.
    pub fn audit(&self) -> Result<usize, ProtocolError> {
        let reader = EventReader::from_directory(self.journal_path())?;
        let records = reader.read_raw()?;
        verify_chain(&records).map_err(EventError::from)?;
        Ok(records.len())
    }
}
