//! Application context - wires everything together
//!
//! The context owns the only `ProtocolState` and the event store behind one
//! async mutex. Every state change goes through `commit`:
//!
//! Plan → Seal → Apply → Append
//!
//! The record is folded into the live state before it is written, so a
//! record the fold would refuse never reaches the log. When the fold or the
//! append fails the state is rebuilt from the log; if even that fails, no
//! further commits are accepted until restart.

use ballast_core::{Amount, AssetCode, Clock, Principal, SystemClock, VaultId};
use ballast_events::{verify_chain, EventError, EventReader, EventRecord, EventStore, GENESIS_HASH};
use ballast_guard::{spawn_sweeper, GuardKey, GuardTable, OperationGuard};
use ballast_oracle::{MockOracle, PriceOracle};
use ballast_risk::{Event, PayoutId, PayoutKind, PendingPayout, ProtocolConfig, ProtocolError, ProtocolState};
use ballast_transfer::{
    FeeCollector, InMemoryFeeCollector, InMemoryTokenLedger, RetryPolicy, TokenLedger, TransferError,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// External services the core talks to
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn PriceOracle>,
    pub ledger: Arc<dyn TokenLedger>,
    pub fees: Arc<dyn FeeCollector>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// In-memory services on the wall clock, for local runs and the CLI
    pub fn in_memory() -> Self {
        Self {
            oracle: Arc::new(MockOracle::new()),
            ledger: Arc::new(InMemoryTokenLedger::new()),
            fees: Arc::new(InMemoryFeeCollector::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Outcome of a committed operation
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub sequence: u64,
    pub event: Event,
    /// Payouts still owed after their retries ran out
    pub unsettled: Vec<PayoutId>,
}

impl Receipt {
    pub(crate) fn new(record: EventRecord<Event>) -> Self {
        Self {
            sequence: record.sequence,
            event: record.event,
            unsettled: Vec::new(),
        }
    }

    /// First vault the event touched
    pub fn vault_id(&self) -> Option<VaultId> {
        self.event.vault_ids().first().copied()
    }
}

/// Verify the journal under `dir` and fold it into a fresh state
fn load_state(dir: &Path, config: ProtocolConfig) -> Result<(ProtocolState, usize), CommitError> {
    // The raw chain is checked first: typed decoding turns unknown
    // events into `Unknown`, which no longer hashes like the original.
    let reader = EventReader::from_directory(dir)?;
    verify_chain(&reader.read_raw()?).map_err(EventError::from)?;

    let records = reader.read_all::<Event>()?;
    let state = ProtocolState::replay(config, records.iter())?;
    state.check_invariants()?;
    Ok((state, records.len()))
}

/// State and log, always changed together
struct Core {
    state: ProtocolState,
    store: EventStore,
    /// The state may hold a record the log does not
    diverged: bool,
}

impl Core {
    /// Seal `event` as the next record, fold it, append it
    fn commit(&mut self, event: Event, now: DateTime<Utc>) -> Result<EventRecord<Event>, CommitError> {
        if self.diverged {
            return Err(CommitError::Diverged);
        }
        let sequence = self.state.last_sequence() + 1;
        let prev_hash = self
            .state
            .last_hash()
            .unwrap_or(GENESIS_HASH)
            .to_string();

        let record = EventRecord::seal(sequence, now, prev_hash, event)?;

        let written = self
            .state
            .apply(&record)
            .map_err(CommitError::from)
            .and_then(|()| self.store.append(&record).map_err(CommitError::from));
        if let Err(e) = written {
            self.restore();
            return Err(e);
        }

        info!(sequence, event = record.event.name(), "event committed");
        Ok(record)
    }

    /// Throw the live state away and fold the log again
    fn restore(&mut self) {
        let config = self.state.config().clone();
        match load_state(self.store.dir(), config) {
            Ok((state, _)) => {
                warn!(last_sequence = state.last_sequence(), "state restored from journal");
                self.state = state;
            }
            Err(e) => {
                error!(error = %e, "state could not be restored from journal, commits refused until restart");
                self.diverged = true;
            }
        }
    }
}

/// Application context - wires together all components
pub struct AppContext {
    core: Mutex<Core>,
    guards: Arc<GuardTable>,
    pub(crate) oracle: Arc<dyn PriceOracle>,
    ledger: Arc<dyn TokenLedger>,
    fees: Arc<dyn FeeCollector>,
    pub(crate) clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    debt_token: AssetCode,
    in_flight: StdMutex<HashSet<PayoutId>>,
    journal_path: PathBuf,
    sweeper: JoinHandle<()>,
}

impl AppContext {
    /// Open the journal under `data_path`, verify it and rebuild state
    pub async fn new(
        data_path: impl AsRef<Path>,
        config: ProtocolConfig,
        services: Collaborators,
    ) -> Result<Self, anyhow::Error> {
        config.validate()?;

        let journal_path = data_path.as_ref().join("journal");
        std::fs::create_dir_all(&journal_path)?;

        let (state, events) = load_state(&journal_path, config.clone())?;

        info!(
            events,
            last_sequence = state.last_sequence(),
            mode = %state.mode(),
            pending_payouts = state.pending_payouts().count(),
            "state rebuilt from journal"
        );

        let store = EventStore::new(&journal_path)?;
        let guards = Arc::new(GuardTable::new(
            config.guard_timeout_secs,
            config.guard_cap,
            services.clock.clone(),
        ));
        let sweeper = spawn_sweeper(
            guards.clone(),
            std::time::Duration::from_secs(config.guard_sweep_interval_secs.max(1)),
        );

        Ok(Self {
            core: Mutex::new(Core {
                state,
                store,
                diverged: false,
            }),
            guards,
            oracle: services.oracle,
            ledger: services.ledger,
            fees: services.fees,
            clock: services.clock,
            retry: config.retry.clone(),
            debt_token: config.debt_token.clone(),
            in_flight: StdMutex::new(HashSet::new()),
            journal_path,
            sweeper,
        })
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn debt_token(&self) -> &AssetCode {
        &self.debt_token
    }

    pub fn guards(&self) -> &Arc<GuardTable> {
        &self.guards
    }

    /// Read the state under the lock
    pub async fn with_state<T>(&self, f: impl FnOnce(&ProtocolState) -> T) -> T {
        let core = self.core.lock().await;
        f(&core.state)
    }

    /// Hold the guard for `operation` by `caller` until the returned value drops
    pub(crate) fn guard(&self, caller: &Principal, operation: &str) -> Result<OperationGuard, ProtocolError> {
        self.guards
            .acquire(GuardKey::new(caller.clone(), operation))
            .map_err(|e| rejected(operation, e.into()))
    }

    /// Run a planner against the current state without committing
    pub(crate) async fn inspect<T>(
        &self,
        operation: &str,
        plan: impl FnOnce(&ProtocolState, DateTime<Utc>) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let core = self.core.lock().await;
        plan(&core.state, self.clock.now()).map_err(|e| rejected(operation, e))
    }

    /// Plan against the current state and commit the result
    pub(crate) async fn plan_and_commit(
        &self,
        operation: &str,
        plan: impl FnOnce(&ProtocolState, DateTime<Utc>) -> Result<Event, ProtocolError>,
    ) -> Result<EventRecord<Event>, ProtocolError> {
        let mut core = self.core.lock().await;
        let now = self.clock.now();
        let event = plan(&core.state, now).map_err(|e| rejected(operation, e))?;
        core.commit(event, now).map_err(|e| rejected(operation, e.into()))
    }

    /// Like `plan_and_commit` for planners that may have nothing to do
    pub(crate) async fn maybe_commit(
        &self,
        operation: &str,
        plan: impl FnOnce(&ProtocolState, DateTime<Utc>) -> Result<Option<Event>, ProtocolError>,
    ) -> Result<Option<EventRecord<Event>>, ProtocolError> {
        let mut core = self.core.lock().await;
        let now = self.clock.now();
        match plan(&core.state, now).map_err(|e| rejected(operation, e))? {
            Some(event) => core
                .commit(event, now)
                .map(Some)
                .map_err(|e| rejected(operation, e.into())),
            None => Ok(None),
        }
    }

    // === Token movement ===

    /// Take `amount` of `asset` from `payer` into custody; debt tokens are burned
    pub(crate) async fn pull(
        &self,
        payer: &Principal,
        asset: &AssetCode,
        amount: Amount,
    ) -> Result<(), ProtocolError> {
        if amount.is_zero() {
            return Ok(());
        }
        let result = if *asset == self.debt_token {
            self.ledger.burn(asset, payer, amount).await
        } else {
            self.ledger.transfer_from(asset, payer, amount).await
        };
        result.map_err(|e| {
            debug!(payer = %payer, asset = %asset, amount = %amount, error = %e, "pull failed");
            ProtocolError::Transfer(e)
        })
    }

    /// Undo a `pull` whose operation did not commit
    pub(crate) async fn give_back(&self, payer: &Principal, asset: &AssetCode, amount: Amount) {
        if amount.is_zero() {
            return;
        }
        let label = format!("refund {} {} to {}", amount, asset, payer);
        let ledger = &self.ledger;
        let mint = *asset == self.debt_token;
        let result = self
            .retry
            .run(&label, move || async move {
                if mint {
                    ledger.mint(asset, payer, amount).await
                } else {
                    ledger.transfer_to(asset, payer, amount).await
                }
            })
            .await;
        if let Err(e) = result {
            error!(payer = %payer, asset = %asset, amount = %amount, error = %e, "refund failed, manual follow-up required");
        }
    }

    /// Burn debt tokens the protocol holds, for stable repayments under
    /// `BurnFromProtocol`
    pub(crate) async fn burn_from_protocol(&self, amount: Amount) {
        if amount.is_zero() {
            return;
        }
        let protocol = Principal::new_unchecked(ballast_transfer::PROTOCOL_ACCOUNT);
        let label = format!("burn {} {} from protocol", amount, self.debt_token);
        let (ledger, asset, account) = (&self.ledger, &self.debt_token, &protocol);
        let result = self
            .retry
            .run(&label, move || ledger.burn(asset, account, amount))
            .await;
        if let Err(e) = result {
            error!(amount = %amount, error = %e, "protocol burn failed, manual follow-up required");
        }
    }

    // === Payouts ===

    async fn execute(&self, payout: &PendingPayout) -> Result<(), TransferError> {
        if payout.amount.is_zero() {
            return Ok(());
        }
        match &payout.kind {
            PayoutKind::Transfer { to } => self.ledger.transfer_to(&payout.asset, to, payout.amount).await,
            PayoutKind::Mint { to } => self.ledger.mint(&payout.asset, to, payout.amount).await,
            PayoutKind::FeeCredit { kind } => self.fees.credit(*kind, &payout.asset, payout.amount).await,
        }
    }

    fn claim(&self, id: PayoutId) -> Option<PayoutClaim<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(id) {
            return None;
        }
        Some(PayoutClaim {
            in_flight: &self.in_flight,
            id,
        })
    }

    /// Deliver one payout with the configured backoff and record it as
    /// completed
    ///
    /// A payout that is already being delivered, or no longer pending, is
    /// left alone. When the retries run out the payout stays pending and
    /// the last error is returned.
    pub(crate) async fn deliver(&self, payout: &PendingPayout) -> Result<(), TransferError> {
        self.deliver_with(payout, &self.retry).await
    }

    /// Deliver one payout in a single attempt. For payouts whose failure
    /// is undone by reverting the operation rather than retried.
    pub(crate) async fn deliver_once(&self, payout: &PendingPayout) -> Result<(), TransferError> {
        self.deliver_with(payout, &RetryPolicy::none()).await
    }

    async fn deliver_with(&self, payout: &PendingPayout, retry: &RetryPolicy) -> Result<(), TransferError> {
        let Some(_claim) = self.claim(payout.id) else {
            debug!(payout = %payout, "payout already in flight");
            return Ok(());
        };
        let pending = self
            .with_state(|state| state.pending_payout(payout.id).is_some())
            .await;
        if !pending {
            return Ok(());
        }

        let label = payout.to_string();
        retry.run(&label, move || self.execute(payout)).await?;

        let payout_id = payout.id;
        let recorded = self
            .plan_and_commit("complete_payout", |_, _| Ok(Event::PayoutCompleted { payout_id }))
            .await;
        if let Err(e) = recorded {
            error!(payout = %payout, error = %e, "payout delivered but not recorded, manual follow-up required");
        }
        Ok(())
    }

    /// Deliver each payout in turn; returns the ids left pending
    pub(crate) async fn settle<'a>(
        &self,
        payouts: impl IntoIterator<Item = &'a PendingPayout>,
    ) -> Vec<PayoutId> {
        let mut unsettled = Vec::new();
        for payout in payouts {
            if let Err(e) = self.deliver(payout).await {
                error!(payout = %payout, error = %e, "payout failed, manual follow-up required");
                unsettled.push(payout.id);
            }
        }
        unsettled
    }

    /// Settle everything `record` scheduled and wrap it up as a receipt
    pub(crate) async fn finish(&self, record: EventRecord<Event>) -> Receipt {
        let mut receipt = Receipt::new(record);
        let unsettled = self.settle(receipt.event.scheduled_payouts()).await;
        receipt.unsettled = unsettled;
        receipt
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Marks a payout as being delivered until dropped
struct PayoutClaim<'a> {
    in_flight: &'a StdMutex<HashSet<PayoutId>>,
    id: PayoutId,
}

impl Drop for PayoutClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

fn rejected(operation: &str, error: ProtocolError) -> ProtocolError {
    debug!(operation, category = %error.category(), error = %error, "operation rejected");
    error
}

/// Errors during commit
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Event store error: {0}")]
    Event(#[from] EventError),

    #[error("Could not seal record: {0}")]
    Seal(#[from] serde_json::Error),

    #[error("State no longer matches the journal; restart required")]
    Diverged,
}

impl From<CommitError> for ProtocolError {
    fn from(error: CommitError) -> Self {
        match error {
            CommitError::Protocol(e) => e,
            CommitError::Event(e) => ProtocolError::Persistence(e),
            CommitError::Seal(e) => ProtocolError::Persistence(EventError::Serialization(e)),
            diverged @ CommitError::Diverged => ProtocolError::InvariantViolation(diverged.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::Ratio;
    use ballast_risk::{AssetParams, InterestEntry};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn eth() -> AssetCode {
        "ETH".parse().unwrap()
    }

    fn params() -> AssetParams {
        AssetParams {
            liquidation_ratio: Ratio::new(dec!(1.33)).unwrap(),
            borrow_threshold: Ratio::new(dec!(1.5)).unwrap(),
            liquidation_bonus: Ratio::new(dec!(0.1)).unwrap(),
            base_rate: Ratio::new(dec!(0.05)).unwrap(),
            recovery_target_ratio: Ratio::new(dec!(1.55)).unwrap(),
            decimals: 8,
            price_floor: dec!(0.01),
        }
    }

    fn accrual(vault_ids: &[VaultId], now: DateTime<Utc>) -> Event {
        let entries: Vec<InterestEntry> = vault_ids
            .iter()
            .map(|vault_id| InterestEntry {
                vault_id: *vault_id,
                rate: Ratio::new(dec!(0.05)).unwrap(),
                interest: Amount::from_units(1),
            })
            .collect();
        Event::InterestAccrued {
            accrued_at: now,
            total: Amount::from_units(entries.len() as u64),
            entries,
            fee_credit: None,
        }
    }

    #[tokio::test]
    async fn test_refused_fold_leaves_state_as_logged() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::new(dir.path(), ProtocolConfig::default(), Collaborators::in_memory())
            .await
            .unwrap();
        let now = Utc::now();

        let mut core = ctx.core.lock().await;
        core.commit(
            Event::AssetConfigured {
                asset: eth(),
                params: params(),
            },
            now,
        )
        .unwrap();
        core.commit(
            Event::VaultOpened {
                vault_id: 1,
                owner: Principal::new("alice").unwrap(),
                asset: eth(),
                collateral: Amount::from_units(10),
                opened_at: now,
                borrow: None,
            },
            now,
        )
        .unwrap();

        // The first entry folds, the second names a vault that does not exist
        let err = core.commit(accrual(&[1, 99], now), now).unwrap_err();
        assert!(matches!(err, CommitError::Protocol(_)));
        assert!(!core.diverged);
        assert_eq!(core.state.last_sequence(), 2);
        assert_eq!(core.state.vault(1).unwrap().debt, Amount::ZERO);

        let record = core.commit(accrual(&[1], now), now).unwrap();
        assert_eq!(record.sequence, 3);
        assert_eq!(core.state.vault(1).unwrap().debt, Amount::from_units(1));
    }

    #[tokio::test]
    async fn test_diverged_core_refuses_commits() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::new(dir.path(), ProtocolConfig::default(), Collaborators::in_memory())
            .await
            .unwrap();

        let mut core = ctx.core.lock().await;
        core.diverged = true;
        let err = core
            .commit(Event::StableFeeSet { fee: Ratio::ZERO }, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CommitError::Diverged));
        assert_eq!(core.state.last_sequence(), 0);
    }
}
