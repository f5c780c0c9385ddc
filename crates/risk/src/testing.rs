//! Test fixtures: a state driven through real events

use ballast_core::{Amount, AssetCode, Price, Principal, Ratio, VaultId};
use ballast_events::{EventRecord, GENESIS_HASH};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::collateral::AssetParams;
use crate::config::ProtocolConfig;
use crate::event::Event;
use crate::ledger::{self, OpenVault};
use crate::state::ProtocolState;

pub(crate) struct Harness {
    pub state: ProtocolState,
    pub now: DateTime<Utc>,
    pub records: Vec<EventRecord<Event>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ProtocolConfig::default())
    }

    pub fn with_config(config: ProtocolConfig) -> Self {
        Self {
            state: ProtocolState::new(config),
            now: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
            records: Vec::new(),
        }
    }

    pub fn commit(&mut self, event: Event) {
        let prev = self
            .state
            .last_hash()
            .unwrap_or(GENESIS_HASH)
            .to_string();
        let record =
            EventRecord::seal(self.state.last_sequence() + 1, self.now, prev, event).unwrap();
        self.state.apply(&record).unwrap();
        self.records.push(record);
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn operator(&self) -> Principal {
        self.state.config().operator.clone()
    }

    pub fn configure(&mut self, asset: &AssetCode, price: Decimal) {
        self.commit(Event::AssetConfigured {
            asset: asset.clone(),
            params: params(),
        });
        self.set_price(asset, price);
    }

    pub fn set_price(&mut self, asset: &AssetCode, price: Decimal) {
        self.commit(Event::PriceUpdated {
            asset: asset.clone(),
            price: Price::new(price).unwrap(),
            observed_at: self.now,
        });
    }

    pub fn stable(&mut self, unit: &AssetCode, price: Decimal) {
        self.commit(Event::StableUnitConfigured {
            unit: unit.clone(),
            enabled: true,
        });
        self.set_price(unit, price);
    }

    /// Open a vault and borrow in one event
    pub fn open(&mut self, owner: &str, asset: &AssetCode, collateral: Decimal, borrow: Option<Decimal>) -> VaultId {
        let event = ledger::plan_open_vault(
            &self.state,
            &OpenVault {
                owner: principal(owner),
                asset: asset.clone(),
                collateral: amount(collateral),
                borrow: borrow.map(amount),
            },
            self.now,
        )
        .unwrap();
        let id = match &event {
            Event::VaultOpened { vault_id, .. } => *vault_id,
            other => panic!("unexpected {:?}", other),
        };
        self.commit(event);
        id
    }

    /// Open a vault holding exactly `debt` (no borrowing fee)
    pub fn open_with_debt(&mut self, owner: &str, asset: &AssetCode, collateral: Decimal, debt: Decimal) -> VaultId {
        let id = self.open(owner, asset, collateral, None);
        let leg = crate::event::BorrowLeg {
            amount: amount(debt),
            fee: Amount::ZERO,
            mint: crate::payout::PendingPayout {
                id: self.state.next_payout_id,
                asset: self.state.config().debt_token.clone(),
                amount: amount(debt),
                kind: crate::payout::PayoutKind::Mint { to: principal(owner) },
                created_at: self.now,
            },
            fee_credit: None,
        };
        self.commit(Event::Borrowed {
            vault_id: id,
            leg,
            borrowed_at: self.now,
        });
        id
    }
}

pub(crate) fn params() -> AssetParams {
    AssetParams {
        liquidation_ratio: ratio(dec!(1.33)),
        borrow_threshold: ratio(dec!(1.5)),
        liquidation_bonus: ratio(dec!(0.1)),
        base_rate: ratio(dec!(0.05)),
        recovery_target_ratio: ratio(dec!(1.55)),
        decimals: 8,
        price_floor: dec!(0.01),
    }
}

pub(crate) fn asset(code: &str) -> AssetCode {
    code.parse().unwrap()
}

pub(crate) fn principal(id: &str) -> Principal {
    Principal::new(id).unwrap()
}

pub(crate) fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

pub(crate) fn ratio(value: Decimal) -> Ratio {
    Ratio::new(value).unwrap()
}
