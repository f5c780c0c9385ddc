//! Ballast Risk - the protocol's risk core
//!
//! All protocol state lives in one owned `ProtocolState`. Operations are
//! pure planners: they read the state, validate, and return the `Event`
//! that performs the change. The caller appends the event to the log and
//! folds it back with `ProtocolState::apply`, which is also how state is
//! rebuilt from the log on startup.

pub mod admin;
pub mod apply;
pub mod collateral;
pub mod config;
pub mod error;
pub mod event;
pub mod interest;
pub mod invariants;
pub mod ledger;
pub mod liquidation;
pub mod payout;
pub mod rates;
pub mod redemption;
pub mod state;
pub mod vault;

#[cfg(test)]
mod testing;

pub use collateral::{AssetConfig, AssetParams, StableUnit};
pub use config::{ConfigError, ProtocolConfig, StableRepaymentPolicy};
pub use error::{ErrorCategory, ProtocolError};
pub use event::{BorrowLeg, Event, InterestEntry, Payment, RedemptionLeg, VaultFill};
pub use interest::RateBreakdown;
pub use ledger::{OpenVault, StableQuote};
pub use liquidation::LiquidationCandidate;
pub use payout::{PayoutId, PayoutKind, PendingPayout};
pub use rates::{
    Interpolation, NamedThreshold, RateCurve, RateMarker, ThresholdCurve, ThresholdLevels,
    ThresholdMarker,
};
pub use redemption::RedeemRequest;
pub use state::{CachedAverages, Mode, ProtocolState, RedemptionFeeState, SystemStatus};
pub use vault::Vault;
