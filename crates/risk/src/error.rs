//! Protocol errors
//!
//! Every rejected operation returns a `ProtocolError`; `category()` tells
//! callers which class of failure it was.

use ballast_core::{Amount, AmountError, AssetCode, Price, Principal, Ratio, VaultId};
use ballast_events::EventError;
use ballast_guard::GuardError;
use ballast_oracle::OracleError;
use ballast_transfer::TransferError;
use strum_macros::Display;
use thiserror::Error;

/// Coarse class of a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad input or a business rule said no
    Validation,
    /// Same operation already in flight
    Concurrency,
    /// An external service failed
    Collaborator,
    /// Internal state is inconsistent
    Invariant,
    /// Price or protocol mode forbids the operation
    OracleMode,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    // === Validation ===
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Amount must be positive")]
    ZeroAmount,

    #[error("Amount {amount} below minimum {minimum}")]
    AmountTooSmall { amount: Amount, minimum: Amount },

    #[error("Vault not found: {0}")]
    VaultNotFound(VaultId),

    #[error("Caller {caller} does not own vault {vault_id}")]
    NotVaultOwner { vault_id: VaultId, caller: Principal },

    #[error("Unauthorized: {0} is not the operator")]
    Unauthorized(Principal),

    #[error("Asset not configured: {0}")]
    AssetNotConfigured(AssetCode),

    #[error("Asset disabled: {0}")]
    AssetDisabled(AssetCode),

    #[error("Stable unit not configured: {0}")]
    StableUnitNotConfigured(AssetCode),

    #[error("Collateral ratio {ratio} would fall below borrow threshold {threshold}")]
    BelowBorrowThreshold { ratio: Ratio, threshold: Ratio },

    #[error("Withdrawal of {requested} exceeds maximum {maximum}")]
    WithdrawExceedsLimit { requested: Amount, maximum: Amount },

    #[error("Repayment {requested} exceeds outstanding debt {debt}")]
    RepayExceedsDebt { requested: Amount, debt: Amount },

    #[error("Vault {vault_id} still owes {debt}")]
    DebtOutstanding { vault_id: VaultId, debt: Amount },

    #[error("Vault {vault_id} not liquidatable: ratio {ratio}, threshold {threshold}")]
    NotLiquidatable {
        vault_id: VaultId,
        ratio: Ratio,
        threshold: Ratio,
    },

    #[error("Partial liquidation of {requested} exceeds maximum {maximum}")]
    PartialExceedsFraction { requested: Amount, maximum: Amount },

    #[error("Seizing {seized} would exhaust collateral {collateral} while debt remains")]
    WouldExhaustCollateral { seized: Amount, collateral: Amount },

    #[error("Cannot redeem {requested}: only {available} redeemable")]
    InsufficientRedeemable { requested: Amount, available: Amount },

    #[error("Invalid rate curve: {0}")]
    InvalidCurve(String),

    #[error("Invalid asset parameters: {0}")]
    InvalidParameters(String),

    #[error("Quote changed while paying: quoted {quoted}, now {current}")]
    QuoteChanged { quoted: Amount, current: Amount },

    #[error("Price reading for {asset} at {observed_at} is older than the stored one")]
    OutdatedReading {
        asset: AssetCode,
        observed_at: chrono::DateTime<chrono::Utc>,
    },

    // === Concurrency ===
    #[error("Guard error: {0}")]
    Guard(#[from] GuardError),

    // === Collaborator ===
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Event log error: {0}")]
    Persistence(#[from] EventError),

    // === Invariant ===
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // === Oracle / mode ===
    #[error("Protocol is in read-only mode")]
    ReadOnlyMode,

    #[error("No price recorded for {0}")]
    NoPrice(AssetCode),

    #[error("Stale price for {asset}: {age_secs}s old, max {max_age_secs}s")]
    StalePrice {
        asset: AssetCode,
        age_secs: u64,
        max_age_secs: u64,
    },

    #[error("Stable unit {unit} off parity at {price}")]
    StableOffParity { unit: AssetCode, price: Price },
}

impl ProtocolError {
    pub fn category(&self) -> ErrorCategory {
        use ProtocolError::*;
        match self {
            InvalidAmount(_)
            | ZeroAmount
            | AmountTooSmall { .. }
            | VaultNotFound(_)
            | NotVaultOwner { .. }
            | Unauthorized(_)
            | AssetNotConfigured(_)
            | AssetDisabled(_)
            | StableUnitNotConfigured(_)
            | BelowBorrowThreshold { .. }
            | WithdrawExceedsLimit { .. }
            | RepayExceedsDebt { .. }
            | DebtOutstanding { .. }
            | NotLiquidatable { .. }
            | PartialExceedsFraction { .. }
            | WouldExhaustCollateral { .. }
            | InsufficientRedeemable { .. }
            | InvalidCurve(_)
            | InvalidParameters(_)
            | QuoteChanged { .. }
            | OutdatedReading { .. } => ErrorCategory::Validation,
            Guard(_) => ErrorCategory::Concurrency,
            Transfer(_) | Oracle(_) | Persistence(_) => ErrorCategory::Collaborator,
            InvariantViolation(_) => ErrorCategory::Invariant,
            ReadOnlyMode | NoPrice(_) | StalePrice { .. } | StableOffParity { .. } => {
                ErrorCategory::OracleMode
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            ProtocolError::VaultNotFound(1).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            ProtocolError::Guard(GuardError::CapacityExceeded { cap: 1 }).category(),
            ErrorCategory::Concurrency
        );
        assert_eq!(
            ProtocolError::Transfer(TransferError::Unavailable("x".into())).category(),
            ErrorCategory::Collaborator
        );
        assert_eq!(
            ProtocolError::InvariantViolation("x".into()).category(),
            ErrorCategory::Invariant
        );
        assert_eq!(ProtocolError::ReadOnlyMode.category(), ErrorCategory::OracleMode);
        assert_eq!(ErrorCategory::OracleMode.to_string(), "oracle_mode");
    }
}
