//! Ballast Core - Numeric and identity types
//!
//! Every layer above depends on these types:
//! - `Amount`: Non-negative token quantity with fixed 8-decimal rounding
//! - `Ratio`: Dimensionless multiplier (collateral ratios, fees, curve multipliers)
//! - `Price`: Strictly positive USD price of one unit of an asset
//! - `AssetCode`, `Principal`: validated identifiers
//! - `Clock`: injected time source

pub mod amount;
pub mod asset;
pub mod clock;
pub mod ratio;

pub use amount::{Amount, AmountError, AMOUNT_SCALE};
pub use asset::{AssetCode, AssetError, Principal};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ratio::{Price, Ratio};

/// Vault identifier, allocated sequentially from 1
pub type VaultId = u64;
