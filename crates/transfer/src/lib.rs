//! Ballast Transfer - external token movement
//!
//! The core never moves tokens itself. It asks a `TokenLedger` to pull,
//! push, mint or burn, and a `FeeCollector` to credit fees. Both are
//! external services; the in-memory implementations here back tests and
//! local runs, with failure injection for exercising refund and retry paths.

mod error;
mod fees;
mod ledger;
mod retry;

pub use error::TransferError;
pub use fees::{FeeCollector, FeeCredit, FeeKind, InMemoryFeeCollector};
pub use ledger::{InMemoryTokenLedger, TokenLedger, PROTOCOL_ACCOUNT};
pub use retry::RetryPolicy;
