//! Ballast Guard - per-caller, per-operation mutual exclusion
//!
//! Every mutating operation holds an `OperationGuard` keyed by
//! `(caller, operation)` for its whole duration, including any external
//! transfer it waits on. A second request with the same key is rejected
//! immediately. Guards release on drop; a background sweep removes entries
//! older than the timeout in case a holder never returns.

mod error;
mod table;

pub use error::GuardError;
pub use table::{spawn_sweeper, GuardKey, GuardTable, OperationGuard};
