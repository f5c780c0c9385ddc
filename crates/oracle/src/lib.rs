//! Ballast Price Oracle interface
//!
//! The core consumes `(asset, price, observed_at)` readings and reacts to
//! their age and level. Feed validation is the oracle service's job.
//! `MockOracle` serves tests and local runs.

mod error;
mod mock;
mod types;

pub use error::OracleError;
pub use mock::MockOracle;
pub use types::{PriceOracle, PriceReading};
