//! Ballast RPC - service orchestrator
//!
//! Owns the protocol state and the journal, serializes commits, guards
//! concurrent operations and moves tokens through the external ledger and
//! fee collector. Also provides the CLI binary and its commands.

pub mod commands;
pub mod context;
mod keeper;
mod operator;
mod queries;
mod vaults;

pub use context::{AppContext, Collaborators, CommitError, Receipt};
