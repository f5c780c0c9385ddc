//! Ballast Events - append-only JSONL event log
//!
//! The event log is the Source of Truth: protocol state is a cache rebuilt by
//! folding the log in order. Records are versioned and hash-chained so the
//! log can evolve additively and be audited for tampering.
//!
//! This crate is generic over the event payload; the payload type itself is
//! owned by the crate that folds it.

pub mod error;
pub mod reader;
pub mod record;
pub mod store;

pub use error::EventError;
pub use reader::EventReader;
pub use record::{verify_chain, ChainError, EventRecord, GENESIS_HASH, SCHEMA_VERSION};
pub use store::EventStore;
