//! # ledger-core
//!
//! Append-only, hash-chained settlement journal.
//!
//! Every entry carries the previous entry's hash and an Ed25519 signature
//! over its own fields; a verifier walks the chain at startup and the
//! journal refuses to serve if any link is broken. Balances are derived
//! state: a fold over the entry stream, materialised in a cache that is
//! invalidated by sequence number. Nothing is ever mutated or deleted;
//! reversals are appended as correction entries.

pub mod actor;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod storage;
pub mod types;

pub use config::Config;
pub use crypto::KeyPair;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use storage::Storage;
pub use types::{
    AccountId, Currency, EntryDraft, EntryReason, EntryType, LedgerEntry, ReconcileReport,
    Signature,
};
