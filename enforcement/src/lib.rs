//! # enforcement
//!
//! Non-bypassable invariant enforcement for the settlement pipeline.
//!
//! Guarded operations name the invariants they must pass; the engine
//! evaluates them in dependency order (the graph is validated acyclic at
//! startup), short-circuits on the first failure, and writes one signed,
//! hash-chained decision record per evaluation. Reconciliation failures
//! escalate to a process-wide freeze instead of returning to the caller.

pub mod context;
pub mod decision_ledger;
pub mod engine;
pub mod error;
pub mod freeze;
pub mod invariants;
pub mod types;

pub use context::CheckContext;
pub use decision_ledger::{DecisionLedger, DecisionRecord, RecordKind};
pub use engine::{Invariant, InvariantEngine};
pub use error::{Error, Result};
pub use freeze::{FreezeStatus, FreezeSwitch};
pub use invariants::{standard_registry, Thresholds};
pub use types::{CheckOutcome, Criticality, Decision, EnforcementAction, InvariantId, Phase};
