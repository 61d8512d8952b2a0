//! # fraud
//!
//! Fraud gate for the settlement pipeline. The score oracle is a
//! pluggable collaborator; the default implementation blends weighted
//! heuristic signals over submission history. The gate owns the
//! threshold and freshness policy, including the pinned-timestamp
//! re-check inside the settlement critical section.

pub mod error;
pub mod gate;
pub mod scorer;

pub use error::{Error, Result};
pub use gate::{FraudGate, GateDecision};
pub use scorer::{FixedOracle, FraudScore, ScoreOracle, SignalScore, SignalScorer};
