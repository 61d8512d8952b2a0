//! # rails
//!
//! Uniform prepare/commit/rollback/compensate/status/health contract
//! over payment rails, a circuit breaker per rail, and a priority
//! router. Transports are pluggable; a simulated rail with scripted
//! failure modes backs local runs and recovery tests.

pub mod adapter;
pub mod circuit_breaker;
pub mod error;
pub mod router;
pub mod simulated;
pub mod types;

pub use adapter::RailAdapter;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
pub use error::{Error, Result};
pub use router::RailRouter;
pub use simulated::{FailureMode, SimulatedRail};
pub use types::{
    CommitResult, LegKind, PrepareOutcome, PrepareToken, RailHealth, TerminalStatus,
};
