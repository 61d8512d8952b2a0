//! Core enforcement types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable invariant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InvariantId(pub &'static str);

impl fmt::Display for InvariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How badly a failure hurts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    /// Violation corrupts money or compliance posture
    Critical,
    /// Violation degrades the product but is recoverable
    Important,
}

/// Which side of the guarded action the check runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Before the action (admission barrier)
    Pre,
    /// After the action (verification barrier)
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => write!(f, "pre"),
            Phase::Post => write!(f, "post"),
        }
    }
}

/// Outcome of a single invariant evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Invariant holds
    Pass,
    /// Invariant violated
    Fail { reason: String },
}

impl CheckOutcome {
    /// Convenience constructor for failures
    pub fn fail(reason: impl Into<String>) -> Self {
        CheckOutcome::Fail {
            reason: reason.into(),
        }
    }

    /// True if the invariant held
    pub fn passed(&self) -> bool {
        matches!(self, CheckOutcome::Pass)
    }
}

/// What the engine instructs the caller to do on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnforcementAction {
    /// All checks passed; the operation may continue
    Proceed,
    /// Undo the operation (or refuse it pre-action)
    Rollback,
    /// Halt the system; money-level integrity is in doubt
    Freeze,
}

/// Engine verdict for one phase run
#[derive(Debug, Clone)]
pub struct Decision {
    /// Instructed action
    pub action: EnforcementAction,

    /// The invariant that failed, if any
    pub failed: Option<InvariantId>,

    /// Human-readable failure reason, if any
    pub reason: Option<String>,
}

impl Decision {
    /// All checks passed
    pub fn proceed() -> Self {
        Self {
            action: EnforcementAction::Proceed,
            failed: None,
            reason: None,
        }
    }

    /// True if the operation may continue
    pub fn is_proceed(&self) -> bool {
        self.action == EnforcementAction::Proceed
    }
}
