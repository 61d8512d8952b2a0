//! Shared rail types

use chrono::{DateTime, Utc};
use ledger_core::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One of the three transfers composing a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LegKind {
    /// Pay the supplier the face amount
    CreditSupplier,
    /// Charge the buyer the quoted total cost
    DebitBuyer,
    /// Register the provider's working-capital advance
    AdvanceCapital,
}

impl LegKind {
    /// All three legs in canonical order
    pub fn all() -> [LegKind; 3] {
        [
            LegKind::CreditSupplier,
            LegKind::DebitBuyer,
            LegKind::AdvanceCapital,
        ]
    }
}

impl fmt::Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LegKind::CreditSupplier => "credit-supplier",
            LegKind::DebitBuyer => "debit-buyer",
            LegKind::AdvanceCapital => "advance-capital",
        };
        write!(f, "{}", s)
    }
}

/// Reservation handed back by a successful prepare
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareToken {
    /// Issuing rail
    pub rail: String,
    /// Idempotency key for every call on this settlement
    pub settlement_id: Uuid,
    /// Which leg the reservation covers
    pub leg: LegKind,
    /// Account the leg touches
    pub account: AccountId,
    /// Reserved amount
    pub amount: Decimal,
}

/// Outcome of a prepare call
#[derive(Debug, Clone)]
pub enum PrepareOutcome {
    /// Reservation taken
    Prepared(PrepareToken),
    /// Rail refused (insufficient funds, policy, etc.)
    Rejected { reason: String },
}

/// Outcome of a commit call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// Funds moved; rail transaction id attached
    Committed { txn_id: String },
    /// Rail could not say; resolve via the status endpoint
    Indeterminate,
    /// Definite failure; compensation required if peers committed
    Failed { reason: String },
}

/// Terminal answer from the status endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    /// The leg committed
    Committed { txn_id: String },
    /// The leg was rolled back (or never prepared)
    RolledBack,
    /// The rail still cannot say
    Unknown,
}

/// Health probe result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailHealth {
    /// Rail name
    pub rail: String,
    /// Accepting traffic
    pub up: bool,
    /// Observed latency
    pub latency_ms: u64,
    /// When the probe ran
    pub checked_at: DateTime<Utc>,
}

impl RailHealth {
    /// Probe age in seconds at `now`
    pub fn age_s(&self, now: DateTime<Utc>) -> i64 {
        (now - self.checked_at).num_seconds()
    }
}
