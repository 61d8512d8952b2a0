//! Settlement entities and outcome types

use chrono::{DateTime, Utc};
use ledger_core::{AccountId, Currency, Signature};
use rails::LegKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Settlement lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettlementStatus {
    /// Created, prepare not yet launched
    Pending,
    /// Legs prepared and/or committing
    InProgress,
    /// All three legs committed and verified
    Completed,
    /// Aborted before any leg committed
    Failed,
    /// Committed legs were compensated
    RolledBack,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::InProgress => "in-progress",
            SettlementStatus::Completed => "completed",
            SettlementStatus::Failed => "failed",
            SettlementStatus::RolledBack => "rolled-back",
        };
        write!(f, "{}", s)
    }
}

/// Settlement record. `invoice_id` is unique across all settlements,
/// which is what makes settlement exactly-once at the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub invoice_id: Uuid,
    /// Quote the acceptance bound
    pub quote_id: Uuid,
    pub supplier: AccountId,
    pub buyer: AccountId,
    pub provider: AccountId,
    /// Invoice face amount
    pub amount: Decimal,
    pub currency: Currency,
    /// Annualised rate from the quote
    pub discount_rate: Decimal,
    /// Exact buyer charge
    pub buyer_cost: Decimal,
    /// Rail the settlement stayed on
    pub rail: Option<String>,
    pub status: SettlementStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Settlement {
    /// Elapsed settlement time, if completed
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }
}

/// One leg row. Exactly one per kind per settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementLeg {
    pub settlement_id: Uuid,
    pub leg: LegKind,
    pub account: AccountId,
    /// Rail movement amount for this leg
    pub amount: Decimal,
    /// Rail transaction id once committed
    pub rail_txn_id: Option<String>,
}

/// Signed buyer acceptance binding a specific quote
#[derive(Debug, Clone)]
pub struct AcceptanceRequest {
    /// Quote being accepted
    pub quote_id: Uuid,
    /// Account that signed
    pub signer: AccountId,
    /// Ed25519 signature over `acceptance_message`
    pub signature: Signature,
}

/// Canonical bytes the buyer signs
pub fn acceptance_message(invoice_id: Uuid, quote_id: Uuid) -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(invoice_id.as_bytes());
    msg.extend_from_slice(quote_id.as_bytes());
    msg
}

/// Why an acceptance was refused before any money moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectKind {
    /// System frozen; intake refused
    Frozen,
    /// Invoice not in an acceptable state
    InvalidState,
    /// Another acceptance already holds or settled this invoice
    Conflict,
    /// Quote expired or unknown
    StaleQuote,
    /// Signature invalid or signer is not the buyer
    Unauthorized,
    /// Buyer credit limit would be exceeded
    CreditExceeded,
    /// Fraud gate held the invoice
    Fraud,
    /// Sanctions or KYC checkpoint failed
    Compliance,
    /// No healthy rail to settle on
    NoRail,
    /// A pre-barrier invariant failed
    PrecheckFailed,
}

/// Why a settlement failed after money started moving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// A rail refused or timed out during prepare
    PrepareRejected,
    /// A commit definitively failed; committed legs were compensated
    CommitFailed,
    /// The pre-commit compliance barrier failed after prepare
    Compliance,
    /// Post-checks found committed state inconsistent; system frozen
    Consistency,
}

/// Terminal answer from the coordinator
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    /// All legs committed and verified
    Completed(Settlement),
    /// Refused at the pre-barrier; no party's balance changed
    Rejected { kind: RejectKind, detail: String },
    /// Aborted mid-flight; compensations restored every balance
    Failed { kind: FailureKind, detail: String },
}

impl SettlementOutcome {
    /// Short label for decision records and metrics
    pub fn label(&self) -> String {
        match self {
            SettlementOutcome::Completed(_) => "completed".to_string(),
            SettlementOutcome::Rejected { kind, .. } => format!("rejected:{:?}", kind),
            SettlementOutcome::Failed { kind, .. } => format!("failed:{:?}", kind),
        }
    }
}
