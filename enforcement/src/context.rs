//! Facts handed to invariant checks
//!
//! Callers assemble the facts relevant to the guarded operation; each
//! invariant reads the slice it cares about. A missing fact fails closed:
//! an invariant that cannot see its evidence does not pass.

use chrono::{DateTime, Utc};
use ledger_core::AccountId;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Everything an invariant may inspect. All sections optional; the
/// operation populates what it touches.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckContext {
    /// Evaluation instant
    pub now: Option<DateTime<Utc>>,

    /// Invoice under consideration
    pub invoice: Option<InvoiceFacts>,

    /// Parties to the operation
    pub parties: Option<PartyFacts>,

    /// Buyer credit position
    pub credit: Option<CreditFacts>,

    /// Pricing quote bound by the acceptance
    pub quote: Option<QuoteFacts>,

    /// Fraud score state
    pub fraud: Option<FraudFacts>,

    /// Rail health
    pub rails: Option<RailFacts>,

    /// Winning auction bid
    pub bid: Option<BidFacts>,

    /// Settlement rows and legs
    pub settlement: Option<SettlementFacts>,

    /// Journal reconciliation state
    pub ledger: Option<LedgerFacts>,

    /// Acceptance signature verification
    pub signature: Option<SignatureFacts>,

    /// FX rate state (multi-currency only)
    pub fx: Option<FxFacts>,
}

impl CheckContext {
    /// Context pinned at an evaluation instant
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Some(now),
            ..Default::default()
        }
    }

    /// Evaluation instant, defaulting to wall clock
    pub fn instant(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Compact JSON snapshot for decision records
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Invoice-level facts
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceFacts {
    pub invoice_id: Uuid,
    pub supplier: AccountId,
    pub buyer: AccountId,
    pub amount: Decimal,
    pub terms_days: u16,
    pub line_items_total: Decimal,
    /// Another invoice already carries this content hash
    pub hash_duplicate: bool,
}

/// Account status facts for every party touched
#[derive(Debug, Clone, Serialize)]
pub struct PartyFacts {
    /// (account, active) for each participant
    pub active: Vec<(AccountId, bool)>,
    /// (account, kyc verified) for each participant
    pub kyc_verified: Vec<(AccountId, bool)>,
    /// (account, on sanctions list) for each participant
    pub sanctioned: Vec<(AccountId, bool)>,
    /// Age of the sanctions snapshot used
    pub sanctions_snapshot_age_s: i64,
}

/// Buyer credit facts
#[derive(Debug, Clone, Serialize)]
pub struct CreditFacts {
    pub buyer: AccountId,
    pub outstanding: Decimal,
    pub limit: Decimal,
    pub requested: Decimal,
    /// Age of the cached limit at evaluation
    pub limit_age_s: i64,
}

/// Quote facts
#[derive(Debug, Clone, Serialize)]
pub struct QuoteFacts {
    pub quote_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub quoted_cost: Decimal,
    /// What the settlement will actually charge
    pub charged_cost: Decimal,
}

/// Fraud facts
#[derive(Debug, Clone, Serialize)]
pub struct FraudFacts {
    pub score: f64,
    pub computed_at: DateTime<Utc>,
    /// Timestamp pinned at acceptance; the pre-commit barrier must see
    /// the identical one
    pub pinned_at: Option<DateTime<Utc>>,
}

/// Rail facts
#[derive(Debug, Clone, Serialize)]
pub struct RailFacts {
    pub rail: String,
    pub up: bool,
    pub probe_age_s: i64,
}

/// Winning-bid facts
#[derive(Debug, Clone, Serialize)]
pub struct BidFacts {
    pub provider: AccountId,
    pub expires_at: DateTime<Utc>,
    pub capacity: Decimal,
    pub provider_liquidity: Decimal,
    pub invoice_amount: Decimal,
}

/// Settlement facts (post barrier)
#[derive(Debug, Clone, Serialize)]
pub struct SettlementFacts {
    pub invoice_id: Uuid,
    /// Settlement rows recorded for this invoice
    pub row_count: usize,
    /// Leg rows recorded
    pub leg_count: usize,
    /// Net balance effect across the three participants
    pub participant_net: Decimal,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Account statuses unchanged during the settlement window
    pub statuses_unchanged: bool,
}

/// Journal facts
#[derive(Debug, Clone, Serialize)]
pub struct LedgerFacts {
    pub total_credits: Decimal,
    pub total_debits: Decimal,
    pub imbalance: Decimal,
}

/// Acceptance signature facts
#[derive(Debug, Clone, Serialize)]
pub struct SignatureFacts {
    pub signer: AccountId,
    pub verified: bool,
}

/// FX facts
#[derive(Debug, Clone, Serialize)]
pub struct FxFacts {
    pub pair: String,
    pub rate_age_s: i64,
}
