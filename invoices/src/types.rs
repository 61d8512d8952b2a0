//! Invoice entities

use chrono::{DateTime, Utc};
use ledger_core::{AccountId, Currency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvoiceStatus {
    /// Submitted, awaiting acceptance
    Pending,
    /// Held for manual fraud review
    FraudReview,
    /// Buyer accepted; settlement underway
    Accepted,
    /// Settlement completed (terminal)
    Settled,
    /// Settlement failed after compensation
    Failed,
    /// Rejected (terminal)
    Rejected,
    /// Aged out before acceptance (terminal)
    Expired,
}

impl InvoiceStatus {
    /// Terminal states are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Settled | InvoiceStatus::Rejected | InvoiceStatus::Expired
        )
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::FraudReview => "fraud-review",
            InvoiceStatus::Accepted => "accepted",
            InvoiceStatus::Settled => "settled",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Rejected => "rejected",
            InvoiceStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// One invoice line. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    /// What was supplied
    pub description: String,
    /// Unit count (> 0)
    pub quantity: u32,
    /// Price per unit (> 0)
    pub unit_price: Decimal,
}

impl LineItem {
    /// Derived line amount
    pub fn amount(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// What a supplier submits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub supplier: AccountId,
    pub buyer: AccountId,
    pub currency: Currency,
    pub terms_days: u16,
    pub line_items: Vec<LineItem>,
    pub purchase_order_id: Option<String>,
    pub notes: Option<String>,
}

/// Stored invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Globally unique id
    pub id: Uuid,
    pub supplier: AccountId,
    pub buyer: AccountId,
    /// Total amount (sum of line items)
    pub amount: Decimal,
    pub currency: Currency,
    /// Payment terms in days
    pub terms_days: u16,
    pub line_items: Vec<LineItem>,
    /// SHA-256 over (supplier, buyer, amount, currency, line amounts)
    pub content_hash: [u8; 32],
    pub status: InvoiceStatus,
    /// Latest fraud score, if computed
    pub fraud_score: Option<f64>,
    /// When the fraud score was computed
    pub fraud_scored_at: Option<DateTime<Utc>>,
    pub purchase_order_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// Sum of line-item amounts
    pub fn line_items_total(&self) -> Decimal {
        self.line_items.iter().map(|li| li.amount()).sum()
    }

    /// Short hex prefix of the content hash, for logs
    pub fn hash_prefix(&self) -> String {
        self.content_hash[..8]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Compute the content hash for a draft
pub fn content_hash(draft: &InvoiceDraft, amount: Decimal) -> [u8; 32] {
    let line_amounts: Vec<String> = draft
        .line_items
        .iter()
        .map(|li| li.amount().to_string())
        .collect();

    let preimage = format!(
        "{}:{}:{}:{}:{}",
        draft.supplier,
        draft.buyer,
        amount,
        draft.currency,
        line_amounts.join(",")
    );

    ledger_core::crypto::hash_bytes(preimage.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft() -> InvoiceDraft {
        InvoiceDraft {
            supplier: AccountId::new("SUP-001"),
            buyer: AccountId::new("BUY-001"),
            currency: Currency::USD,
            terms_days: 30,
            line_items: vec![
                LineItem {
                    description: "Widget Model A".to_string(),
                    quantity: 100,
                    unit_price: dec!(250.00),
                },
                LineItem {
                    description: "Widget Model B".to_string(),
                    quantity: 50,
                    unit_price: dec!(500.00),
                },
            ],
            purchase_order_id: None,
            notes: None,
        }
    }

    #[test]
    fn test_line_item_amount() {
        let item = LineItem {
            description: "x".to_string(),
            quantity: 3,
            unit_price: dec!(12.50),
        };
        assert_eq!(item.amount(), dec!(37.50));
    }

    #[test]
    fn test_content_hash_stable_and_sensitive() {
        let d = draft();
        let h1 = content_hash(&d, dec!(50000));
        let h2 = content_hash(&d, dec!(50000));
        assert_eq!(h1, h2);

        let mut d2 = draft();
        d2.line_items[0].quantity = 101;
        let h3 = content_hash(&d2, dec!(50250));
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_terminal_states() {
        assert!(InvoiceStatus::Settled.is_terminal());
        assert!(InvoiceStatus::Rejected.is_terminal());
        assert!(InvoiceStatus::Expired.is_terminal());
        assert!(!InvoiceStatus::Failed.is_terminal());
        assert!(!InvoiceStatus::Pending.is_terminal());
    }
}
