//! Error types for the invoice store

use crate::types::InvoiceStatus;
use thiserror::Error;
use uuid::Uuid;

/// Result type for invoice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Invoice errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invoice does not exist
    #[error("Invoice not found: {0}")]
    NotFound(Uuid),

    /// Amount outside the accepted band
    #[error("Amount {amount} outside [{min}, {max}]")]
    AmountOutOfRange {
        amount: String,
        min: String,
        max: String,
    },

    /// Terms not on the whitelist
    #[error("Payment terms {0} not allowed")]
    InvalidTerms(u16),

    /// Line items malformed or do not sum to the invoice amount
    #[error("Invalid line items: {0}")]
    InvalidLineItems(String),

    /// Supplier and buyer must differ
    #[error("Supplier and buyer are the same account")]
    SelfDealing,

    /// Per-supplier submission rate exceeded
    #[error("Rate limit exceeded for {supplier}: {count} invoices in the last hour")]
    RateLimited { supplier: String, count: u32 },

    /// Transition not permitted by the state machine
    #[error("Invalid transition {from} -> {to} for invoice {invoice_id}")]
    InvalidTransition {
        invoice_id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    /// Attempt to leave a terminal state
    #[error("Invoice {invoice_id} is terminal in state {status}")]
    Terminal {
        invoice_id: Uuid,
        status: InvoiceStatus,
    },

    /// Decision ledger write failed
    #[error("Enforcement error: {0}")]
    Enforcement(#[from] enforcement::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
