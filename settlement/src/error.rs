//! Error types for settlement

use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Journal error
    #[error("Journal error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Enforcement error
    #[error("Enforcement error: {0}")]
    Enforcement(#[from] enforcement::Error),

    /// Registry error
    #[error("Account error: {0}")]
    Accounts(#[from] accounts::Error),

    /// Invoice error
    #[error("Invoice error: {0}")]
    Invoices(#[from] invoices::Error),

    /// Pricing error
    #[error("Pricing error: {0}")]
    Pricing(#[from] pricing::Error),

    /// Rail error
    #[error("Rail error: {0}")]
    Rails(#[from] rails::Error),

    /// Fraud error
    #[error("Fraud error: {0}")]
    Fraud(#[from] fraud::Error),

    /// A leg is still resolving against the rail's status endpoint;
    /// the settlement remains in-progress and is not reported yet
    #[error("Settlement {0} is still resolving")]
    ResolutionPending(Uuid),

    /// Duplicate settlement attempt for an invoice
    #[error("Invoice {0} already has a settlement")]
    AlreadySettling(Uuid),

    /// Settlement not found
    #[error("Settlement not found: {0}")]
    NotFound(Uuid),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
