//! Error types for the account registry

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Registry errors
#[derive(Error, Debug)]
pub enum Error {
    /// Account does not exist
    #[error("Account not found: {0}")]
    NotFound(String),

    /// Account already registered
    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    /// Account is not in a state that allows the operation
    #[error("Account {account} is {status}")]
    NotActive { account: String, status: String },

    /// Credit limit would be exceeded
    #[error("Credit limit exceeded for {account}: outstanding {outstanding} + requested {requested} > limit {limit}")]
    CreditExceeded {
        account: String,
        outstanding: String,
        requested: String,
        limit: String,
    },

    /// No credit limit on file for the buyer
    #[error("No credit limit on file for {0}")]
    NoCreditLimit(String),

    /// Reservation not found
    #[error("Credit reservation not found: {0}")]
    ReservationNotFound(uuid::Uuid),

    /// Credit bureau lookup failed
    #[error("Credit bureau error: {0}")]
    Bureau(String),

    /// Sanctions feed failed
    #[error("Sanctions feed error: {0}")]
    SanctionsFeed(String),

    /// Sanctions snapshot too old to trust
    #[error("Sanctions snapshot is {age_s}s old (max {max_s}s)")]
    SanctionsStale { age_s: i64, max_s: i64 },

    /// Generic error
    #[error("{0}")]
    Other(String),
}
