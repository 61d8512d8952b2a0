//! Error types for rail adapters

use thiserror::Error;

/// Result type for rail operations
pub type Result<T> = std::result::Result<T, Error>;

/// Rail errors
#[derive(Error, Debug)]
pub enum Error {
    /// Rail is unreachable or refused the connection
    #[error("Rail {rail} unavailable: {reason}")]
    Unavailable { rail: String, reason: String },

    /// Circuit breaker is open for the rail
    #[error("Circuit open for rail {rail}: {reason}")]
    CircuitOpen { rail: String, reason: String },

    /// No rail passed the health and breaker gates
    #[error("No settlement rail available")]
    NoRailAvailable,

    /// Token refers to an unknown reservation
    #[error("Unknown prepare token for settlement {0}")]
    UnknownToken(uuid::Uuid),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
