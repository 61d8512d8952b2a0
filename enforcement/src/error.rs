//! Error types for enforcement

use thiserror::Error;

/// Result type for enforcement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Enforcement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invariant registry is malformed (duplicate ids, missing deps)
    #[error("Invalid invariant registry: {0}")]
    Registry(String),

    /// Dependency graph contains a cycle
    #[error("Invariant dependency cycle involving '{0}'")]
    DependencyCycle(String),

    /// Unknown invariant id
    #[error("Unknown invariant: {0}")]
    UnknownInvariant(String),

    /// Decision ledger chain is broken
    #[error("Decision ledger corrupted at seq {seq}: {reason}")]
    LedgerCorrupted { seq: u64, reason: String },

    /// System is frozen; the operation was refused
    #[error("System frozen: {0}")]
    Frozen(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
