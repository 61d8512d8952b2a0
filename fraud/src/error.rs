//! Error types for fraud scoring

use thiserror::Error;

/// Result type for fraud operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fraud errors
#[derive(Error, Debug)]
pub enum Error {
    /// Oracle could not produce a score
    #[error("Score oracle error: {0}")]
    Oracle(String),

    /// No score on file where one is required
    #[error("No fraud score on file for invoice {0}")]
    NoScore(uuid::Uuid),

    /// Score above the admission threshold
    #[error("Fraud score {score:.4} above threshold {threshold:.2}")]
    AboveThreshold { score: f64, threshold: f64 },

    /// Generic error
    #[error("{0}")]
    Other(String),
}
