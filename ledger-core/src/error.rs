//! Error types for the journal

use thiserror::Error;

/// Result type for journal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Journal errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invalid entry
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Entry not found
    #[error("Entry not found: seq {0}")]
    EntryNotFound(u64),

    /// Hash chain broken or signature invalid
    #[error("Chain corrupted at seq {seq}: {reason}")]
    ChainCorrupted { seq: u64, reason: String },

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureError(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
