//! Error types for pricing and auctions

use thiserror::Error;
use uuid::Uuid;

/// Result type for pricing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pricing errors
#[derive(Error, Debug)]
pub enum Error {
    /// No auction open for the invoice
    #[error("No auction for invoice {0}")]
    AuctionNotFound(Uuid),

    /// Auction closed or past its window
    #[error("Auction for invoice {0} is not accepting bids")]
    AuctionClosed(Uuid),

    /// Bid rate outside the allowed band
    #[error("Discount rate {rate} outside [{min}, {max}]")]
    RateOutOfRange {
        rate: String,
        min: String,
        max: String,
    },

    /// Bid capacity below the invoice amount
    #[error("Bid capacity {capacity} below invoice amount {amount}")]
    InsufficientCapacity { capacity: String, amount: String },

    /// Bid already expired at submission
    #[error("Bid expires in the past")]
    BidExpired,

    /// Provider liquidity no longer covers the bid
    #[error("Provider {provider} liquidity {liquidity} below capacity {capacity}")]
    InsufficientLiquidity {
        provider: String,
        liquidity: String,
        capacity: String,
    },

    /// No bids and no fallback provider configured
    #[error("No liquidity available for invoice {0}")]
    NoLiquidity(Uuid),

    /// Quote does not exist
    #[error("Quote not found: {0}")]
    QuoteNotFound(Uuid),

    /// Quote past its TTL
    #[error("Quote {0} expired")]
    QuoteExpired(Uuid),

    /// Quote already consumed by an earlier acceptance
    #[error("Quote {0} already consumed")]
    QuoteConsumed(Uuid),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
