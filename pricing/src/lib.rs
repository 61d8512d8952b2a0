//! # pricing
//!
//! Working-capital auction and quote issuance. Capital providers bid an
//! annualised discount rate inside a bounded window; the lowest valid
//! rate wins and becomes a quote with a five-minute TTL, consumable at
//! most once.

pub mod auction;
pub mod error;
pub mod math;
pub mod quote;
pub mod types;

pub use auction::{AuctionBook, AuctionConfig, JournalLiquidity, LiquiditySource};
pub use error::{Error, Result};
pub use math::{provider_profit, total_cost};
pub use quote::QuoteBook;
pub use types::{
    Auction, AuctionResult, AuctionStatus, CapitalBid, CompetitionStats, PricingQuote,
};
