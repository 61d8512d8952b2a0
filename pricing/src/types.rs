//! Auction and quote entities

use chrono::{DateTime, Utc};
use ledger_core::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A capital provider's offer to finance an invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalBid {
    /// Bid id
    pub id: Uuid,
    /// Bidding provider
    pub provider: AccountId,
    /// Invoice the bid targets
    pub invoice_id: Uuid,
    /// Annualised discount rate
    pub discount_rate: Decimal,
    /// How much the provider will fund
    pub capacity: Decimal,
    /// Bid validity horizon
    pub expires_at: DateTime<Utc>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
}

impl CapitalBid {
    /// Usable iff unexpired at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Auction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    /// Accepting bids
    Open,
    /// Winner selected (or fallback applied)
    Closed,
}

/// An auction for one invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub terms_days: u16,
    pub status: AuctionStatus,
    pub opened_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub bids: Vec<CapitalBid>,
}

impl Auction {
    /// Still taking bids at `now`
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == AuctionStatus::Open && now < self.ends_at
    }
}

/// Outcome of closing an auction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionResult {
    pub invoice_id: Uuid,
    /// Winning provider; absent only for the configured fallback desk
    pub winner: Option<CapitalBid>,
    /// Provider that will fund the advance
    pub provider: AccountId,
    /// Rate the quote will carry
    pub discount_rate: Decimal,
    /// Valid bids at close
    pub valid_bids: usize,
    /// Fewer than the competition target arrived
    pub low_liquidity: bool,
}

/// A signed price valid for exactly the quote TTL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingQuote {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub terms_days: u16,
    /// Annualised rate from the winning bid (or fallback)
    pub discount_rate: Decimal,
    /// Provider funding the advance
    pub provider: AccountId,
    /// Exact buyer charge
    pub total_cost: Decimal,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Consumed by an acceptance
    pub used: bool,
    /// When it was consumed
    pub used_at: Option<DateTime<Utc>>,
}

impl PricingQuote {
    /// Unexpired and unconsumed at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.used && now <= self.expires_at
    }
}

/// Rolling competition statistics (24 h window)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionStats {
    pub auctions_closed: usize,
    pub competitive: usize,
    /// Share of auctions with at least the bid target
    pub competition_rate: f64,
}
