//! Capital-provider auction book
//!
//! One bounded-window auction per invoice. At close, expired and
//! underfunded bids are discarded and the lowest remaining rate wins.
//! Fewer than the bid target is a low-liquidity close: the configured
//! fallback rate applies and an event is emitted. The 70% competition
//! target is a rolling 24 h property, never a per-invoice gate.

use crate::{
    types::{Auction, AuctionResult, AuctionStatus, CapitalBid, CompetitionStats},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ledger_core::AccountId;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Live liquidity lookup (backed by the journal in production)
pub trait LiquiditySource: Send + Sync {
    /// Funds the provider can commit right now
    fn available_liquidity(&self, provider: &AccountId) -> Decimal;
}

/// Liquidity read straight from journal balances
pub struct JournalLiquidity {
    ledger: Arc<ledger_core::Ledger>,
}

impl JournalLiquidity {
    /// Wrap a journal
    pub fn new(ledger: Arc<ledger_core::Ledger>) -> Self {
        Self { ledger }
    }
}

impl LiquiditySource for JournalLiquidity {
    fn available_liquidity(&self, provider: &AccountId) -> Decimal {
        self.ledger.balance(provider).unwrap_or(Decimal::ZERO)
    }
}

/// Auction configuration
#[derive(Debug, Clone)]
pub struct AuctionConfig {
    /// Bidding window
    pub duration: Duration,
    /// Bids below this count make a close low-liquidity
    pub min_bids_target: usize,
    /// Rate applied on a low-liquidity close
    pub fallback_rate: Decimal,
    /// Desk that funds a close with no bids at all
    pub fallback_provider: Option<AccountId>,
    /// Allowed annualised rate band
    pub min_rate: Decimal,
    pub max_rate: Decimal,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            duration: Duration::seconds(10),
            min_bids_target: 3,
            fallback_rate: Decimal::new(10, 2), // 10%
            fallback_provider: None,
            min_rate: Decimal::new(5, 3),  // 0.5%
            max_rate: Decimal::new(15, 2), // 15%
        }
    }
}

/// Auction book keyed by invoice
pub struct AuctionBook {
    auctions: DashMap<Uuid, Auction>,
    liquidity: Arc<dyn LiquiditySource>,
    config: AuctionConfig,
    /// (closed_at, valid_bids) for the rolling competition stats
    closes: RwLock<Vec<(DateTime<Utc>, usize)>>,
}

impl AuctionBook {
    /// Create a book over the given liquidity source
    pub fn new(liquidity: Arc<dyn LiquiditySource>, config: AuctionConfig) -> Self {
        Self {
            auctions: DashMap::new(),
            liquidity,
            config,
            closes: RwLock::new(Vec::new()),
        }
    }

    /// Open an auction for an invoice. Re-opening an already-open auction
    /// returns the live one.
    pub fn open_auction(&self, invoice_id: Uuid, amount: Decimal, terms_days: u16) -> Auction {
        if let Some(existing) = self.auctions.get(&invoice_id) {
            if existing.is_open(Utc::now()) {
                return existing.clone();
            }
        }

        let now = Utc::now();
        let auction = Auction {
            id: Uuid::now_v7(),
            invoice_id,
            amount,
            terms_days,
            status: AuctionStatus::Open,
            opened_at: now,
            ends_at: now + self.config.duration,
            bids: Vec::new(),
        };

        tracing::info!(
            auction = %auction.id,
            invoice = %invoice_id,
            %amount,
            terms_days,
            "Auction opened"
        );

        self.auctions.insert(invoice_id, auction.clone());
        auction
    }

    /// Submit a bid into an open auction
    pub fn submit_bid(
        &self,
        invoice_id: Uuid,
        provider: AccountId,
        discount_rate: Decimal,
        capacity: Decimal,
        expires_at: DateTime<Utc>,
    ) -> Result<CapitalBid> {
        let now = Utc::now();

        if discount_rate < self.config.min_rate || discount_rate > self.config.max_rate {
            return Err(Error::RateOutOfRange {
                rate: discount_rate.to_string(),
                min: self.config.min_rate.to_string(),
                max: self.config.max_rate.to_string(),
            });
        }

        if expires_at <= now {
            return Err(Error::BidExpired);
        }

        let mut auction = self
            .auctions
            .get_mut(&invoice_id)
            .ok_or(Error::AuctionNotFound(invoice_id))?;

        if !auction.is_open(now) {
            return Err(Error::AuctionClosed(invoice_id));
        }

        if capacity < auction.amount {
            return Err(Error::InsufficientCapacity {
                capacity: capacity.to_string(),
                amount: auction.amount.to_string(),
            });
        }

        let liquidity = self.liquidity.available_liquidity(&provider);
        if liquidity < capacity {
            return Err(Error::InsufficientLiquidity {
                provider: provider.to_string(),
                liquidity: liquidity.to_string(),
                capacity: capacity.to_string(),
            });
        }

        let bid = CapitalBid {
            id: Uuid::now_v7(),
            provider: provider.clone(),
            invoice_id,
            discount_rate,
            capacity,
            expires_at,
            submitted_at: now,
        };

        tracing::info!(
            auction = %auction.id,
            provider = %provider,
            rate = %discount_rate,
            "Bid received"
        );

        auction.bids.push(bid.clone());
        Ok(bid)
    }

    /// Close the auction and select the winner.
    ///
    /// Discards bids that expired or whose provider's liquidity no
    /// longer covers the capacity, then picks the lowest rate. Below the
    /// bid target the configured fallback rate applies.
    pub fn close_and_select(&self, invoice_id: Uuid) -> Result<AuctionResult> {
        let now = Utc::now();

        let mut auction = self
            .auctions
            .get_mut(&invoice_id)
            .ok_or(Error::AuctionNotFound(invoice_id))?;

        auction.status = AuctionStatus::Closed;

        let valid: Vec<&CapitalBid> = auction
            .bids
            .iter()
            .filter(|b| {
                b.is_live(now) && self.liquidity.available_liquidity(&b.provider) >= b.capacity
            })
            .collect();

        let valid_count = valid.len();
        let low_liquidity = valid_count < self.config.min_bids_target;

        let winner = valid
            .into_iter()
            .min_by(|a, b| a.discount_rate.cmp(&b.discount_rate))
            .cloned();

        let result = match (&winner, low_liquidity) {
            (Some(bid), false) => AuctionResult {
                invoice_id,
                provider: bid.provider.clone(),
                discount_rate: bid.discount_rate,
                winner,
                valid_bids: valid_count,
                low_liquidity: false,
            },
            (Some(bid), true) => {
                tracing::warn!(
                    invoice = %invoice_id,
                    valid_bids = valid_count,
                    "Low-liquidity close; applying fallback rate"
                );
                AuctionResult {
                    invoice_id,
                    provider: bid.provider.clone(),
                    discount_rate: self.config.fallback_rate,
                    winner,
                    valid_bids: valid_count,
                    low_liquidity: true,
                }
            }
            (None, _) => {
                let provider = self
                    .config
                    .fallback_provider
                    .clone()
                    .ok_or(Error::NoLiquidity(invoice_id))?;
                tracing::warn!(
                    invoice = %invoice_id,
                    "No valid bids; fallback desk funds at fallback rate"
                );
                AuctionResult {
                    invoice_id,
                    provider,
                    discount_rate: self.config.fallback_rate,
                    winner: None,
                    valid_bids: 0,
                    low_liquidity: true,
                }
            }
        };

        self.closes.write().push((now, valid_count));

        tracing::info!(
            invoice = %invoice_id,
            provider = %result.provider,
            rate = %result.discount_rate,
            valid_bids = result.valid_bids,
            "Auction closed"
        );

        Ok(result)
    }

    /// Fetch the auction for an invoice
    pub fn get(&self, invoice_id: Uuid) -> Result<Auction> {
        self.auctions
            .get(&invoice_id)
            .map(|a| a.clone())
            .ok_or(Error::AuctionNotFound(invoice_id))
    }

    /// Invoices whose auctions are past their window but still open
    /// (for the scheduler's stale-auction sweep)
    pub fn stale_open_auctions(&self) -> Vec<Uuid> {
        let now = Utc::now();
        self.auctions
            .iter()
            .filter(|a| a.status == AuctionStatus::Open && now >= a.ends_at)
            .map(|a| a.invoice_id)
            .collect()
    }

    /// Rolling 24 h competition statistics
    pub fn competition_stats(&self) -> CompetitionStats {
        let cutoff = Utc::now() - Duration::hours(24);
        let mut closes = self.closes.write();
        closes.retain(|(at, _)| *at >= cutoff);

        let total = closes.len();
        let competitive = closes
            .iter()
            .filter(|(_, bids)| *bids >= self.config.min_bids_target)
            .count();

        CompetitionStats {
            auctions_closed: total,
            competitive,
            competition_rate: if total == 0 {
                1.0
            } else {
                competitive as f64 / total as f64
            },
        }
    }
}
