//! Quote issuance and single-use consumption
//!
//! A quote binds (invoice, terms, winning rate, total cost) and is valid
//! for exactly the configured TTL. Consumption is atomic: of two
//! concurrent acceptances bearing the same quote, exactly one wins.

use crate::{
    math,
    types::{AuctionResult, PricingQuote},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Quote book
pub struct QuoteBook {
    quotes: DashMap<Uuid, PricingQuote>,
    /// (invoice, terms) -> latest quote id
    by_invoice: DashMap<(Uuid, u16), Uuid>,
    ttl: Duration,
}

impl QuoteBook {
    /// Create with the production TTL (5 minutes)
    pub fn new(ttl: Duration) -> Self {
        Self {
            quotes: DashMap::new(),
            by_invoice: DashMap::new(),
            ttl,
        }
    }

    /// Issue a quote from an auction result
    pub fn issue(
        &self,
        result: &AuctionResult,
        amount: Decimal,
        terms_days: u16,
    ) -> PricingQuote {
        let now = Utc::now();
        let quote = PricingQuote {
            id: Uuid::now_v7(),
            invoice_id: result.invoice_id,
            terms_days,
            discount_rate: result.discount_rate,
            provider: result.provider.clone(),
            total_cost: math::total_cost(amount, result.discount_rate, terms_days),
            issued_at: now,
            expires_at: now + self.ttl,
            used: false,
            used_at: None,
        };

        tracing::info!(
            quote = %quote.id,
            invoice = %quote.invoice_id,
            rate = %quote.discount_rate,
            total_cost = %quote.total_cost,
            "Quote issued"
        );

        self.by_invoice
            .insert((result.invoice_id, terms_days), quote.id);
        self.quotes.insert(quote.id, quote.clone());
        quote
    }

    /// Fetch a quote by id
    pub fn get(&self, quote_id: Uuid) -> Result<PricingQuote> {
        self.quotes
            .get(&quote_id)
            .map(|q| q.clone())
            .ok_or(Error::QuoteNotFound(quote_id))
    }

    /// The live quote for (invoice, terms), if one exists
    pub fn get_live(&self, invoice_id: Uuid, terms_days: u16) -> Option<PricingQuote> {
        let quote_id = self.by_invoice.get(&(invoice_id, terms_days))?;
        let quote = self.quotes.get(&quote_id)?;
        if quote.is_live(Utc::now()) {
            Some(quote.clone())
        } else {
            None
        }
    }

    /// Consume a quote exactly once.
    ///
    /// The entry lock makes the used-flag flip atomic: a second consumer
    /// observes `QuoteConsumed`, an expired quote `QuoteExpired`.
    pub fn consume(&self, quote_id: Uuid, now: DateTime<Utc>) -> Result<PricingQuote> {
        let mut quote = self
            .quotes
            .get_mut(&quote_id)
            .ok_or(Error::QuoteNotFound(quote_id))?;

        if quote.used {
            return Err(Error::QuoteConsumed(quote_id));
        }

        if now > quote.expires_at {
            return Err(Error::QuoteExpired(quote_id));
        }

        quote.used = true;
        quote.used_at = Some(now);

        tracing::info!(quote = %quote_id, invoice = %quote.invoice_id, "Quote consumed");
        Ok(quote.clone())
    }
}
