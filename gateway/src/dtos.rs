//! API request/response shapes

use chrono::{DateTime, Utc};
use invoices::Invoice;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settlement::Settlement;
use uuid::Uuid;

/// One invoice line on submission
#[derive(Debug, Clone, Deserialize)]
pub struct LineItemRequest {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// POST /invoices
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceCreateRequest {
    pub supplier_id: String,
    pub buyer_id: String,
    pub currency: String,
    pub terms: u16,
    pub line_items: Vec<LineItemRequest>,
    pub purchase_order_id: Option<String>,
    pub notes: Option<String>,
}

/// Invoice representation
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub supplier_id: String,
    pub buyer_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub terms: u16,
    pub status: String,
    pub content_hash: String,
    pub fraud_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            supplier_id: invoice.supplier.to_string(),
            buyer_id: invoice.buyer.to_string(),
            amount: invoice.amount,
            currency: invoice.currency.to_string(),
            terms: invoice.terms_days,
            status: invoice.status.to_string(),
            content_hash: invoice
                .content_hash
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect(),
            fraud_score: invoice.fraud_score,
            created_at: invoice.created_at,
            accepted_at: invoice.accepted_at,
            settled_at: invoice.settled_at,
        }
    }
}

/// GET /invoices/{id}/quote response
#[derive(Debug, Clone, Serialize)]
pub struct QuoteResponse {
    pub quote_id: Uuid,
    pub invoice_id: Uuid,
    pub terms: u16,
    pub discount_rate: Decimal,
    pub total_cost: Decimal,
    pub provider_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<pricing::PricingQuote> for QuoteResponse {
    fn from(quote: pricing::PricingQuote) -> Self {
        Self {
            quote_id: quote.id,
            invoice_id: quote.invoice_id,
            terms: quote.terms_days,
            discount_rate: quote.discount_rate,
            total_cost: quote.total_cost,
            provider_id: quote.provider.to_string(),
            issued_at: quote.issued_at,
            expires_at: quote.expires_at,
        }
    }
}

/// POST /invoices/{id}/accept
#[derive(Debug, Clone, Deserialize)]
pub struct AcceptRequest {
    pub quote_id: Uuid,
    pub buyer_id: String,
    /// Ed25519 signature bytes over (invoice_id || quote_id)
    pub signature: Vec<u8>,
}

/// Settlement representation
#[derive(Debug, Clone, Serialize)]
pub struct SettlementResponse {
    pub settlement_id: Uuid,
    pub invoice_id: Uuid,
    pub status: String,
    pub amount: Decimal,
    pub buyer_cost: Decimal,
    pub discount_rate: Decimal,
    pub rail: Option<String>,
    pub duration_ms: Option<i64>,
}

impl From<Settlement> for SettlementResponse {
    fn from(s: Settlement) -> Self {
        Self {
            settlement_id: s.id,
            invoice_id: s.invoice_id,
            status: s.status.to_string(),
            amount: s.amount,
            buyer_cost: s.buyer_cost,
            discount_rate: s.discount_rate,
            rail: s.rail.clone(),
            duration_ms: s.duration_ms(),
        }
    }
}

/// Acceptance outcome envelope
#[derive(Debug, Clone, Serialize)]
pub struct AcceptResponse {
    pub outcome: String,
    pub detail: Option<String>,
    pub settlement: Option<SettlementResponse>,
}

/// POST /bids
#[derive(Debug, Clone, Deserialize)]
pub struct BidRequest {
    pub invoice_id: Uuid,
    pub provider_id: String,
    pub discount_rate: Decimal,
    pub capacity: Decimal,
    pub expires_at: DateTime<Utc>,
}

/// Bid acknowledgement
#[derive(Debug, Clone, Serialize)]
pub struct BidResponse {
    pub bid_id: Uuid,
    pub invoice_id: Uuid,
    pub discount_rate: Decimal,
    pub expires_at: DateTime<Utc>,
}

/// GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub frozen: bool,
    pub rails: Vec<RailHealthView>,
    pub competition_rate_24h: f64,
}

/// One rail's health in /health
#[derive(Debug, Clone, Serialize)]
pub struct RailHealthView {
    pub rail: String,
    pub up: bool,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}
