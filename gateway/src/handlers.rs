//! HTTP handlers

use crate::{
    dtos::*,
    error::{GatewayError, Result},
    state::AppState,
};
use actix_web::{web, HttpResponse};
use chrono::Utc;
use fraud::GateDecision;
use invoices::{InvoiceDraft, InvoiceStatus, LineItem};
use ledger_core::{AccountId, Currency, Signature};
use serde::Deserialize;
use settlement::{AcceptanceRequest, FailureKind, RejectKind, SettlementOutcome};
use uuid::Uuid;

/// POST /api/v1/invoices
pub async fn submit_invoice(
    state: web::Data<AppState>,
    req: web::Json<InvoiceCreateRequest>,
) -> Result<HttpResponse> {
    state
        .freeze
        .check_admission()
        .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

    let req = req.into_inner();

    let currency = Currency::parse(&req.currency)
        .ok_or_else(|| GatewayError::Validation(format!("unknown currency {}", req.currency)))?;

    let supplier = AccountId::new(req.supplier_id);
    let buyer = AccountId::new(req.buyer_id);

    // Submission checkpoint: both parties active and sanctions-clear
    state.registry.require_active(&supplier, None)?;
    state.registry.require_active(&buyer, None)?;

    let screening = state
        .sanctions
        .screen(&[supplier.clone(), buyer.clone()])
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    if let Some((account, _)) = screening.iter().find(|(_, hit)| *hit) {
        return Err(GatewayError::Forbidden(format!(
            "account {} matched the sanctions list",
            account
        )));
    }

    let draft = InvoiceDraft {
        supplier,
        buyer,
        currency,
        terms_days: req.terms,
        line_items: req
            .line_items
            .into_iter()
            .map(|li| LineItem {
                description: li.description,
                quantity: li.quantity,
                unit_price: li.unit_price,
            })
            .collect(),
        purchase_order_id: req.purchase_order_id,
        notes: req.notes,
    };

    run_admission_checks(&state, &draft)?;

    let (invoice, created) = state.invoices.submit(draft)?;

    if created {
        state.metrics.invoices_created.inc();
        state.scorer.observe(&invoice);

        // Score at admission; hot invoices park in review
        let decision = state.fraud_gate.score_at_submission(&invoice).await?;
        state
            .invoices
            .set_fraud_score(invoice.id, decision.score(), decision.computed_at())?;
        if matches!(decision, GateDecision::Review { .. }) {
            state.invoices.transition(
                invoice.id,
                InvoiceStatus::FraudReview,
                "fraud-gate",
                "score above threshold at submission",
            )?;
        } else {
            // Capital providers can start bidding immediately
            state
                .auctions
                .open_auction(invoice.id, invoice.amount, invoice.terms_days);
        }
    }

    let invoice = state.invoices.get(invoice.id)?;
    let status = if created {
        actix_web::http::StatusCode::CREATED
    } else {
        actix_web::http::StatusCode::OK
    };

    Ok(HttpResponse::build(status).json(InvoiceResponse::from(invoice)))
}

/// Structural admission checks, recorded in the decision ledger.
/// The store re-validates; this is the auditable gate.
fn run_admission_checks(state: &AppState, draft: &InvoiceDraft) -> Result<()> {
    use enforcement::{
        context::{CheckContext, InvoiceFacts},
        InvariantId, Phase,
    };
    use rust_decimal::Decimal;

    let amount: Decimal = draft.line_items.iter().map(|li| li.amount()).sum();

    // Hash uniqueness is owned by the store, where a duplicate replays
    // the original invoice instead of failing
    let mut ctx = CheckContext::at(Utc::now());
    ctx.invoice = Some(InvoiceFacts {
        invoice_id: Uuid::nil(),
        supplier: draft.supplier.clone(),
        buyer: draft.buyer.clone(),
        amount,
        terms_days: draft.terms_days,
        line_items_total: amount,
        hash_duplicate: false,
    });

    let decision = state
        .engine
        .run_phase(
            Phase::Pre,
            &[
                InvariantId("amount-range"),
                InvariantId("terms-allowed"),
                InvariantId("line-items-sum"),
                InvariantId("parties-distinct"),
            ],
            &ctx,
            "gateway",
        )
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    if !decision.is_proceed() {
        return Err(GatewayError::Validation(
            decision.reason.unwrap_or_else(|| "admission check failed".to_string()),
        ));
    }

    Ok(())
}

/// GET /api/v1/invoices/{id}
pub async fn get_invoice(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let invoice = state.invoices.get(path.into_inner())?;
    Ok(HttpResponse::Ok().json(InvoiceResponse::from(invoice)))
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub terms: Option<u16>,
}

/// GET /api/v1/invoices/{id}/quote?terms=
///
/// Returns the live quote if one is still valid, otherwise re-runs
/// price discovery over the auction book.
pub async fn get_quote(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<QuoteQuery>,
) -> Result<HttpResponse> {
    let invoice_id = path.into_inner();
    let invoice = state.invoices.get(invoice_id)?;

    if invoice.status != InvoiceStatus::Pending {
        return Err(GatewayError::Conflict(format!(
            "invoice is {}",
            invoice.status
        )));
    }

    let terms = query.terms.unwrap_or(invoice.terms_days);

    if let Some(quote) = state.quotes.get_live(invoice_id, terms) {
        return Ok(HttpResponse::Ok().json(QuoteResponse::from(quote)));
    }

    let auction = state
        .auctions
        .open_auction(invoice_id, invoice.amount, invoice.terms_days);

    let now = Utc::now();
    let target = state.config.settlement.min_bids_target;
    if auction.is_open(now) && auction.bids.len() < target {
        return Err(GatewayError::Unavailable(format!(
            "auction collecting bids ({}/{}); retry after {}",
            auction.bids.len(),
            target,
            auction.ends_at.to_rfc3339()
        )));
    }

    let result = state.auctions.close_and_select(invoice_id)?;
    if result.low_liquidity {
        state.metrics.low_liquidity_closes.inc();
    }

    let quote = state.quotes.issue(&result, invoice.amount, terms);
    Ok(HttpResponse::Ok().json(QuoteResponse::from(quote)))
}

/// POST /api/v1/invoices/{id}/accept
pub async fn accept_invoice(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<AcceptRequest>,
) -> Result<HttpResponse> {
    let invoice_id = path.into_inner();
    let req = req.into_inner();

    let signature: [u8; 64] = req
        .signature
        .try_into()
        .map_err(|_| GatewayError::Validation("signature must be 64 bytes".to_string()))?;

    let acceptance = AcceptanceRequest {
        quote_id: req.quote_id,
        signer: AccountId::new(req.buyer_id),
        signature: Signature::from_bytes(signature),
    };

    let outcome = state.coordinator.settle(invoice_id, acceptance).await?;

    match outcome {
        SettlementOutcome::Completed(s) => {
            state.metrics.settlements_completed.inc();
            if let Some(ms) = s.duration_ms() {
                state.metrics.settlement_duration.observe(ms as f64 / 1000.0);
            }
            Ok(HttpResponse::Ok().json(AcceptResponse {
                outcome: "settled".to_string(),
                detail: None,
                settlement: Some(SettlementResponse::from(s)),
            }))
        }
        SettlementOutcome::Rejected { kind, detail } => {
            state.metrics.settlements_failed.inc();
            Err(reject_to_error(kind, detail))
        }
        SettlementOutcome::Failed { kind, detail } => {
            state.metrics.settlements_failed.inc();
            match kind {
                FailureKind::Compliance => Err(GatewayError::Forbidden(detail)),
                _ => Err(GatewayError::Internal(format!(
                    "settlement failed ({:?}): {}",
                    kind, detail
                ))),
            }
        }
    }
}

fn reject_to_error(kind: RejectKind, detail: String) -> GatewayError {
    match kind {
        RejectKind::Frozen | RejectKind::NoRail => GatewayError::Unavailable(detail),
        RejectKind::StaleQuote => GatewayError::Conflict(format!("stale-quote: {}", detail)),
        RejectKind::Conflict | RejectKind::InvalidState => GatewayError::Conflict(detail),
        RejectKind::Unauthorized => GatewayError::Unauthorized(detail),
        RejectKind::CreditExceeded => GatewayError::Forbidden(format!("credit-exceeded: {}", detail)),
        RejectKind::Fraud => GatewayError::Forbidden(format!("fraud: {}", detail)),
        RejectKind::Compliance => GatewayError::Forbidden(format!("compliance: {}", detail)),
        RejectKind::PrecheckFailed => GatewayError::Conflict(detail),
    }
}

/// POST /api/v1/bids
pub async fn submit_bid(
    state: web::Data<AppState>,
    req: web::Json<BidRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    let provider = AccountId::new(req.provider_id);

    state.registry.require_active(&provider, None)?;

    let bid = state.auctions.submit_bid(
        req.invoice_id,
        provider,
        req.discount_rate,
        req.capacity,
        req.expires_at,
    )?;

    Ok(HttpResponse::Created().json(BidResponse {
        bid_id: bid.id,
        invoice_id: bid.invoice_id,
        discount_rate: bid.discount_rate,
        expires_at: bid.expires_at,
    }))
}

/// GET /health
pub async fn health(state: web::Data<AppState>) -> Result<HttpResponse> {
    let rails = state
        .router
        .probe_all()
        .await
        .into_iter()
        .map(|h| RailHealthView {
            rail: h.rail,
            up: h.up,
            latency_ms: h.latency_ms,
            checked_at: h.checked_at,
        })
        .collect();

    let frozen = state.freeze.is_frozen();
    let stats = state.auctions.competition_stats();

    Ok(HttpResponse::Ok().json(HealthResponse {
        status: if frozen { "frozen" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        frozen,
        rails,
        competition_rate_24h: stats.competition_rate,
    }))
}

/// GET /ledger/reconcile
pub async fn reconcile(state: web::Data<AppState>) -> Result<HttpResponse> {
    let report = state.ledger.reconcile(0)?;
    Ok(HttpResponse::Ok().json(report))
}

/// GET /metrics
pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.metrics.render())
}
