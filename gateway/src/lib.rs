//! # gateway
//!
//! HTTP boundary for the settlement network: invoice submission, quote
//! retrieval, signed acceptance, capital bids, and the operational
//! endpoints. Transport is JSON over HTTP; everything of consequence
//! happens in the crates behind `AppState`.

pub mod dtos;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;

pub use error::{GatewayError, Result};
pub use state::{AppState, GatewayConfig};

use actix_web::web;

/// Route table
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health))
        .route("/metrics", web::get().to(handlers::metrics))
        .route("/ledger/reconcile", web::get().to(handlers::reconcile))
        .route("/api/v1/invoices", web::post().to(handlers::submit_invoice))
        .route("/api/v1/invoices/{id}", web::get().to(handlers::get_invoice))
        .route(
            "/api/v1/invoices/{id}/quote",
            web::get().to(handlers::get_quote),
        )
        .route(
            "/api/v1/invoices/{id}/accept",
            web::post().to(handlers::accept_invoice),
        )
        .route("/api/v1/bids", web::post().to(handlers::submit_bid));
}
