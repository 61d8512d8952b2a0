//! HTTP error mapping

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Result type for handlers
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced over HTTP
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Request malformed or structurally invalid
    #[error("{0}")]
    Validation(String),

    /// Resource does not exist
    #[error("{0}")]
    NotFound(String),

    /// State conflict (duplicate acceptance, terminal invoice, ...)
    #[error("{0}")]
    Conflict(String),

    /// Caller not authorized (signature, ownership)
    #[error("{0}")]
    Unauthorized(String),

    /// Compliance or fraud gate refused the operation
    #[error("{0}")]
    Forbidden(String),

    /// No liquidity or no healthy rail right now
    #[error("{0}")]
    Unavailable(String),

    /// Internal failure
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

impl From<invoices::Error> for GatewayError {
    fn from(err: invoices::Error) -> Self {
        use invoices::Error::*;
        match err {
            NotFound(id) => GatewayError::NotFound(format!("invoice {} not found", id)),
            AmountOutOfRange { .. } | InvalidTerms(_) | InvalidLineItems(_) | SelfDealing => {
                GatewayError::Validation(err.to_string())
            }
            RateLimited { .. } => GatewayError::Forbidden(err.to_string()),
            InvalidTransition { .. } | Terminal { .. } => GatewayError::Conflict(err.to_string()),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<pricing::Error> for GatewayError {
    fn from(err: pricing::Error) -> Self {
        use pricing::Error::*;
        match err {
            AuctionNotFound(_) | QuoteNotFound(_) => GatewayError::NotFound(err.to_string()),
            AuctionClosed(_) | QuoteConsumed(_) => GatewayError::Conflict(err.to_string()),
            QuoteExpired(_) | BidExpired => GatewayError::Conflict(err.to_string()),
            RateOutOfRange { .. } | InsufficientCapacity { .. } => {
                GatewayError::Validation(err.to_string())
            }
            InsufficientLiquidity { .. } | NoLiquidity(_) => {
                GatewayError::Unavailable(err.to_string())
            }
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<accounts::Error> for GatewayError {
    fn from(err: accounts::Error) -> Self {
        use accounts::Error::*;
        match err {
            NotFound(_) => GatewayError::NotFound(err.to_string()),
            NotActive { .. } => GatewayError::Forbidden(err.to_string()),
            CreditExceeded { .. } => GatewayError::Forbidden(err.to_string()),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<settlement::Error> for GatewayError {
    fn from(err: settlement::Error) -> Self {
        match err {
            settlement::Error::ResolutionPending(id) => {
                GatewayError::Conflict(format!("settlement {} still resolving", id))
            }
            settlement::Error::AlreadySettling(id) => {
                GatewayError::Conflict(format!("invoice {} already settling", id))
            }
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<ledger_core::Error> for GatewayError {
    fn from(err: ledger_core::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<fraud::Error> for GatewayError {
    fn from(err: fraud::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}
