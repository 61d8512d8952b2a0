//! # invoices
//!
//! Invoice store and lifecycle state machine. Admission enforces the
//! structural invariants and dedups by content hash; `transition` is the
//! only writer of the status column and terminal states are absorbing.

pub mod error;
pub mod state;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use state::can_transition;
pub use store::{AdmissionLimits, InvoiceStore};
pub use types::{content_hash, Invoice, InvoiceDraft, InvoiceStatus, LineItem};
