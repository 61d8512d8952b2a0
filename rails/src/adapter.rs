//! Rail adapter contract
//!
//! Every transport (RTP, FedNow, ACH, SWIFT) plugs in behind this trait.
//! The settlement id is the idempotency key for every call: retrying any
//! operation with the same id must be safe, and `status` must eventually
//! return a terminal answer for any leg the rail has seen.

use crate::{
    types::{CommitResult, LegKind, PrepareOutcome, PrepareToken, RailHealth, TerminalStatus},
    Result,
};
use async_trait::async_trait;
use ledger_core::AccountId;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Uniform rail contract
#[async_trait]
pub trait RailAdapter: Send + Sync {
    /// Rail name (stable, used for routing and logging)
    fn name(&self) -> &str;

    /// Routing priority; lower settles first
    fn priority(&self) -> u8;

    /// Reserve a leg. Idempotent on (settlement_id, leg).
    async fn prepare(
        &self,
        settlement_id: Uuid,
        leg: LegKind,
        account: &AccountId,
        amount: Decimal,
    ) -> Result<PrepareOutcome>;

    /// Execute a reserved leg. Idempotent: a committed leg re-commits to
    /// the same transaction id.
    async fn commit(&self, token: &PrepareToken) -> Result<CommitResult>;

    /// Cancel a reservation that has not committed
    async fn rollback(&self, token: &PrepareToken) -> Result<()>;

    /// Reverse a committed leg; returns the compensation transaction id.
    /// The original movement is never deleted on the rail either.
    async fn compensate(&self, token: &PrepareToken) -> Result<String>;

    /// Terminal state of a leg, keyed by the settlement id
    async fn status(&self, settlement_id: Uuid, leg: LegKind) -> Result<TerminalStatus>;

    /// Liveness probe
    async fn health(&self) -> RailHealth;
}
