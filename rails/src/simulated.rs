//! Simulated rail
//!
//! In-process rail with configurable latency and scripted failure modes,
//! used by local runs and the coordinator's recovery tests. State is
//! keyed by (settlement_id, leg) so every call is idempotent the way a
//! real rail's must be.

use crate::{
    adapter::RailAdapter,
    types::{CommitResult, LegKind, PrepareOutcome, PrepareToken, RailHealth, TerminalStatus},
    Error, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ledger_core::AccountId;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

/// Scripted behavior for a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Behave normally
    None,
    /// Refuse the prepare
    RejectPrepare,
    /// Commit returns a definite failure
    FailCommit,
    /// Commit returns Indeterminate; status later reports committed
    IndeterminateThenCommitted,
    /// Commit returns Indeterminate; status later reports rolled back
    IndeterminateThenRolledBack,
}

#[derive(Debug, Clone)]
enum LegState {
    Prepared { account: AccountId, amount: Decimal },
    Committed { txn_id: String },
    RolledBack,
}

/// Simulated rail adapter
pub struct SimulatedRail {
    name: String,
    priority: u8,
    latency: Duration,
    up: RwLock<bool>,
    legs: DashMap<(Uuid, LegKind), LegState>,
    scripts: DashMap<LegKind, FailureMode>,
}

impl SimulatedRail {
    /// Create a healthy rail
    pub fn new(name: impl Into<String>, priority: u8, latency: Duration) -> Self {
        Self {
            name: name.into(),
            priority,
            latency,
            up: RwLock::new(true),
            legs: DashMap::new(),
            scripts: DashMap::new(),
        }
    }

    /// Script a failure mode for a leg kind (applies to all settlements)
    pub fn script(&self, leg: LegKind, mode: FailureMode) {
        self.scripts.insert(leg, mode);
    }

    /// Take the rail up or down
    pub fn set_up(&self, up: bool) {
        *self.up.write() = up;
    }

    fn mode(&self, leg: LegKind) -> FailureMode {
        self.scripts.get(&leg).map(|m| *m).unwrap_or(FailureMode::None)
    }

    fn txn_id(&self, settlement_id: Uuid, leg: LegKind) -> String {
        format!("{}-{}-{}", self.name.to_uppercase(), leg, settlement_id.simple())
    }
}

#[async_trait]
impl RailAdapter for SimulatedRail {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn prepare(
        &self,
        settlement_id: Uuid,
        leg: LegKind,
        account: &AccountId,
        amount: Decimal,
    ) -> Result<PrepareOutcome> {
        tokio::time::sleep(self.latency).await;

        if !*self.up.read() {
            return Err(Error::Unavailable {
                rail: self.name.clone(),
                reason: "rail down".to_string(),
            });
        }

        let key = (settlement_id, leg);

        // Idempotent replay: an existing reservation (or already-committed
        // leg) is re-offered; a rolled-back leg is not resurrected.
        if let Some(state) = self.legs.get(&key).map(|s| s.clone()) {
            return match state {
                LegState::Prepared { account, amount } => {
                    Ok(PrepareOutcome::Prepared(PrepareToken {
                        rail: self.name.clone(),
                        settlement_id,
                        leg,
                        account,
                        amount,
                    }))
                }
                LegState::Committed { .. } => Ok(PrepareOutcome::Prepared(PrepareToken {
                    rail: self.name.clone(),
                    settlement_id,
                    leg,
                    account: account.clone(),
                    amount,
                })),
                LegState::RolledBack => Ok(PrepareOutcome::Rejected {
                    reason: "leg previously rolled back".to_string(),
                }),
            };
        }

        if self.mode(leg) == FailureMode::RejectPrepare {
            tracing::warn!(rail = %self.name, %leg, "Prepare rejected by script");
            return Ok(PrepareOutcome::Rejected {
                reason: "scripted rejection".to_string(),
            });
        }

        self.legs.insert(
            key,
            LegState::Prepared {
                account: account.clone(),
                amount,
            },
        );

        tracing::debug!(rail = %self.name, settlement = %settlement_id, %leg, "Leg prepared");

        Ok(PrepareOutcome::Prepared(PrepareToken {
            rail: self.name.clone(),
            settlement_id,
            leg,
            account: account.clone(),
            amount,
        }))
    }

    async fn commit(&self, token: &PrepareToken) -> Result<CommitResult> {
        tokio::time::sleep(self.latency).await;

        let key = (token.settlement_id, token.leg);
        let txn_id = self.txn_id(token.settlement_id, token.leg);

        // Idempotent replay of a committed leg
        if let Some(state) = self.legs.get(&key) {
            if let LegState::Committed { txn_id } = &*state {
                return Ok(CommitResult::Committed {
                    txn_id: txn_id.clone(),
                });
            }
            if matches!(&*state, LegState::RolledBack) {
                return Ok(CommitResult::Failed {
                    reason: "leg was rolled back".to_string(),
                });
            }
        } else {
            return Err(Error::UnknownToken(token.settlement_id));
        }

        match self.mode(token.leg) {
            FailureMode::FailCommit => {
                self.legs.insert(key, LegState::RolledBack);
                tracing::warn!(rail = %self.name, leg = %token.leg, "Commit failed by script");
                Ok(CommitResult::Failed {
                    reason: "scripted commit failure".to_string(),
                })
            }
            FailureMode::IndeterminateThenCommitted => {
                // The transfer actually landed; only the response was lost
                self.legs.insert(key, LegState::Committed { txn_id });
                self.scripts.insert(token.leg, FailureMode::None);
                Ok(CommitResult::Indeterminate)
            }
            FailureMode::IndeterminateThenRolledBack => {
                self.legs.insert(key, LegState::RolledBack);
                self.scripts.insert(token.leg, FailureMode::None);
                Ok(CommitResult::Indeterminate)
            }
            _ => {
                self.legs.insert(
                    key,
                    LegState::Committed {
                        txn_id: txn_id.clone(),
                    },
                );
                tracing::debug!(
                    rail = %self.name,
                    settlement = %token.settlement_id,
                    leg = %token.leg,
                    txn = %txn_id,
                    "Leg committed"
                );
                Ok(CommitResult::Committed { txn_id })
            }
        }
    }

    async fn rollback(&self, token: &PrepareToken) -> Result<()> {
        let key = (token.settlement_id, token.leg);

        match self.legs.get(&key).map(|s| s.clone()) {
            Some(LegState::Committed { .. }) => Err(Error::Other(
                "cannot roll back a committed leg; compensate instead".to_string(),
            )),
            Some(_) | None => {
                self.legs.insert(key, LegState::RolledBack);
                tracing::debug!(rail = %self.name, leg = %token.leg, "Leg rolled back");
                Ok(())
            }
        }
    }

    async fn compensate(&self, token: &PrepareToken) -> Result<String> {
        let key = (token.settlement_id, token.leg);

        match self.legs.get(&key).map(|s| s.clone()) {
            Some(LegState::Committed { txn_id }) => {
                let comp_id = format!("COMP-{}", txn_id);
                tracing::warn!(
                    rail = %self.name,
                    leg = %token.leg,
                    original = %txn_id,
                    compensation = %comp_id,
                    "Leg compensated"
                );
                Ok(comp_id)
            }
            _ => Err(Error::Other("only committed legs can be compensated".to_string())),
        }
    }

    async fn status(&self, settlement_id: Uuid, leg: LegKind) -> Result<TerminalStatus> {
        match self.legs.get(&(settlement_id, leg)).map(|s| s.clone()) {
            Some(LegState::Committed { txn_id }) => Ok(TerminalStatus::Committed { txn_id }),
            Some(LegState::RolledBack) | None => Ok(TerminalStatus::RolledBack),
            Some(LegState::Prepared { .. }) => Ok(TerminalStatus::Unknown),
        }
    }

    async fn health(&self) -> RailHealth {
        RailHealth {
            rail: self.name.clone(),
            up: *self.up.read(),
            latency_ms: self.latency.as_millis() as u64,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rail() -> SimulatedRail {
        SimulatedRail::new("rtp", 1, Duration::from_millis(0))
    }

    async fn prepared(rail: &SimulatedRail, settlement: Uuid) -> PrepareToken {
        match rail
            .prepare(settlement, LegKind::CreditSupplier, &AccountId::new("SUP-001"), dec!(100))
            .await
            .unwrap()
        {
            PrepareOutcome::Prepared(token) => token,
            PrepareOutcome::Rejected { reason } => panic!("unexpected rejection: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_prepare_commit_idempotent() {
        let rail = rail();
        let settlement = Uuid::now_v7();

        let token = prepared(&rail, settlement).await;
        let first = rail.commit(&token).await.unwrap();
        let second = rail.commit(&token).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_rollback_prepared_leg() {
        let rail = rail();
        let settlement = Uuid::now_v7();

        let token = prepared(&rail, settlement).await;
        rail.rollback(&token).await.unwrap();

        assert_eq!(
            rail.status(settlement, LegKind::CreditSupplier).await.unwrap(),
            TerminalStatus::RolledBack
        );

        // A rolled-back leg will not commit
        assert!(matches!(
            rail.commit(&token).await.unwrap(),
            CommitResult::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_committed_leg_cannot_roll_back() {
        let rail = rail();
        let settlement = Uuid::now_v7();

        let token = prepared(&rail, settlement).await;
        rail.commit(&token).await.unwrap();
        assert!(rail.rollback(&token).await.is_err());

        let comp = rail.compensate(&token).await.unwrap();
        assert!(comp.starts_with("COMP-"));
    }

    #[tokio::test]
    async fn test_indeterminate_then_committed_resolves() {
        let rail = rail();
        rail.script(LegKind::DebitBuyer, FailureMode::IndeterminateThenCommitted);
        let settlement = Uuid::now_v7();

        let token = match rail
            .prepare(settlement, LegKind::DebitBuyer, &AccountId::new("BUY-001"), dec!(100))
            .await
            .unwrap()
        {
            PrepareOutcome::Prepared(t) => t,
            _ => panic!(),
        };

        assert_eq!(rail.commit(&token).await.unwrap(), CommitResult::Indeterminate);

        // The status endpoint gives the terminal answer
        assert!(matches!(
            rail.status(settlement, LegKind::DebitBuyer).await.unwrap(),
            TerminalStatus::Committed { .. }
        ));
    }

    #[tokio::test]
    async fn test_scripted_prepare_rejection() {
        let rail = rail();
        rail.script(LegKind::AdvanceCapital, FailureMode::RejectPrepare);

        let outcome = rail
            .prepare(
                Uuid::now_v7(),
                LegKind::AdvanceCapital,
                &AccountId::new("CAP-001"),
                dec!(100),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, PrepareOutcome::Rejected { .. }));
    }
}
