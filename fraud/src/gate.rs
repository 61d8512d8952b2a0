//! Admission and freshness policy around the score oracle
//!
//! Scores above the threshold never progress past fraud review. At
//! acceptance a stale score is recomputed before the gate can pass; the
//! pre-commit barrier then re-checks against the timestamp pinned at
//! acceptance, so a recomputation inside the critical section
//! invalidates the acceptance.

use crate::{
    scorer::{FraudScore, ScoreOracle},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use invoices::Invoice;
use std::sync::Arc;

/// What the gate decided
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Score under threshold; the invoice may progress
    Clear { score: f64, computed_at: DateTime<Utc> },
    /// Score over threshold; hold for review
    Review { score: f64, computed_at: DateTime<Utc> },
}

impl GateDecision {
    /// The score behind the decision
    pub fn score(&self) -> f64 {
        match self {
            GateDecision::Clear { score, .. } | GateDecision::Review { score, .. } => *score,
        }
    }

    /// When the score was computed
    pub fn computed_at(&self) -> DateTime<Utc> {
        match self {
            GateDecision::Clear { computed_at, .. } | GateDecision::Review { computed_at, .. } => {
                *computed_at
            }
        }
    }
}

/// Fraud gate
pub struct FraudGate {
    oracle: Arc<dyn ScoreOracle>,
    threshold: f64,
    max_age: Duration,
}

impl FraudGate {
    /// Create with the production policy knobs
    pub fn new(oracle: Arc<dyn ScoreOracle>, threshold: f64, max_age: Duration) -> Self {
        Self {
            oracle,
            threshold,
            max_age,
        }
    }

    /// The oracle behind the gate
    pub fn oracle(&self) -> &Arc<dyn ScoreOracle> {
        &self.oracle
    }

    fn decide(&self, score: &FraudScore) -> GateDecision {
        if score.score > self.threshold {
            GateDecision::Review {
                score: score.score,
                computed_at: score.computed_at,
            }
        } else {
            GateDecision::Clear {
                score: score.score,
                computed_at: score.computed_at,
            }
        }
    }

    /// Score a freshly submitted invoice
    pub async fn score_at_submission(&self, invoice: &Invoice) -> Result<GateDecision> {
        let score = self.oracle.score(invoice).await?;
        Ok(self.decide(&score))
    }

    /// Gate at acceptance.
    ///
    /// Uses the stored score if it is under the age window; otherwise
    /// recomputes first. The returned decision carries the timestamp the
    /// caller must pin for the pre-commit re-check.
    pub async fn gate_at_acceptance(&self, invoice: &Invoice) -> Result<GateDecision> {
        let stored = match (invoice.fraud_score, invoice.fraud_scored_at) {
            (Some(score), Some(at)) => Some((score, at)),
            _ => None,
        };

        let fresh_enough =
            stored.is_some_and(|(_, at)| Utc::now() - at < self.max_age);

        if fresh_enough {
            let (score, at) = stored.ok_or(Error::NoScore(invoice.id))?;
            return Ok(self.decide(&FraudScore {
                score,
                computed_at: at,
                signals: vec![],
            }));
        }

        tracing::info!(invoice = %invoice.id, "Fraud score stale at acceptance; recomputing");
        let score = self.oracle.score(invoice).await?;
        Ok(self.decide(&score))
    }

    /// Pre-commit re-check: the score on file must carry the identical
    /// timestamp that acceptance pinned.
    pub fn verify_pinned(
        &self,
        invoice: &Invoice,
        pinned_at: DateTime<Utc>,
    ) -> Result<()> {
        match invoice.fraud_scored_at {
            Some(at) if at == pinned_at => Ok(()),
            Some(_) => Err(Error::Other(
                "fraud score recomputed during settlement".to_string(),
            )),
            None => Err(Error::NoScore(invoice.id)),
        }
    }

    /// The admission threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::FixedOracle;
    use invoices::{InvoiceStatus, LineItem};
    use ledger_core::{AccountId, Currency};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn invoice(score: Option<f64>, scored_at: Option<DateTime<Utc>>) -> Invoice {
        Invoice {
            id: Uuid::now_v7(),
            supplier: AccountId::new("SUP-001"),
            buyer: AccountId::new("BUY-001"),
            amount: dec!(50000),
            currency: Currency::USD,
            terms_days: 30,
            line_items: vec![LineItem {
                description: "x".to_string(),
                quantity: 1,
                unit_price: dec!(50000),
            }],
            content_hash: [0u8; 32],
            status: InvoiceStatus::Pending,
            fraud_score: score,
            fraud_scored_at: scored_at,
            purchase_order_id: None,
            notes: None,
            created_at: Utc::now(),
            accepted_at: None,
            settled_at: None,
        }
    }

    fn gate(fixed: f64) -> FraudGate {
        FraudGate::new(Arc::new(FixedOracle::new(fixed)), 0.75, Duration::hours(24))
    }

    #[tokio::test]
    async fn test_fresh_stored_score_used() {
        let gate = gate(0.99); // Oracle would flag; stored score must win
        let inv = invoice(Some(0.60), Some(Utc::now() - Duration::hours(1)));

        let decision = gate.gate_at_acceptance(&inv).await.unwrap();
        assert!(matches!(decision, GateDecision::Clear { .. }));
        assert_eq!(decision.score(), 0.60);
    }

    #[tokio::test]
    async fn test_stale_score_recomputed() {
        // Submitted at 0.60, recomputed 26h later at 0.82: review
        let gate = gate(0.82);
        let inv = invoice(Some(0.60), Some(Utc::now() - Duration::hours(26)));

        let decision = gate.gate_at_acceptance(&inv).await.unwrap();
        assert!(matches!(decision, GateDecision::Review { .. }));
        assert_eq!(decision.score(), 0.82);
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let inv = invoice(None, None);

        let decision = gate(0.7499).gate_at_acceptance(&inv).await.unwrap();
        assert!(matches!(decision, GateDecision::Clear { .. }));

        let decision = gate(0.7501).gate_at_acceptance(&inv).await.unwrap();
        assert!(matches!(decision, GateDecision::Review { .. }));
    }

    #[tokio::test]
    async fn test_pinned_timestamp_verification() {
        let gate = gate(0.1);
        let pinned = Utc::now() - Duration::minutes(2);
        let inv = invoice(Some(0.3), Some(pinned));

        assert!(gate.verify_pinned(&inv, pinned).is_ok());
        assert!(gate.verify_pinned(&inv, Utc::now()).is_err());
    }
}
