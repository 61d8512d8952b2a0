//! Signal-based fraud scorer
//!
//! The default `ScoreOracle` implementation. Combines weighted signals
//! computed from submission history: velocity, relationship age, amount
//! deviation, round amounts, and off-hours submission. External scoring
//! models plug in behind the same trait.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use invoices::Invoice;
use ledger_core::AccountId;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// One contributing signal
#[derive(Debug, Clone, Serialize)]
pub struct SignalScore {
    /// Signal name
    pub signal: &'static str,
    /// Raw strength in [0, 1]
    pub strength: f64,
    /// Weight in the blend
    pub weight: f64,
}

impl SignalScore {
    /// Weighted contribution
    pub fn contribution(&self) -> f64 {
        self.strength * self.weight
    }
}

/// A computed fraud score
#[derive(Debug, Clone, Serialize)]
pub struct FraudScore {
    /// Blended score in [0, 1]
    pub score: f64,
    /// When it was computed
    pub computed_at: DateTime<Utc>,
    /// Signals that contributed
    pub signals: Vec<SignalScore>,
}

impl FraudScore {
    /// Signals with non-zero strength
    pub fn triggered(&self) -> Vec<&SignalScore> {
        self.signals.iter().filter(|s| s.strength > 0.0).collect()
    }
}

/// External score oracle
#[async_trait]
pub trait ScoreOracle: Send + Sync {
    /// Compute a fresh score for the invoice
    async fn score(&self, invoice: &Invoice) -> Result<FraudScore>;
}

#[derive(Default)]
struct PairHistory {
    amounts: Vec<Decimal>,
}

/// Default oracle: weighted heuristics over submission history
pub struct SignalScorer {
    /// (supplier, buyer) -> prior invoice amounts
    pairs: RwLock<HashMap<(AccountId, AccountId), PairHistory>>,
    /// supplier -> recent submission times
    velocity: RwLock<HashMap<AccountId, Vec<DateTime<Utc>>>>,
}

impl SignalScorer {
    /// Submissions per hour beyond which velocity maxes out
    const VELOCITY_LIMIT: usize = 10;

    /// Create an empty scorer
    pub fn new() -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            velocity: RwLock::new(HashMap::new()),
        }
    }

    /// Record a submission so later scores see it
    pub fn observe(&self, invoice: &Invoice) {
        self.pairs
            .write()
            .entry((invoice.supplier.clone(), invoice.buyer.clone()))
            .or_default()
            .amounts
            .push(invoice.amount);

        self.velocity
            .write()
            .entry(invoice.supplier.clone())
            .or_default()
            .push(invoice.created_at);
    }

    fn check_velocity(&self, supplier: &AccountId, now: DateTime<Utc>) -> SignalScore {
        let cutoff = now - chrono::Duration::hours(1);
        let recent = self
            .velocity
            .read()
            .get(supplier)
            .map(|times| times.iter().filter(|t| **t >= cutoff).count())
            .unwrap_or(0);

        let strength = (recent as f64 / Self::VELOCITY_LIMIT as f64).min(1.0);
        SignalScore {
            signal: "velocity",
            strength: if recent > Self::VELOCITY_LIMIT { 1.0 } else { strength * 0.5 },
            weight: 0.25,
        }
    }

    fn check_new_relationship(&self, supplier: &AccountId, buyer: &AccountId) -> SignalScore {
        let history_len = self
            .pairs
            .read()
            .get(&(supplier.clone(), buyer.clone()))
            .map(|h| h.amounts.len())
            .unwrap_or(0);

        SignalScore {
            signal: "new-relationship",
            strength: if history_len < 3 { 0.6 } else { 0.0 },
            weight: 0.15,
        }
    }

    fn check_unusual_amount(
        &self,
        supplier: &AccountId,
        buyer: &AccountId,
        amount: Decimal,
    ) -> SignalScore {
        let pairs = self.pairs.read();
        let history = pairs.get(&(supplier.clone(), buyer.clone()));

        let strength = match history {
            Some(h) if !h.amounts.is_empty() => {
                let mean: Decimal =
                    h.amounts.iter().copied().sum::<Decimal>() / Decimal::from(h.amounts.len());
                if mean > Decimal::ZERO && amount > mean * Decimal::from(3) {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        SignalScore {
            signal: "unusual-amount",
            strength,
            weight: 0.25,
        }
    }

    fn check_round_amount(&self, amount: Decimal) -> SignalScore {
        let round = amount >= Decimal::from(1000) && amount % Decimal::from(1000) == Decimal::ZERO;
        SignalScore {
            signal: "round-amount",
            strength: if round { 0.3 } else { 0.0 },
            weight: 0.10,
        }
    }

    fn check_off_hours(&self, created_at: DateTime<Utc>) -> SignalScore {
        let hour = created_at.hour();
        let off_hours = !(6..22).contains(&hour);
        SignalScore {
            signal: "off-hours",
            strength: if off_hours { 0.4 } else { 0.0 },
            weight: 0.10,
        }
    }
}

impl Default for SignalScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScoreOracle for SignalScorer {
    async fn score(&self, invoice: &Invoice) -> Result<FraudScore> {
        let now = Utc::now();

        let signals = vec![
            self.check_velocity(&invoice.supplier, now),
            self.check_new_relationship(&invoice.supplier, &invoice.buyer),
            self.check_unusual_amount(&invoice.supplier, &invoice.buyer, invoice.amount),
            self.check_round_amount(invoice.amount),
            self.check_off_hours(invoice.created_at),
        ];

        let score: f64 = signals.iter().map(|s| s.contribution()).sum::<f64>().min(1.0);

        tracing::debug!(
            invoice = %invoice.id,
            score,
            triggered = signals.iter().filter(|s| s.strength > 0.0).count(),
            "Fraud score computed"
        );

        Ok(FraudScore {
            score,
            computed_at: now,
            signals,
        })
    }
}

/// Fixed-score oracle for tests
pub struct FixedOracle {
    score: parking_lot::Mutex<f64>,
}

impl FixedOracle {
    /// Always return `score`
    pub fn new(score: f64) -> Self {
        Self {
            score: parking_lot::Mutex::new(score),
        }
    }

    /// Change the returned score
    pub fn set(&self, score: f64) {
        *self.score.lock() = score;
    }
}

#[async_trait]
impl ScoreOracle for FixedOracle {
    async fn score(&self, _invoice: &Invoice) -> Result<FraudScore> {
        Ok(FraudScore {
            score: *self.score.lock(),
            computed_at: Utc::now(),
            signals: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoices::{InvoiceDraft, InvoiceStatus, LineItem};
    use ledger_core::Currency;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn invoice(amount: Decimal) -> Invoice {
        Invoice {
            id: Uuid::now_v7(),
            supplier: AccountId::new("SUP-001"),
            buyer: AccountId::new("BUY-001"),
            amount,
            currency: Currency::USD,
            terms_days: 30,
            line_items: vec![LineItem {
                description: "x".to_string(),
                quantity: 1,
                unit_price: amount,
            }],
            content_hash: invoices::content_hash(
                &InvoiceDraft {
                    supplier: AccountId::new("SUP-001"),
                    buyer: AccountId::new("BUY-001"),
                    currency: Currency::USD,
                    terms_days: 30,
                    line_items: vec![],
                    purchase_order_id: None,
                    notes: None,
                },
                amount,
            ),
            status: InvoiceStatus::Pending,
            fraud_score: None,
            fraud_scored_at: None,
            purchase_order_id: None,
            notes: None,
            created_at: Utc::now(),
            accepted_at: None,
            settled_at: None,
        }
    }

    #[tokio::test]
    async fn test_score_in_unit_range() {
        let scorer = SignalScorer::new();
        let score = scorer.score(&invoice(dec!(50000))).await.unwrap();
        assert!((0.0..=1.0).contains(&score.score));
    }

    #[tokio::test]
    async fn test_established_pair_scores_lower() {
        let scorer = SignalScorer::new();
        let inv = invoice(dec!(5123.45));

        let fresh = scorer.score(&inv).await.unwrap();

        for _ in 0..5 {
            scorer.observe(&invoice(dec!(5123.45)));
        }
        let established = scorer.score(&inv).await.unwrap();

        assert!(established.score < fresh.score);
    }

    #[tokio::test]
    async fn test_unusual_amount_triggers() {
        let scorer = SignalScorer::new();

        for _ in 0..4 {
            scorer.observe(&invoice(dec!(1234.00)));
        }

        let spike = scorer.score(&invoice(dec!(999999.00))).await.unwrap();
        assert!(spike
            .triggered()
            .iter()
            .any(|s| s.signal == "unusual-amount"));
    }

    #[tokio::test]
    async fn test_fixed_oracle() {
        let oracle = FixedOracle::new(0.82);
        let score = oracle.score(&invoice(dec!(1000))).await.unwrap();
        assert_eq!(score.score, 0.82);
    }
}
