//! Invoice store
//!
//! Admission enforces the structural invariants (amount band, terms
//! whitelist, line-item sum, hash uniqueness, supplier != buyer, rate
//! limit) and is the only code allowed to write the status column, via
//! `transition`. Every transition attempt, legal or not, writes a
//! decision record; illegal attempts leave the row untouched.

use crate::{
    state::can_transition,
    types::{content_hash, Invoice, InvoiceDraft, InvoiceStatus},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use enforcement::{DecisionLedger, EnforcementAction, RecordKind};
use ledger_core::AccountId;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Admission limits
#[derive(Debug, Clone)]
pub struct AdmissionLimits {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub allowed_terms: Vec<u16>,
    pub rate_limit_per_hour: u32,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            min_amount: Decimal::from(100),
            max_amount: Decimal::from(10_000_000),
            allowed_terms: vec![0, 15, 30, 45, 60, 90],
            rate_limit_per_hour: 100,
        }
    }
}

/// Invoice store
pub struct InvoiceStore {
    invoices: DashMap<Uuid, Invoice>,
    by_hash: DashMap<[u8; 32], Uuid>,
    submissions: DashMap<AccountId, Vec<DateTime<Utc>>>,
    locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
    decisions: Arc<DecisionLedger>,
    limits: AdmissionLimits,
}

impl InvoiceStore {
    /// Create a store writing transition records to `decisions`
    pub fn new(decisions: Arc<DecisionLedger>, limits: AdmissionLimits) -> Self {
        Self {
            invoices: DashMap::new(),
            by_hash: DashMap::new(),
            submissions: DashMap::new(),
            locks: DashMap::new(),
            decisions,
            limits,
        }
    }

    /// Submit an invoice.
    ///
    /// Identical content returns the original invoice (idempotent); the
    /// bool is false for a replay. Structural validation happens here, in
    /// the admission path, before anything is stored.
    pub fn submit(&self, draft: InvoiceDraft) -> Result<(Invoice, bool)> {
        self.validate_draft(&draft)?;

        let amount = draft
            .line_items
            .iter()
            .map(|li| li.amount())
            .sum::<Decimal>();

        if amount < self.limits.min_amount || amount > self.limits.max_amount {
            return Err(Error::AmountOutOfRange {
                amount: amount.to_string(),
                min: self.limits.min_amount.to_string(),
                max: self.limits.max_amount.to_string(),
            });
        }

        let hash = content_hash(&draft, amount);

        // Hash dedup is atomic on the entry: a concurrent identical
        // submit sees the winner's id.
        if let Some(existing_id) = self.by_hash.get(&hash) {
            let existing = self
                .invoices
                .get(&existing_id)
                .map(|i| i.clone())
                .ok_or(Error::NotFound(*existing_id))?;
            tracing::info!(invoice = %existing.id, "Duplicate submission returned existing invoice");
            return Ok((existing, false));
        }

        self.check_rate_limit(&draft.supplier)?;

        let invoice = Invoice {
            id: Uuid::now_v7(),
            supplier: draft.supplier.clone(),
            buyer: draft.buyer.clone(),
            amount,
            currency: draft.currency,
            terms_days: draft.terms_days,
            line_items: draft.line_items,
            content_hash: hash,
            status: InvoiceStatus::Pending,
            fraud_score: None,
            fraud_scored_at: None,
            purchase_order_id: draft.purchase_order_id,
            notes: draft.notes,
            created_at: Utc::now(),
            accepted_at: None,
            settled_at: None,
        };

        match self.by_hash.entry(hash) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                // Lost the race to an identical submission
                let existing_id = *occupied.get();
                let existing = self
                    .invoices
                    .get(&existing_id)
                    .map(|i| i.clone())
                    .ok_or(Error::NotFound(existing_id))?;
                return Ok((existing, false));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(invoice.id);
            }
        }

        self.submissions
            .entry(draft.supplier.clone())
            .or_default()
            .push(invoice.created_at);

        tracing::info!(
            invoice = %invoice.id,
            supplier = %invoice.supplier,
            buyer = %invoice.buyer,
            amount = %invoice.amount,
            hash = %invoice.hash_prefix(),
            "Invoice admitted"
        );

        self.invoices.insert(invoice.id, invoice.clone());
        Ok((invoice, true))
    }

    fn validate_draft(&self, draft: &InvoiceDraft) -> Result<()> {
        if draft.supplier == draft.buyer {
            return Err(Error::SelfDealing);
        }

        if !self.limits.allowed_terms.contains(&draft.terms_days) {
            return Err(Error::InvalidTerms(draft.terms_days));
        }

        if draft.line_items.is_empty() {
            return Err(Error::InvalidLineItems("no line items".to_string()));
        }

        for (i, item) in draft.line_items.iter().enumerate() {
            if item.quantity == 0 {
                return Err(Error::InvalidLineItems(format!("line {} has zero quantity", i)));
            }
            if item.unit_price <= Decimal::ZERO {
                return Err(Error::InvalidLineItems(format!(
                    "line {} has non-positive unit price",
                    i
                )));
            }
            if item.description.trim().is_empty() {
                return Err(Error::InvalidLineItems(format!("line {} has no description", i)));
            }
        }

        Ok(())
    }

    fn check_rate_limit(&self, supplier: &AccountId) -> Result<()> {
        let cutoff = Utc::now() - Duration::hours(1);
        let mut entry = self.submissions.entry(supplier.clone()).or_default();
        entry.retain(|ts| *ts >= cutoff);

        let count = entry.len() as u32;
        if count >= self.limits.rate_limit_per_hour {
            return Err(Error::RateLimited {
                supplier: supplier.to_string(),
                count,
            });
        }

        Ok(())
    }

    /// Fetch an invoice
    pub fn get(&self, id: Uuid) -> Result<Invoice> {
        self.invoices
            .get(&id)
            .map(|i| i.clone())
            .ok_or(Error::NotFound(id))
    }

    /// Invoices where the account is supplier or buyer
    pub fn list_by_account(&self, account: &AccountId) -> Vec<Invoice> {
        self.invoices
            .iter()
            .filter(|i| &i.supplier == account || &i.buyer == account)
            .map(|i| i.clone())
            .collect()
    }

    /// True if an invoice with this content hash exists
    pub fn hash_exists(&self, hash: &[u8; 32]) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Per-invoice advisory lock. Status-changing operations hold this
    /// for their duration so concurrent acceptances serialize.
    pub fn advisory_lock(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// The single path that writes the status column.
    ///
    /// Illegal transitions (including any attempt to leave a terminal
    /// state) record a failed decision and do not touch the row.
    pub fn transition(
        &self,
        id: Uuid,
        to: InvoiceStatus,
        actor: &str,
        reason: &str,
    ) -> Result<Invoice> {
        let mut invoice = self
            .invoices
            .get_mut(&id)
            .ok_or(Error::NotFound(id))?;

        let from = invoice.status;
        let allowed = can_transition(from, to);

        self.decisions.record(
            RecordKind::Transition {
                invoice_id: id,
                from: from.to_string(),
                to: to.to_string(),
            },
            allowed,
            if allowed {
                EnforcementAction::Proceed
            } else {
                EnforcementAction::Rollback
            },
            reason,
            serde_json::Value::Null,
            actor,
        )?;

        if !allowed {
            tracing::warn!(invoice = %id, %from, %to, "Transition refused");
            if from.is_terminal() {
                return Err(Error::Terminal {
                    invoice_id: id,
                    status: from,
                });
            }
            return Err(Error::InvalidTransition {
                invoice_id: id,
                from,
                to,
            });
        }

        invoice.status = to;
        match to {
            InvoiceStatus::Accepted => invoice.accepted_at = Some(Utc::now()),
            InvoiceStatus::Settled => invoice.settled_at = Some(Utc::now()),
            _ => {}
        }

        tracing::info!(invoice = %id, %from, %to, actor, "Invoice transitioned");
        Ok(invoice.clone())
    }

    /// Attach a fraud score
    pub fn set_fraud_score(&self, id: Uuid, score: f64, computed_at: DateTime<Utc>) -> Result<()> {
        let mut invoice = self
            .invoices
            .get_mut(&id)
            .ok_or(Error::NotFound(id))?;
        invoice.fraud_score = Some(score);
        invoice.fraud_scored_at = Some(computed_at);
        Ok(())
    }

    /// Pending invoices created before the cutoff (expiry sweep)
    pub fn pending_older_than(&self, age: Duration) -> Vec<Invoice> {
        let cutoff = Utc::now() - age;
        self.invoices
            .iter()
            .filter(|i| i.status == InvoiceStatus::Pending && i.created_at < cutoff)
            .map(|i| i.clone())
            .collect()
    }

    /// Total stored invoices
    pub fn len(&self) -> usize {
        self.invoices.len()
    }

    /// True if the store is empty
    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LineItem;
    use ledger_core::{crypto::KeyPair, Currency};
    use rust_decimal_macros::dec;

    fn store() -> InvoiceStore {
        let decisions = Arc::new(DecisionLedger::new(Arc::new(KeyPair::generate())));
        InvoiceStore::new(decisions, AdmissionLimits::default())
    }

    fn draft(unit_price: Decimal) -> InvoiceDraft {
        InvoiceDraft {
            supplier: AccountId::new("SUP-001"),
            buyer: AccountId::new("BUY-001"),
            currency: Currency::USD,
            terms_days: 30,
            line_items: vec![LineItem {
                description: "Widget Model A".to_string(),
                quantity: 100,
                unit_price,
            }],
            purchase_order_id: None,
            notes: None,
        }
    }

    #[test]
    fn test_submit_and_get() {
        let store = store();
        let (invoice, created) = store.submit(draft(dec!(500.00))).unwrap();

        assert!(created);
        assert_eq!(invoice.amount, dec!(50000.00));
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(store.get(invoice.id).unwrap().id, invoice.id);
    }

    #[test]
    fn test_duplicate_submit_returns_original() {
        let store = store();
        let (first, created) = store.submit(draft(dec!(500.00))).unwrap();
        assert!(created);

        let (second, created) = store.submit(draft(dec!(500.00))).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_amount_boundaries() {
        let store = store();

        // 99.99 rejected
        let mut low = draft(dec!(99.99));
        low.line_items[0].quantity = 1;
        assert!(matches!(
            store.submit(low),
            Err(Error::AmountOutOfRange { .. })
        ));

        // 100.00 accepted
        let mut ok = draft(dec!(100.00));
        ok.line_items[0].quantity = 1;
        assert!(store.submit(ok).is_ok());
    }

    #[test]
    fn test_terms_whitelist() {
        let store = store();

        let mut bad = draft(dec!(500.00));
        bad.terms_days = 14;
        assert!(matches!(store.submit(bad), Err(Error::InvalidTerms(14))));

        let mut ok = draft(dec!(501.00));
        ok.terms_days = 15;
        assert!(store.submit(ok).is_ok());
    }

    #[test]
    fn test_self_dealing_rejected() {
        let store = store();
        let mut d = draft(dec!(500.00));
        d.buyer = d.supplier.clone();
        assert!(matches!(store.submit(d), Err(Error::SelfDealing)));
    }

    #[test]
    fn test_rate_limit() {
        let decisions = Arc::new(DecisionLedger::new(Arc::new(KeyPair::generate())));
        let mut limits = AdmissionLimits::default();
        limits.rate_limit_per_hour = 2;
        let store = InvoiceStore::new(decisions, limits);

        for i in 0..2 {
            let mut d = draft(dec!(500.00) + Decimal::from(i));
            d.notes = Some(format!("batch {}", i));
            store.submit(d).unwrap();
        }

        let d = draft(dec!(777.00));
        assert!(matches!(store.submit(d), Err(Error::RateLimited { .. })));
    }

    #[test]
    fn test_transition_happy_path() {
        let store = store();
        let (invoice, _) = store.submit(draft(dec!(500.00))).unwrap();

        store
            .transition(invoice.id, InvoiceStatus::Accepted, "buyer", "acceptance")
            .unwrap();
        let settled = store
            .transition(invoice.id, InvoiceStatus::Settled, "coordinator", "committed")
            .unwrap();

        assert_eq!(settled.status, InvoiceStatus::Settled);
        assert!(settled.accepted_at.is_some());
        assert!(settled.settled_at.is_some());
    }

    #[test]
    fn test_terminal_state_absorbs() {
        let store = store();
        let (invoice, _) = store.submit(draft(dec!(500.00))).unwrap();

        store
            .transition(invoice.id, InvoiceStatus::Rejected, "ops", "test")
            .unwrap();

        let result = store.transition(invoice.id, InvoiceStatus::Accepted, "buyer", "late");
        assert!(matches!(result, Err(Error::Terminal { .. })));

        // Row untouched
        assert_eq!(store.get(invoice.id).unwrap().status, InvoiceStatus::Rejected);
    }

    #[test]
    fn test_illegal_transition_recorded() {
        let decisions = Arc::new(DecisionLedger::new(Arc::new(KeyPair::generate())));
        let store = InvoiceStore::new(decisions.clone(), AdmissionLimits::default());
        let (invoice, _) = store.submit(draft(dec!(500.00))).unwrap();

        let before = decisions.len();
        let _ = store.transition(invoice.id, InvoiceStatus::Settled, "x", "skip accept");
        assert_eq!(decisions.len(), before + 1);

        let record = decisions.records().pop().unwrap();
        assert!(!record.passed);
    }

    #[test]
    fn test_pending_older_than() {
        let store = store();
        let (invoice, _) = store.submit(draft(dec!(500.00))).unwrap();

        assert!(store.pending_older_than(Duration::hours(48)).is_empty());

        store
            .invoices
            .get_mut(&invoice.id)
            .unwrap()
            .created_at = Utc::now() - Duration::hours(49);

        assert_eq!(store.pending_older_than(Duration::hours(48)).len(), 1);
    }
}
