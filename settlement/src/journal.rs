//! Durable settlement and leg log
//!
//! Every leg outcome is recorded before it is acted on, keyed by
//! settlement id, so a resumed coordinator never re-prepares a committed
//! leg and never commits a rolled-back one. `invoice_id` is unique: the
//! storage layer is what makes settlement exactly-once.

use crate::{
    types::{Settlement, SettlementLeg, SettlementStatus},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rails::{LegKind, PrepareToken};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Where a leg stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LegState {
    /// Not yet offered to the rail
    Planned,
    /// Reservation taken
    Prepared,
    /// Funds moved
    Committed,
    /// Reservation cancelled
    RolledBack,
    /// Committed then reversed with correcting entries
    Compensated,
}

/// One leg's journal entry
#[derive(Debug, Clone)]
pub struct LegRecord {
    pub leg: SettlementLeg,
    pub state: LegState,
    pub token: Option<PrepareToken>,
    /// Journal entries this leg produced
    pub entry_seqs: Vec<u64>,
}

/// One settlement's journal entry
#[derive(Debug, Clone)]
pub struct SettlementRecord {
    pub settlement: Settlement,
    pub legs: HashMap<LegKind, LegRecord>,
}

impl SettlementRecord {
    /// Leg record by kind
    pub fn leg(&self, kind: LegKind) -> Option<&LegRecord> {
        self.legs.get(&kind)
    }

    /// Legs currently in the given state
    pub fn legs_in_state(&self, state: LegState) -> Vec<&LegRecord> {
        self.legs.values().filter(|l| l.state == state).collect()
    }
}

/// In-process settlement journal
pub struct SettlementJournal {
    by_id: DashMap<Uuid, SettlementRecord>,
    by_invoice: DashMap<Uuid, Uuid>,
}

impl SettlementJournal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_invoice: DashMap::new(),
        }
    }

    /// Record a new settlement with its three planned legs.
    ///
    /// Fails if the invoice already has one; this is the exactly-once guard.
    pub fn create(&self, settlement: Settlement, legs: Vec<SettlementLeg>) -> Result<()> {
        debug_assert_eq!(legs.len(), 3);

        match self.by_invoice.entry(settlement.invoice_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::AlreadySettling(settlement.invoice_id));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(settlement.id);
            }
        }

        let legs = legs
            .into_iter()
            .map(|leg| {
                (
                    leg.leg,
                    LegRecord {
                        leg,
                        state: LegState::Planned,
                        token: None,
                        entry_seqs: Vec::new(),
                    },
                )
            })
            .collect();

        self.by_id.insert(
            settlement.id,
            SettlementRecord { settlement, legs },
        );

        Ok(())
    }

    /// Fetch by settlement id
    pub fn get(&self, settlement_id: Uuid) -> Result<SettlementRecord> {
        self.by_id
            .get(&settlement_id)
            .map(|r| r.clone())
            .ok_or(Error::NotFound(settlement_id))
    }

    /// Fetch by invoice id
    pub fn get_by_invoice(&self, invoice_id: Uuid) -> Option<SettlementRecord> {
        let settlement_id = self.by_invoice.get(&invoice_id)?;
        self.by_id.get(&settlement_id).map(|r| r.clone())
    }

    /// Settlement rows for an invoice (0 or 1 by construction)
    pub fn count_for_invoice(&self, invoice_id: Uuid) -> usize {
        usize::from(self.by_invoice.contains_key(&invoice_id))
    }

    /// Mutate one leg's record
    pub fn update_leg<F>(&self, settlement_id: Uuid, kind: LegKind, f: F) -> Result<()>
    where
        F: FnOnce(&mut LegRecord),
    {
        let mut record = self
            .by_id
            .get_mut(&settlement_id)
            .ok_or(Error::NotFound(settlement_id))?;

        let leg = record
            .legs
            .get_mut(&kind)
            .ok_or_else(|| Error::Other(format!("No {} leg on settlement {}", kind, settlement_id)))?;

        f(leg);
        Ok(())
    }

    /// Update settlement status, stamping completion time for terminal
    /// states.
    pub fn set_status(&self, settlement_id: Uuid, status: SettlementStatus) -> Result<Settlement> {
        let mut record = self
            .by_id
            .get_mut(&settlement_id)
            .ok_or(Error::NotFound(settlement_id))?;

        record.settlement.status = status;
        if matches!(
            status,
            SettlementStatus::Completed | SettlementStatus::Failed | SettlementStatus::RolledBack
        ) && record.settlement.completed_at.is_none()
        {
            record.settlement.completed_at = Some(Utc::now());
        }

        Ok(record.settlement.clone())
    }

    /// Pin the rail the settlement stays on
    pub fn set_rail(&self, settlement_id: Uuid, rail: &str) -> Result<()> {
        let mut record = self
            .by_id
            .get_mut(&settlement_id)
            .ok_or(Error::NotFound(settlement_id))?;
        record.settlement.rail = Some(rail.to_string());
        Ok(())
    }

    /// In-progress settlements older than the cutoff (orphan sweep)
    pub fn in_progress_older_than(&self, age: Duration) -> Vec<SettlementRecord> {
        let cutoff: DateTime<Utc> = Utc::now() - age;
        self.by_id
            .iter()
            .filter(|r| {
                r.settlement.status == SettlementStatus::InProgress
                    && r.settlement.started_at < cutoff
            })
            .map(|r| r.clone())
            .collect()
    }

    /// Total settlements recorded
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when no settlements recorded
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for SettlementJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{AccountId, Currency};
    use rust_decimal::Decimal;

    fn settlement(invoice_id: Uuid) -> (Settlement, Vec<SettlementLeg>) {
        let id = Uuid::now_v7();
        let settlement = Settlement {
            id,
            invoice_id,
            quote_id: Uuid::now_v7(),
            supplier: AccountId::new("SUP-001"),
            buyer: AccountId::new("BUY-001"),
            provider: AccountId::new("CAP-001"),
            amount: Decimal::from(50000),
            currency: Currency::USD,
            discount_rate: Decimal::new(6, 2),
            buyer_cost: Decimal::from(52500),
            rail: None,
            status: SettlementStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
        };
        let legs = vec![
            SettlementLeg {
                settlement_id: id,
                leg: LegKind::CreditSupplier,
                account: AccountId::new("SUP-001"),
                amount: Decimal::from(50000),
                rail_txn_id: None,
            },
            SettlementLeg {
                settlement_id: id,
                leg: LegKind::DebitBuyer,
                account: AccountId::new("BUY-001"),
                amount: Decimal::from(52500),
                rail_txn_id: None,
            },
            SettlementLeg {
                settlement_id: id,
                leg: LegKind::AdvanceCapital,
                account: AccountId::new("CAP-001"),
                amount: Decimal::from(50000),
                rail_txn_id: None,
            },
        ];
        (settlement, legs)
    }

    #[test]
    fn test_invoice_unique() {
        let journal = SettlementJournal::new();
        let invoice = Uuid::now_v7();

        let (first, legs) = settlement(invoice);
        journal.create(first, legs).unwrap();

        let (second, legs) = settlement(invoice);
        assert!(matches!(
            journal.create(second, legs),
            Err(Error::AlreadySettling(_))
        ));

        assert_eq!(journal.count_for_invoice(invoice), 1);
    }

    #[test]
    fn test_leg_state_tracking() {
        let journal = SettlementJournal::new();
        let invoice = Uuid::now_v7();
        let (s, legs) = settlement(invoice);
        let id = s.id;
        journal.create(s, legs).unwrap();

        journal
            .update_leg(id, LegKind::CreditSupplier, |leg| {
                leg.state = LegState::Committed;
                leg.leg.rail_txn_id = Some("TXN-1".to_string());
            })
            .unwrap();

        let record = journal.get(id).unwrap();
        assert_eq!(record.leg(LegKind::CreditSupplier).unwrap().state, LegState::Committed);
        assert_eq!(record.legs_in_state(LegState::Planned).len(), 2);
    }

    #[test]
    fn test_terminal_status_stamps_completion() {
        let journal = SettlementJournal::new();
        let (s, legs) = settlement(Uuid::now_v7());
        let id = s.id;
        journal.create(s, legs).unwrap();

        let updated = journal.set_status(id, SettlementStatus::Completed).unwrap();
        assert!(updated.completed_at.is_some());
    }

    #[test]
    fn test_orphan_scan() {
        let journal = SettlementJournal::new();
        let (mut s, legs) = settlement(Uuid::now_v7());
        s.started_at = Utc::now() - Duration::hours(2);
        journal.create(s, legs).unwrap();

        assert_eq!(journal.in_progress_older_than(Duration::hours(1)).len(), 1);
        assert!(journal.in_progress_older_than(Duration::hours(3)).is_empty());
    }
}
