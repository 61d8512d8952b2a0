//! Lifecycle scheduler
//!
//! Periodic jobs with bounded lag: invoice expiry, stale-auction close,
//! orphan credit-reservation release, orphan prepared-leg resolution,
//! and ledger reconciliation. Every job is a plain method so tests drive
//! time deterministically; `spawn` wires them to interval tasks.

use crate::{coordinator::SettlementCoordinator, SettlementConfig};
use accounts::AccountRegistry;
use chrono::Duration;
use enforcement::{DecisionLedger, EnforcementAction, FreezeSwitch, RecordKind};
use invoices::{InvoiceStatus, InvoiceStore};
use ledger_core::{Ledger, ReconcileReport};
use pricing::AuctionBook;
use std::sync::Arc;
use uuid::Uuid;

const ACTOR: &str = "lifecycle-scheduler";

/// The background job runner
pub struct LifecycleScheduler {
    invoices: Arc<InvoiceStore>,
    auctions: Arc<AuctionBook>,
    registry: Arc<AccountRegistry>,
    coordinator: Arc<SettlementCoordinator>,
    ledger: Arc<Ledger>,
    freeze: Arc<FreezeSwitch>,
    decisions: Arc<DecisionLedger>,
    config: SettlementConfig,
}

impl LifecycleScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        invoices: Arc<InvoiceStore>,
        auctions: Arc<AuctionBook>,
        registry: Arc<AccountRegistry>,
        coordinator: Arc<SettlementCoordinator>,
        ledger: Arc<Ledger>,
        freeze: Arc<FreezeSwitch>,
        decisions: Arc<DecisionLedger>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            invoices,
            auctions,
            registry,
            coordinator,
            ledger,
            freeze,
            decisions,
            config,
        }
    }

    /// Expire pending invoices older than the configured window
    pub fn expire_pending_invoices(&self) -> usize {
        let aged = self
            .invoices
            .pending_older_than(Duration::hours(self.config.invoice_expiry_h));

        let mut expired = 0;
        for invoice in aged {
            match self.invoices.transition(
                invoice.id,
                InvoiceStatus::Expired,
                ACTOR,
                "pending past expiry window",
            ) {
                Ok(_) => expired += 1,
                Err(e) => {
                    tracing::warn!(invoice = %invoice.id, error = %e, "Expiry transition failed")
                }
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Expired stale pending invoices");
        }
        expired
    }

    /// Close auctions whose bidding window has passed
    pub fn close_stale_auctions(&self) -> usize {
        let stale: Vec<Uuid> = self.auctions.stale_open_auctions();

        let mut closed = 0;
        for invoice_id in stale {
            match self.auctions.close_and_select(invoice_id) {
                Ok(_) => closed += 1,
                Err(e) => {
                    tracing::warn!(invoice = %invoice_id, error = %e, "Stale auction close failed")
                }
            }
        }

        closed
    }

    /// Release credit holds that outlived their settlement attempt
    pub fn release_orphan_reservations(&self) -> usize {
        self.registry
            .release_orphan_reservations(Duration::minutes(self.config.orphan_reservation_m))
    }

    /// Resolve in-progress settlements with prepared or unresolved legs
    pub async fn sweep_orphan_settlements(&self) -> usize {
        self.coordinator
            .sweep_orphans(Duration::minutes(self.config.orphan_leg_sweep_m))
            .await
    }

    /// Reconcile the journal and verify the audit chain. An imbalance
    /// or a tampered chain freezes the system.
    pub fn reconcile_ledger(&self) -> crate::Result<ReconcileReport> {
        if let Err(e) = self.decisions.verify_chain() {
            self.freeze
                .freeze(format!("decision ledger tamper detected: {}", e), ACTOR);
            return Err(e.into());
        }

        let report = self.ledger.reconcile(0)?;

        self.decisions.record(
            RecordKind::InvariantCheck {
                invariant: "ledger-balanced".to_string(),
                phase: enforcement::Phase::Post,
            },
            report.balanced,
            if report.balanced {
                EnforcementAction::Proceed
            } else {
                EnforcementAction::Freeze
            },
            format!("imbalance {}", report.imbalance),
            serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
            ACTOR,
        )?;

        if !report.balanced {
            self.freeze.freeze(
                format!("ledger reconciliation imbalance of {}", report.imbalance),
                ACTOR,
            );
        }

        Ok(report)
    }

    /// Spawn all jobs on their intervals
    pub fn spawn(self: Arc<Self>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tick.tick().await;
                scheduler.expire_pending_invoices();
            }
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                tick.tick().await;
                scheduler.close_stale_auctions();
            }
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tick.tick().await;
                scheduler.release_orphan_reservations();
            }
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                tick.tick().await;
                scheduler.sweep_orphan_settlements().await;
            }
        });

        let scheduler = self;
        tokio::spawn(async move {
            let period = std::time::Duration::from_secs(
                scheduler.config.reconcile_interval_m.max(1) as u64 * 60,
            );
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                if let Err(e) = scheduler.reconcile_ledger() {
                    tracing::error!(error = %e, "Reconciliation job failed");
                }
            }
        });
    }
}
