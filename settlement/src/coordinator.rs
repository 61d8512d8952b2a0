//! Settlement coordinator
//!
//! Drives an accepted invoice through the pre-barrier, a two-phase
//! commit across the three legs, and the post-barrier. The coordinator
//! is a reducer over explicit outcomes: every pre-check and leg call
//! returns ok / reject / abort, and each path below either commits all
//! three legs or restores every balance.
//!
//! The settlement id is the idempotency key for every rail call, and
//! every leg outcome is journaled before it is acted on, so a retry or a
//! resumed coordinator never re-prepares a committed leg and never
//! commits a rolled-back one.

use crate::{
    config::SettlementConfig,
    journal::{LegState, SettlementJournal, SettlementRecord},
    types::{
        acceptance_message, AcceptanceRequest, FailureKind, RejectKind, Settlement,
        SettlementLeg, SettlementOutcome, SettlementStatus,
    },
    Error, Result,
};
use accounts::{AccountRegistry, AccountStatus, SanctionsScreen};
use chrono::{DateTime, Duration, Utc};
use enforcement::{
    context::{
        BidFacts, CheckContext, CreditFacts, FraudFacts, InvoiceFacts, LedgerFacts, PartyFacts,
        QuoteFacts, RailFacts, SettlementFacts, SignatureFacts,
    },
    DecisionLedger, EnforcementAction, FreezeSwitch, InvariantEngine, InvariantId, Phase,
    RecordKind,
};
use fraud::{FraudGate, GateDecision};
use invoices::{Invoice, InvoiceStatus, InvoiceStore};
use ledger_core::{AccountId, EntryDraft, EntryReason, EntryType, Ledger};
use pricing::{PricingQuote, QuoteBook};
use rails::{
    CommitResult, LegKind, PrepareOutcome, PrepareToken, RailAdapter, RailRouter, TerminalStatus,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const ACTOR: &str = "settlement-coordinator";

/// Pre-barrier invariants, run in dependency order
fn pre_barrier_ids() -> Vec<InvariantId> {
    vec![
        InvariantId("accounts-active"),
        InvariantId("kyc-verified"),
        InvariantId("sanctions-clear"),
        InvariantId("credit-within-limit"),
        InvariantId("quote-usable"),
        InvariantId("pricing-accurate"),
        InvariantId("fraud-score-fresh"),
        InvariantId("rails-healthy"),
        InvariantId("fx-rate-fresh"),
        InvariantId("bid-usable"),
        InvariantId("acceptance-signed"),
        InvariantId("settle-exactly-once"),
    ]
}

/// Post-barrier invariants (the deadline check runs separately: a late
/// settlement whose legs committed is an incident, not a rollback)
fn post_barrier_ids() -> Vec<InvariantId> {
    vec![
        InvariantId("accounts-active"),
        InvariantId("kyc-verified"),
        InvariantId("settle-exactly-once"),
        InvariantId("legs-atomic"),
        InvariantId("ledger-balanced"),
    ]
}

fn reject_kind_for(invariant: &InvariantId) -> RejectKind {
    match invariant.0 {
        "quote-usable" | "pricing-accurate" => RejectKind::StaleQuote,
        "acceptance-signed" => RejectKind::Unauthorized,
        "credit-within-limit" => RejectKind::CreditExceeded,
        "fraud-score-fresh" => RejectKind::Fraud,
        "accounts-active" | "kyc-verified" | "sanctions-clear" => RejectKind::Compliance,
        "rails-healthy" => RejectKind::NoRail,
        "settle-exactly-once" => RejectKind::Conflict,
        _ => RejectKind::PrecheckFailed,
    }
}

struct LegSpec {
    kind: LegKind,
    account: AccountId,
    amount: Decimal,
}

/// The settlement coordinator
pub struct SettlementCoordinator {
    ledger: Arc<Ledger>,
    engine: Arc<InvariantEngine>,
    decisions: Arc<DecisionLedger>,
    freeze: Arc<FreezeSwitch>,
    registry: Arc<AccountRegistry>,
    sanctions: Arc<SanctionsScreen>,
    invoices: Arc<InvoiceStore>,
    quotes: Arc<QuoteBook>,
    fraud_gate: Arc<FraudGate>,
    router: Arc<RailRouter>,
    journal: Arc<SettlementJournal>,
    config: SettlementConfig,
}

impl SettlementCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<Ledger>,
        engine: Arc<InvariantEngine>,
        freeze: Arc<FreezeSwitch>,
        registry: Arc<AccountRegistry>,
        sanctions: Arc<SanctionsScreen>,
        invoices: Arc<InvoiceStore>,
        quotes: Arc<QuoteBook>,
        fraud_gate: Arc<FraudGate>,
        router: Arc<RailRouter>,
        journal: Arc<SettlementJournal>,
        config: SettlementConfig,
    ) -> Self {
        let decisions = engine.decisions().clone();
        Self {
            ledger,
            engine,
            decisions,
            freeze,
            registry,
            sanctions,
            invoices,
            quotes,
            fraud_gate,
            router,
            journal,
            config,
        }
    }

    /// The settlement journal (read access for callers)
    pub fn journal(&self) -> &Arc<SettlementJournal> {
        &self.journal
    }

    /// Settle an accepted invoice, or reject/fail atomically.
    ///
    /// Repeating the call with the same quote returns the recorded
    /// outcome without new ledger writes.
    pub async fn settle(
        &self,
        invoice_id: Uuid,
        acceptance: AcceptanceRequest,
    ) -> Result<SettlementOutcome> {
        if self.freeze.is_frozen() {
            return Ok(SettlementOutcome::Rejected {
                kind: RejectKind::Frozen,
                detail: self
                    .freeze
                    .status()
                    .reason
                    .unwrap_or_else(|| "system frozen".to_string()),
            });
        }

        // Per-invoice ordering: one acceptance at a time
        let lock = self.invoices.advisory_lock(invoice_id);
        let _guard = lock.lock().await;

        // Idempotent replay / conflict detection
        if let Some(existing) = self.journal.get_by_invoice(invoice_id) {
            return self.replay_outcome(existing, &acceptance);
        }

        let started_at = Utc::now();
        let invoice = self.invoices.get(invoice_id)?;

        if !matches!(
            invoice.status,
            InvoiceStatus::Pending | InvoiceStatus::FraudReview
        ) {
            return Ok(SettlementOutcome::Rejected {
                kind: RejectKind::InvalidState,
                detail: format!("invoice is {}", invoice.status),
            });
        }

        // Fraud gate: refresh a stale score, then pin its timestamp for
        // the pre-commit re-check
        let gate = self.fraud_gate.gate_at_acceptance(&invoice).await?;
        if invoice.fraud_scored_at != Some(gate.computed_at()) {
            self.invoices
                .set_fraud_score(invoice_id, gate.score(), gate.computed_at())?;
        }
        let pinned_at = gate.computed_at();

        if let GateDecision::Review { score, .. } = gate {
            if invoice.status == InvoiceStatus::Pending {
                self.invoices.transition(
                    invoice_id,
                    InvoiceStatus::FraudReview,
                    ACTOR,
                    &format!("fraud score {:.4} above threshold", score),
                )?;
            }
            return Ok(SettlementOutcome::Rejected {
                kind: RejectKind::Fraud,
                detail: format!("fraud score {:.4}", score),
            });
        }

        let invoice = self.invoices.get(invoice_id)?;

        // Quote lookup; anything unusable is reported as stale
        let quote = match self.quotes.get(acceptance.quote_id) {
            Ok(q) => q,
            Err(pricing::Error::QuoteNotFound(id)) => {
                return Ok(SettlementOutcome::Rejected {
                    kind: RejectKind::StaleQuote,
                    detail: format!("unknown quote {}", id),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if quote.invoice_id != invoice_id {
            return Ok(SettlementOutcome::Rejected {
                kind: RejectKind::InvalidState,
                detail: "quote does not bind this invoice".to_string(),
            });
        }

        // Optimistic credit hold; released on every non-pending path
        let settlement_id = Uuid::now_v7();
        let reservation = match self
            .registry
            .reserve_credit(&invoice.buyer, quote.total_cost, Some(settlement_id))
            .await
        {
            Ok(r) => r,
            Err(accounts::Error::CreditExceeded { .. }) => {
                return Ok(SettlementOutcome::Rejected {
                    kind: RejectKind::CreditExceeded,
                    detail: "buyer credit limit exceeded".to_string(),
                })
            }
            Err(accounts::Error::NotActive { account, status }) => {
                return Ok(SettlementOutcome::Rejected {
                    kind: RejectKind::Compliance,
                    detail: format!("account {} is {}", account, status),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let result = self
            .run_pipeline(settlement_id, &invoice, &quote, &acceptance, pinned_at, started_at)
            .await;

        match &result {
            // Resolution still pending: the hold stays until the sweep
            Err(Error::ResolutionPending(_)) => {}
            _ => {
                let _ = self.registry.release_credit(reservation.id);
            }
        }

        if let Ok(outcome) = &result {
            self.decisions.record(
                RecordKind::SettlementOutcome {
                    settlement_id,
                    invoice_id,
                    outcome: outcome.label(),
                },
                matches!(outcome, SettlementOutcome::Completed(_)),
                EnforcementAction::Proceed,
                "",
                serde_json::Value::Null,
                ACTOR,
            )?;
        }

        result
    }

    fn replay_outcome(
        &self,
        existing: SettlementRecord,
        acceptance: &AcceptanceRequest,
    ) -> Result<SettlementOutcome> {
        let settlement = existing.settlement;

        if settlement.quote_id == acceptance.quote_id {
            return match settlement.status {
                SettlementStatus::Completed => Ok(SettlementOutcome::Completed(settlement)),
                SettlementStatus::InProgress | SettlementStatus::Pending => {
                    Err(Error::ResolutionPending(settlement.id))
                }
                SettlementStatus::Failed | SettlementStatus::RolledBack => {
                    Ok(SettlementOutcome::Failed {
                        kind: FailureKind::CommitFailed,
                        detail: "settlement previously failed".to_string(),
                    })
                }
            };
        }

        Ok(SettlementOutcome::Rejected {
            kind: RejectKind::Conflict,
            detail: "another acceptance already settled this invoice".to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        settlement_id: Uuid,
        invoice: &Invoice,
        quote: &PricingQuote,
        acceptance: &AcceptanceRequest,
        pinned_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<SettlementOutcome> {
        let invoice_id = invoice.id;
        let provider = quote.provider.clone();

        // Rail the settlement will start on (pre-check evidence)
        let initial_rail = match self.router.select_rail().await {
            Ok(r) => r,
            Err(rails::Error::NoRailAvailable) => {
                return Ok(SettlementOutcome::Rejected {
                    kind: RejectKind::NoRail,
                    detail: "no healthy settlement rail".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let participants = [
            invoice.supplier.clone(),
            invoice.buyer.clone(),
            provider.clone(),
        ];
        let initial_statuses = self.participant_statuses(&participants)?;

        // ---- Pre-barrier ----
        let ctx = self
            .pre_barrier_context(
                invoice,
                quote,
                acceptance,
                pinned_at,
                started_at,
                initial_rail.name(),
                &participants,
            )
            .await?;

        let decision = self
            .engine
            .run_phase(Phase::Pre, &pre_barrier_ids(), &ctx, ACTOR)?;

        if !decision.is_proceed() {
            if decision.action == EnforcementAction::Freeze {
                self.freeze.freeze(
                    decision.reason.clone().unwrap_or_default(),
                    decision
                        .failed
                        .as_ref()
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                );
            }

            let kind = decision
                .failed
                .as_ref()
                .map(reject_kind_for)
                .unwrap_or(RejectKind::PrecheckFailed);

            return Ok(SettlementOutcome::Rejected {
                kind,
                detail: decision.reason.unwrap_or_default(),
            });
        }

        // Quote is consumable at most once; the advisory lock makes this
        // the deciding moment between racing acceptances
        match self.quotes.consume(quote.id, Utc::now()) {
            Ok(_) => {}
            Err(pricing::Error::QuoteConsumed(_)) => {
                return Ok(SettlementOutcome::Rejected {
                    kind: RejectKind::Conflict,
                    detail: "quote already consumed".to_string(),
                })
            }
            Err(pricing::Error::QuoteExpired(_)) => {
                return Ok(SettlementOutcome::Rejected {
                    kind: RejectKind::StaleQuote,
                    detail: "quote expired".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        // Acceptance admitted: transition and settlement row move together
        self.invoices
            .transition(invoice_id, InvoiceStatus::Accepted, ACTOR, "buyer acceptance")?;

        let settlement = Settlement {
            id: settlement_id,
            invoice_id,
            quote_id: quote.id,
            supplier: invoice.supplier.clone(),
            buyer: invoice.buyer.clone(),
            provider: provider.clone(),
            amount: invoice.amount,
            currency: invoice.currency,
            discount_rate: quote.discount_rate,
            buyer_cost: quote.total_cost,
            rail: None,
            status: SettlementStatus::InProgress,
            started_at,
            completed_at: None,
        };

        let specs = self.leg_specs(&settlement);
        let legs = specs
            .iter()
            .map(|spec| SettlementLeg {
                settlement_id,
                leg: spec.kind,
                account: spec.account.clone(),
                amount: spec.amount,
                rail_txn_id: None,
            })
            .collect();

        self.journal.create(settlement.clone(), legs)?;

        // ---- Phase 1: prepare (with rail failover) ----
        let (rail, tokens) = match self.prepare_with_failover(&settlement, &specs, initial_rail).await? {
            Ok(pair) => pair,
            Err(detail) => {
                self.abort_unprepared(&settlement, &detail)?;
                return Ok(SettlementOutcome::Failed {
                    kind: FailureKind::PrepareRejected,
                    detail,
                });
            }
        };

        // ---- Pre-commit compliance barrier ----
        if let Err(detail) = self.pre_commit_recheck(invoice, &participants, pinned_at).await {
            for token in tokens.values() {
                let _ = rail.rollback(token).await;
            }
            for kind in LegKind::all() {
                self.journal
                    .update_leg(settlement_id, kind, |leg| leg.state = LegState::RolledBack)?;
            }
            self.abort_unprepared(&settlement, &detail)?;
            // Compliance failures do not stay retryable
            self.invoices
                .transition(invoice_id, InvoiceStatus::Rejected, ACTOR, &detail)?;
            return Ok(SettlementOutcome::Failed {
                kind: FailureKind::Compliance,
                detail,
            });
        }

        // ---- Phase 2: commit ----
        let commit_states = self.commit_legs(&rail, &settlement, &tokens).await?;

        let ceiling = started_at + Duration::milliseconds(self.config.timeout_ceiling_ms as i64);
        let resolved = self
            .resolve_indeterminate(&rail, settlement_id, commit_states, ceiling)
            .await?;

        let committed: Vec<LegKind> = resolved
            .iter()
            .filter(|(_, s)| matches!(s, TerminalStatus::Committed { .. }))
            .map(|(k, _)| *k)
            .collect();
        let unknown: Vec<LegKind> = resolved
            .iter()
            .filter(|(_, s)| matches!(s, TerminalStatus::Unknown))
            .map(|(k, _)| *k)
            .collect();

        // Journal each terminal leg outcome before acting on it
        for (kind, status) in &resolved {
            match status {
                TerminalStatus::Committed { txn_id } => {
                    self.journal.update_leg(settlement_id, *kind, |leg| {
                        leg.state = LegState::Committed;
                        leg.leg.rail_txn_id = Some(txn_id.clone());
                    })?;
                }
                TerminalStatus::RolledBack => {
                    self.journal.update_leg(settlement_id, *kind, |leg| {
                        leg.state = LegState::RolledBack;
                    })?;
                }
                TerminalStatus::Unknown => {}
            }
        }

        // Committed legs are on the rail; mirror them in the journal now
        // so compensation (if any) references real entries
        for kind in &committed {
            self.append_leg_entries(settlement_id, *kind).await?;
        }

        if !unknown.is_empty() {
            // Still unresolved at the ceiling: stay in-progress, defer
            // reporting; the orphan sweep finishes the job
            tracing::error!(
                settlement = %settlement_id,
                ?unknown,
                "Commit unresolved at ceiling; deferring outcome"
            );
            return Err(Error::ResolutionPending(settlement_id));
        }

        if committed.len() == LegKind::all().len() {
            self.finalize_committed(settlement_id, Some(&initial_statuses), rail.name())
                .await
        } else {
            self.router.record_outcome(rail.name(), false);
            self.compensate_partial(settlement_id, Some(&initial_statuses), &rail)
                .await
        }
    }

    fn leg_specs(&self, settlement: &Settlement) -> Vec<LegSpec> {
        vec![
            LegSpec {
                kind: LegKind::CreditSupplier,
                account: settlement.supplier.clone(),
                amount: settlement.amount,
            },
            LegSpec {
                kind: LegKind::DebitBuyer,
                account: settlement.buyer.clone(),
                amount: settlement.buyer_cost,
            },
            LegSpec {
                kind: LegKind::AdvanceCapital,
                account: settlement.provider.clone(),
                amount: settlement.amount,
            },
        ]
    }

    fn participant_statuses(
        &self,
        participants: &[AccountId],
    ) -> Result<Vec<(AccountId, AccountStatus)>> {
        participants
            .iter()
            .map(|id| Ok((id.clone(), self.registry.get(id)?.status)))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn pre_barrier_context(
        &self,
        invoice: &Invoice,
        quote: &PricingQuote,
        acceptance: &AcceptanceRequest,
        pinned_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
        rail_name: &str,
        participants: &[AccountId],
    ) -> Result<CheckContext> {
        let now = Utc::now();
        let mut ctx = CheckContext::at(now);

        ctx.invoice = Some(InvoiceFacts {
            invoice_id: invoice.id,
            supplier: invoice.supplier.clone(),
            buyer: invoice.buyer.clone(),
            amount: invoice.amount,
            terms_days: invoice.terms_days,
            line_items_total: invoice.line_items_total(),
            hash_duplicate: false,
        });

        let mut active = Vec::new();
        let mut kyc = Vec::new();
        for id in participants {
            let account = self.registry.get(id)?;
            active.push((id.clone(), account.is_active()));
            kyc.push((id.clone(), account.is_kyc_verified()));
        }

        let screening = self.sanctions.screen(participants).await?;

        ctx.parties = Some(PartyFacts {
            active,
            kyc_verified: kyc,
            sanctioned: screening,
            sanctions_snapshot_age_s: self.sanctions.snapshot_age_s(),
        });

        let credit = self
            .registry
            .refresh_credit_limit_if_stale(&invoice.buyer)
            .await?;
        // The coordinator's own hold is already in the outstanding sum
        let outstanding = self.registry.outstanding(&invoice.buyer) - quote.total_cost;
        ctx.credit = Some(CreditFacts {
            buyer: invoice.buyer.clone(),
            outstanding,
            limit: credit.limit,
            requested: quote.total_cost,
            limit_age_s: (now - credit.checked_at).num_seconds(),
        });

        ctx.quote = Some(QuoteFacts {
            quote_id: quote.id,
            issued_at: quote.issued_at,
            expires_at: quote.expires_at,
            used: quote.used,
            quoted_cost: quote.total_cost,
            charged_cost: quote.total_cost,
        });

        let invoice_score = invoice
            .fraud_score
            .ok_or_else(|| Error::Other("fraud score missing after gate".to_string()))?;
        ctx.fraud = Some(FraudFacts {
            score: invoice_score,
            computed_at: pinned_at,
            pinned_at: Some(pinned_at),
        });

        let probe_age = self
            .router
            .health_snapshot()
            .into_iter()
            .find(|h| h.rail == rail_name)
            .map(|h| h.age_s(now))
            .unwrap_or(0);
        ctx.rails = Some(RailFacts {
            rail: rail_name.to_string(),
            up: true,
            probe_age_s: probe_age,
        });

        ctx.bid = Some(BidFacts {
            provider: quote.provider.clone(),
            expires_at: quote.expires_at,
            capacity: invoice.amount,
            provider_liquidity: self.ledger.balance(&quote.provider)?,
            invoice_amount: invoice.amount,
        });

        let signature_ok = acceptance.signer == invoice.buyer
            && self
                .registry
                .get(&invoice.buyer)?
                .signing_key
                .map(|key| {
                    acceptance
                        .signature
                        .verify(&acceptance_message(invoice.id, quote.id), &key)
                })
                .unwrap_or(false);
        ctx.signature = Some(SignatureFacts {
            signer: acceptance.signer.clone(),
            verified: signature_ok,
        });

        ctx.settlement = Some(SettlementFacts {
            invoice_id: invoice.id,
            row_count: self.journal.count_for_invoice(invoice.id),
            leg_count: 0,
            participant_net: Decimal::ZERO,
            started_at,
            completed_at: None,
            statuses_unchanged: true,
        });

        Ok(ctx)
    }

    /// Prepare all three legs, trying the next rail when one rejects.
    /// Once every leg prepares on a rail, the settlement stays there.
    async fn prepare_with_failover(
        &self,
        settlement: &Settlement,
        specs: &[LegSpec],
        initial_rail: Arc<dyn RailAdapter>,
    ) -> Result<std::result::Result<(Arc<dyn RailAdapter>, HashMap<LegKind, PrepareToken>), String>>
    {
        let mut tried: Vec<String> = Vec::new();
        let mut rail = initial_rail;
        let mut last_reason = String::new();

        loop {
            self.journal.set_rail(settlement.id, rail.name())?;

            match self.prepare_legs(&rail, settlement.id, specs).await {
                Ok(tokens) => {
                    for (kind, token) in &tokens {
                        let token = token.clone();
                        self.journal.update_leg(settlement.id, *kind, |leg| {
                            leg.state = LegState::Prepared;
                            leg.token = Some(token);
                        })?;
                    }
                    return Ok(Ok((rail, tokens)));
                }
                Err((prepared, reason)) => {
                    tracing::warn!(
                        settlement = %settlement.id,
                        rail = rail.name(),
                        %reason,
                        "Prepare failed; rolling back and trying next rail"
                    );

                    for token in prepared.values() {
                        let _ = rail.rollback(token).await;
                    }
                    for kind in LegKind::all() {
                        self.journal.update_leg(settlement.id, kind, |leg| {
                            leg.state = LegState::Planned;
                            leg.token = None;
                        })?;
                    }

                    self.router.record_outcome(rail.name(), false);
                    tried.push(rail.name().to_string());
                    last_reason = reason;

                    match self.router.select_rail_excluding(&tried).await {
                        Ok(next) => rail = next,
                        Err(rails::Error::NoRailAvailable) => {
                            return Ok(Err(format!(
                                "no rail accepted the settlement (last: {})",
                                last_reason
                            )))
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// Prepare the three legs in parallel on one rail
    async fn prepare_legs(
        &self,
        rail: &Arc<dyn RailAdapter>,
        settlement_id: Uuid,
        specs: &[LegSpec],
    ) -> std::result::Result<HashMap<LegKind, PrepareToken>, (HashMap<LegKind, PrepareToken>, String)>
    {
        let budget = std::time::Duration::from_millis(self.config.prepare_timeout_ms);

        let (a, b, c) = tokio::join!(
            tokio::time::timeout(
                budget,
                rail.prepare(settlement_id, specs[0].kind, &specs[0].account, specs[0].amount)
            ),
            tokio::time::timeout(
                budget,
                rail.prepare(settlement_id, specs[1].kind, &specs[1].account, specs[1].amount)
            ),
            tokio::time::timeout(
                budget,
                rail.prepare(settlement_id, specs[2].kind, &specs[2].account, specs[2].amount)
            ),
        );

        let mut tokens = HashMap::new();
        let mut failure: Option<String> = None;

        for (spec, result) in specs.iter().zip([a, b, c]) {
            match result {
                Ok(Ok(PrepareOutcome::Prepared(token))) => {
                    tokens.insert(spec.kind, token);
                }
                Ok(Ok(PrepareOutcome::Rejected { reason })) => {
                    failure.get_or_insert(format!("{} rejected: {}", spec.kind, reason));
                }
                Ok(Err(e)) => {
                    failure.get_or_insert(format!("{} prepare error: {}", spec.kind, e));
                }
                Err(_) => {
                    failure.get_or_insert(format!("{} prepare timed out", spec.kind));
                }
            }
        }

        match failure {
            None => Ok(tokens),
            Some(reason) => Err((tokens, reason)),
        }
    }

    /// Sanctions, fraud pin, and status re-check immediately before
    /// commit. Cheap by construction: everything reads local snapshots.
    async fn pre_commit_recheck(
        &self,
        invoice: &Invoice,
        participants: &[AccountId],
        pinned_at: DateTime<Utc>,
    ) -> std::result::Result<(), String> {
        let screening = self
            .sanctions
            .screen(participants)
            .await
            .map_err(|e| format!("sanctions re-screen failed: {}", e))?;

        if let Some((account, _)) = screening.iter().find(|(_, hit)| *hit) {
            return Err(format!("account {} matched the sanctions list", account));
        }

        let current = self
            .invoices
            .get(invoice.id)
            .map_err(|e| format!("invoice read failed: {}", e))?;
        self.fraud_gate
            .verify_pinned(&current, pinned_at)
            .map_err(|e| e.to_string())?;

        for id in participants {
            let account = self.registry.get(id).map_err(|e| e.to_string())?;
            if !account.is_active() {
                return Err(format!("account {} became {}", id, account.status));
            }
        }

        Ok(())
    }

    /// Commit all legs in parallel. A timeout or transport error is
    /// indeterminate: commit is not cancellable once launched.
    async fn commit_legs(
        &self,
        rail: &Arc<dyn RailAdapter>,
        settlement: &Settlement,
        tokens: &HashMap<LegKind, PrepareToken>,
    ) -> Result<Vec<(LegKind, CommitOutcome)>> {
        let budget = std::time::Duration::from_millis(self.config.commit_timeout_ms);
        let order = LegKind::all();

        let get = |kind: LegKind| {
            tokens
                .get(&kind)
                .cloned()
                .ok_or_else(|| Error::Other(format!("missing token for {}", kind)))
        };
        let (ta, tb, tc) = (get(order[0])?, get(order[1])?, get(order[2])?);

        let (a, b, c) = tokio::join!(
            tokio::time::timeout(budget, rail.commit(&ta)),
            tokio::time::timeout(budget, rail.commit(&tb)),
            tokio::time::timeout(budget, rail.commit(&tc)),
        );

        let mut out = Vec::with_capacity(3);
        for (kind, result) in order.into_iter().zip([a, b, c]) {
            let outcome = match result {
                Ok(Ok(CommitResult::Committed { txn_id })) => CommitOutcome::Committed { txn_id },
                Ok(Ok(CommitResult::Failed { reason })) => {
                    tracing::warn!(settlement = %settlement.id, %kind, %reason, "Commit failed");
                    CommitOutcome::Failed
                }
                Ok(Ok(CommitResult::Indeterminate)) | Ok(Err(_)) | Err(_) => {
                    tracing::warn!(settlement = %settlement.id, %kind, "Commit indeterminate");
                    CommitOutcome::Indeterminate
                }
            };
            out.push((kind, outcome));
        }

        Ok(out)
    }

    /// Drive indeterminate legs to a terminal answer via the rail's
    /// idempotent status endpoint, up to the ceiling.
    async fn resolve_indeterminate(
        &self,
        rail: &Arc<dyn RailAdapter>,
        settlement_id: Uuid,
        outcomes: Vec<(LegKind, CommitOutcome)>,
        ceiling: DateTime<Utc>,
    ) -> Result<Vec<(LegKind, TerminalStatus)>> {
        let mut resolved = Vec::with_capacity(outcomes.len());

        for (kind, outcome) in outcomes {
            let status = match outcome {
                CommitOutcome::Committed { txn_id } => TerminalStatus::Committed { txn_id },
                CommitOutcome::Failed => TerminalStatus::RolledBack,
                CommitOutcome::Indeterminate => {
                    let mut answer = TerminalStatus::Unknown;
                    while Utc::now() < ceiling {
                        match rail.status(settlement_id, kind).await? {
                            TerminalStatus::Unknown => {
                                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                            }
                            terminal => {
                                tracing::info!(
                                    settlement = %settlement_id,
                                    %kind,
                                    "Indeterminate commit resolved via status probe"
                                );
                                answer = terminal;
                                break;
                            }
                        }
                    }
                    answer
                }
            };
            resolved.push((kind, status));
        }

        Ok(resolved)
    }

    /// Journal postings for one committed leg. Exactly one entry per
    /// leg; the advance leg carries the provider's net position and is
    /// skipped at zero-profit terms.
    fn leg_entry_drafts(&self, settlement: &Settlement, kind: LegKind) -> Vec<EntryDraft> {
        match kind {
            LegKind::CreditSupplier => vec![EntryDraft {
                entry_type: EntryType::Credit,
                account: settlement.supplier.clone(),
                amount: settlement.amount,
                currency: settlement.currency,
                reason: EntryReason::SupplierPayout,
                corrects_entry: None,
                origin: Some(settlement.id),
            }],
            LegKind::DebitBuyer => vec![EntryDraft {
                entry_type: EntryType::Debit,
                account: settlement.buyer.clone(),
                amount: settlement.buyer_cost,
                currency: settlement.currency,
                reason: EntryReason::BuyerCharge,
                corrects_entry: None,
                origin: Some(settlement.id),
            }],
            LegKind::AdvanceCapital => {
                let profit = settlement.buyer_cost - settlement.amount;
                if profit <= Decimal::ZERO {
                    return Vec::new();
                }
                vec![EntryDraft {
                    entry_type: EntryType::Credit,
                    account: settlement.provider.clone(),
                    amount: profit,
                    currency: settlement.currency,
                    reason: EntryReason::CapitalAdvance,
                    corrects_entry: None,
                    origin: Some(settlement.id),
                }]
            }
        }
    }

    /// Append a committed leg's postings (idempotent: skipped when the
    /// journal already has entry sequence numbers for the leg)
    async fn append_leg_entries(&self, settlement_id: Uuid, kind: LegKind) -> Result<()> {
        let record = self.journal.get(settlement_id)?;
        let leg = record
            .leg(kind)
            .ok_or_else(|| Error::Other(format!("missing leg {}", kind)))?;

        if !leg.entry_seqs.is_empty() {
            return Ok(());
        }

        let drafts = self.leg_entry_drafts(&record.settlement, kind);
        if drafts.is_empty() {
            return Ok(());
        }

        let entries = self.ledger.append_batch(drafts).await?;
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq_no).collect();

        self.journal
            .update_leg(settlement_id, kind, |leg| leg.entry_seqs = seqs)?;

        Ok(())
    }

    /// Abort before any leg committed: nothing to compensate
    fn abort_unprepared(&self, settlement: &Settlement, detail: &str) -> Result<()> {
        self.journal
            .set_status(settlement.id, SettlementStatus::Failed)?;
        self.invoices
            .transition(settlement.invoice_id, InvoiceStatus::Failed, ACTOR, detail)?;
        Ok(())
    }

    /// Finalize a settlement whose three legs all committed
    pub(crate) async fn finalize_committed(
        &self,
        settlement_id: Uuid,
        initial_statuses: Option<&[(AccountId, AccountStatus)]>,
        rail_name: &str,
    ) -> Result<SettlementOutcome> {
        for kind in LegKind::all() {
            self.append_leg_entries(settlement_id, kind).await?;
        }

        let settlement = self
            .journal
            .set_status(settlement_id, SettlementStatus::Completed)?;
        let record = self.journal.get(settlement_id)?;

        let ctx = self.post_barrier_context(&record, initial_statuses)?;
        let decision = self
            .engine
            .run_phase(Phase::Post, &post_barrier_ids(), &ctx, ACTOR)?;

        if !decision.is_proceed() {
            // Committed legs with a failed post-check is a system-level
            // incident: freeze, drain, page
            let reason = decision.reason.clone().unwrap_or_default();
            self.freeze.freeze(
                format!("post-check failed with committed legs: {}", reason),
                decision
                    .failed
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            );
            return Ok(SettlementOutcome::Failed {
                kind: FailureKind::Consistency,
                detail: reason,
            });
        }

        self.invoices.transition(
            settlement.invoice_id,
            InvoiceStatus::Settled,
            ACTOR,
            "all legs committed",
        )?;

        // A committed-but-late settlement is an incident, never a rollback
        let deadline_check =
            self.engine
                .check(&InvariantId("settlement-deadline"), Phase::Post, &ctx, ACTOR)?;
        if !deadline_check.is_proceed() {
            tracing::error!(
                settlement = %settlement_id,
                duration_ms = settlement.duration_ms(),
                "Settlement exceeded the hard deadline; incident raised"
            );
        }

        self.registry.release_by_settlement(settlement_id);
        self.router.record_outcome(rail_name, true);

        let settlement = self.journal.get(settlement_id)?.settlement;
        tracing::info!(
            settlement = %settlement_id,
            invoice = %settlement.invoice_id,
            duration_ms = settlement.duration_ms(),
            "Settlement completed"
        );

        Ok(SettlementOutcome::Completed(settlement))
    }

    /// Compensate committed legs after a definite commit failure
    pub(crate) async fn compensate_partial(
        &self,
        settlement_id: Uuid,
        initial_statuses: Option<&[(AccountId, AccountStatus)]>,
        rail: &Arc<dyn RailAdapter>,
    ) -> Result<SettlementOutcome> {
        let record = self.journal.get(settlement_id)?;

        // Post barrier records the atomicity violation before recovery
        let ctx = self.post_barrier_context(&record, initial_statuses)?;
        let _ = self
            .engine
            .run_phase(Phase::Post, &post_barrier_ids(), &ctx, ACTOR)?;

        for leg in record.legs_in_state(LegState::Committed) {
            let token = leg
                .token
                .clone()
                .ok_or_else(|| Error::Other(format!("committed leg {} has no token", leg.leg.leg)))?;

            let comp_txn = rail.compensate(&token).await?;

            for seq in &leg.entry_seqs {
                let original = self.ledger.get_entry(*seq)?;
                self.ledger
                    .append(EntryDraft {
                        entry_type: EntryType::Correction,
                        account: original.account.clone(),
                        amount: original.amount,
                        currency: original.currency,
                        reason: EntryReason::Compensation,
                        corrects_entry: Some(*seq),
                        origin: Some(settlement_id),
                    })
                    .await?;
            }

            self.journal.update_leg(settlement_id, leg.leg.leg, |l| {
                l.state = LegState::Compensated;
            })?;

            self.decisions.record(
                RecordKind::SettlementOutcome {
                    settlement_id,
                    invoice_id: record.settlement.invoice_id,
                    outcome: format!("compensated:{}", leg.leg.leg),
                },
                true,
                EnforcementAction::Rollback,
                comp_txn,
                serde_json::Value::Null,
                ACTOR,
            )?;
        }

        self.journal
            .set_status(settlement_id, SettlementStatus::RolledBack)?;
        self.invoices.transition(
            record.settlement.invoice_id,
            InvoiceStatus::Failed,
            ACTOR,
            "commit failed; committed legs compensated",
        )?;
        self.registry.release_by_settlement(settlement_id);

        tracing::warn!(
            settlement = %settlement_id,
            invoice = %record.settlement.invoice_id,
            "Settlement compensated; every balance restored"
        );

        Ok(SettlementOutcome::Failed {
            kind: FailureKind::CommitFailed,
            detail: "a commit failed; committed legs were compensated".to_string(),
        })
    }

    fn post_barrier_context(
        &self,
        record: &SettlementRecord,
        initial_statuses: Option<&[(AccountId, AccountStatus)]>,
    ) -> Result<CheckContext> {
        let settlement = &record.settlement;
        let now = Utc::now();
        let mut ctx = CheckContext::at(now);

        let participants = [
            settlement.supplier.clone(),
            settlement.buyer.clone(),
            settlement.provider.clone(),
        ];

        let mut active = Vec::new();
        let mut kyc = Vec::new();
        let mut statuses_unchanged = true;
        for id in &participants {
            let account = self.registry.get(id)?;
            active.push((id.clone(), account.is_active()));
            kyc.push((id.clone(), account.is_kyc_verified()));

            if let Some(initial) = initial_statuses {
                if let Some((_, was)) = initial.iter().find(|(a, _)| a == id) {
                    statuses_unchanged &= *was == account.status;
                }
            }
        }

        ctx.parties = Some(PartyFacts {
            active,
            kyc_verified: kyc,
            sanctioned: participants.iter().map(|a| (a.clone(), false)).collect(),
            sanctions_snapshot_age_s: self.sanctions.snapshot_age_s(),
        });

        let committed_legs = record.legs_in_state(LegState::Committed);
        let mut participant_net = Decimal::ZERO;
        for leg in &committed_legs {
            for seq in &leg.entry_seqs {
                let entry = self.ledger.get_entry(*seq)?;
                participant_net += entry.balance_effect(None);
            }
        }

        ctx.settlement = Some(SettlementFacts {
            invoice_id: settlement.invoice_id,
            row_count: self.journal.count_for_invoice(settlement.invoice_id),
            leg_count: committed_legs.len(),
            participant_net,
            started_at: settlement.started_at,
            completed_at: settlement.completed_at.or(Some(now)),
            statuses_unchanged,
        });

        let report = self.ledger.reconcile(0)?;
        ctx.ledger = Some(LedgerFacts {
            total_credits: report.total_credits,
            total_debits: report.total_debits,
            imbalance: report.imbalance,
        });

        Ok(ctx)
    }

    /// Resolve in-progress settlements whose legs were left prepared or
    /// unresolved (crashed coordinator, rail outage). Called by the
    /// lifecycle scheduler.
    pub async fn sweep_orphans(&self, older_than: Duration) -> usize {
        let orphans = self.journal.in_progress_older_than(older_than);
        let mut handled = 0;

        for record in orphans {
            let settlement_id = record.settlement.id;
            match self.resolve_orphan(&record).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(settlement = %settlement_id, error = %e, "Orphan sweep failed");
                }
            }
        }

        handled
    }

    async fn resolve_orphan(&self, record: &SettlementRecord) -> Result<bool> {
        let settlement_id = record.settlement.id;
        let rail_name = record
            .settlement
            .rail
            .clone()
            .ok_or_else(|| Error::Other("orphan settlement has no rail".to_string()))?;
        let rail = self.router.by_name(&rail_name)?;

        // Ask the rail for the terminal answer on every non-final leg
        for (kind, leg) in &record.legs {
            if matches!(leg.state, LegState::Prepared | LegState::Planned) {
                match rail.status(settlement_id, *kind).await? {
                    TerminalStatus::Committed { txn_id } => {
                        self.journal.update_leg(settlement_id, *kind, |l| {
                            l.state = LegState::Committed;
                            l.leg.rail_txn_id = Some(txn_id.clone());
                        })?;
                        self.append_leg_entries(settlement_id, *kind).await?;
                    }
                    TerminalStatus::RolledBack => {
                        self.journal.update_leg(settlement_id, *kind, |l| {
                            l.state = LegState::RolledBack;
                        })?;
                    }
                    TerminalStatus::Unknown => return Ok(false),
                }
            }
        }

        let record = self.journal.get(settlement_id)?;
        let committed = record.legs_in_state(LegState::Committed).len();

        if committed == LegKind::all().len() {
            self.finalize_committed(settlement_id, None, &rail_name).await?;
        } else if committed > 0 {
            self.compensate_partial(settlement_id, None, &rail).await?;
        } else {
            self.journal
                .set_status(settlement_id, SettlementStatus::Failed)?;
            self.invoices.transition(
                record.settlement.invoice_id,
                InvoiceStatus::Failed,
                ACTOR,
                "orphan settlement; no leg committed",
            )?;
            self.registry.release_by_settlement(settlement_id);
        }

        Ok(true)
    }
}

/// Commit outcome before resolution
enum CommitOutcome {
    Committed { txn_id: String },
    Failed,
    Indeterminate,
}
