//! End-to-end settlement scenarios against simulated rails

use accounts::{
    Account, AccountRegistry, AccountRole, AccountStatus, KycStatus, SanctionsScreen, StaticBureau,
    StaticFeed,
};
use chrono::{Duration, Utc};
use enforcement::{standard_registry, DecisionLedger, FreezeSwitch, InvariantEngine};
use fraud::{FixedOracle, FraudGate};
use invoices::{AdmissionLimits, InvoiceDraft, InvoiceStatus, InvoiceStore, LineItem};
use ledger_core::{
    crypto::KeyPair, AccountId, Currency, EntryDraft, EntryReason, EntryType, Ledger,
};
use pricing::{AuctionBook, AuctionConfig, JournalLiquidity, PricingQuote, QuoteBook};
use rails::{CircuitBreakerConfig, FailureMode, LegKind, RailRouter, SimulatedRail};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settlement::{
    acceptance_message, AcceptanceRequest, FailureKind, RejectKind, SettlementConfig,
    SettlementCoordinator, SettlementJournal, SettlementOutcome,
};
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    ledger: Arc<Ledger>,
    registry: Arc<AccountRegistry>,
    invoices: Arc<InvoiceStore>,
    quotes: Arc<QuoteBook>,
    auctions: Arc<AuctionBook>,
    oracle: Arc<FixedOracle>,
    coordinator: Arc<SettlementCoordinator>,
    freeze: Arc<FreezeSwitch>,
    decisions: Arc<DecisionLedger>,
    rails: Vec<Arc<SimulatedRail>>,
    buyer_key: KeyPair,
    _temp: tempfile::TempDir,
}

fn supplier() -> AccountId {
    AccountId::new("SUP-001")
}

fn buyer() -> AccountId {
    AccountId::new("BUY-001")
}

fn provider(n: u32) -> AccountId {
    AccountId::new(format!("CAP-{:03}", n))
}

async fn harness_with_quote_ttl(quote_ttl: Duration) -> Harness {
    let temp = tempfile::tempdir().unwrap();
    let mut ledger_config = ledger_core::Config::default();
    ledger_config.data_dir = temp.path().to_path_buf();

    let ledger = Arc::new(
        Ledger::open(ledger_config, KeyPair::generate())
            .await
            .unwrap(),
    );

    let config = SettlementConfig::default();

    let decisions = Arc::new(DecisionLedger::new(Arc::new(KeyPair::generate())));
    let engine = Arc::new(
        InvariantEngine::new(standard_registry(&config.thresholds()), decisions.clone()).unwrap(),
    );
    let freeze = Arc::new(FreezeSwitch::new());

    let bureau = Arc::new(StaticBureau::new());
    bureau.set_limit(buyer(), dec!(1000000));
    let registry = Arc::new(AccountRegistry::new(bureau, Duration::hours(1)));

    let buyer_key = KeyPair::generate();

    let mut accounts = vec![
        (supplier(), AccountRole::Supplier, None),
        (buyer(), AccountRole::Buyer, Some(buyer_key.public_key())),
    ];
    for n in 1..=3 {
        accounts.push((provider(n), AccountRole::CapitalProvider, None));
    }
    for (id, role, key) in accounts {
        registry
            .register(Account {
                id,
                role,
                status: AccountStatus::Active,
                kyc_status: KycStatus::Verified,
                kyc_verified_at: Some(Utc::now()),
                credit_limit: None,
                signing_key: key,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    // Seed balances double-entry against the treasury so the journal
    // stays reconciled: buyer cash and provider liquidity
    let mut seeds = vec![(buyer(), dec!(500000))];
    for n in 1..=3 {
        seeds.push((provider(n), dec!(10000000)));
    }
    for (account, amount) in seeds {
        ledger
            .append_batch(vec![
                EntryDraft {
                    entry_type: EntryType::Credit,
                    account,
                    amount,
                    currency: Currency::USD,
                    reason: EntryReason::Adjustment,
                    corrects_entry: None,
                    origin: None,
                },
                EntryDraft {
                    entry_type: EntryType::Debit,
                    account: AccountId::new("TREASURY-001"),
                    amount,
                    currency: Currency::USD,
                    reason: EntryReason::Adjustment,
                    corrects_entry: None,
                    origin: None,
                },
            ])
            .await
            .unwrap();
    }

    let feed = Arc::new(StaticFeed::new());
    let sanctions = Arc::new(SanctionsScreen::new(feed, Duration::hours(6)));

    let invoices = Arc::new(InvoiceStore::new(
        decisions.clone(),
        AdmissionLimits::default(),
    ));

    let auctions = Arc::new(AuctionBook::new(
        Arc::new(JournalLiquidity::new(ledger.clone())),
        AuctionConfig::default(),
    ));
    let quotes = Arc::new(QuoteBook::new(quote_ttl));

    let oracle = Arc::new(FixedOracle::new(0.10));
    let fraud_gate = Arc::new(FraudGate::new(
        oracle.clone(),
        config.fraud_threshold,
        Duration::hours(config.fraud_score_max_age_h),
    ));

    let rails: Vec<Arc<SimulatedRail>> = vec![
        Arc::new(SimulatedRail::new("rtp", 1, std::time::Duration::from_millis(5))),
        Arc::new(SimulatedRail::new("fednow", 2, std::time::Duration::from_millis(10))),
        Arc::new(SimulatedRail::new("ach", 3, std::time::Duration::from_millis(20))),
    ];
    let router = Arc::new(RailRouter::new(
        rails
            .iter()
            .map(|r| r.clone() as Arc<dyn rails::RailAdapter>)
            .collect(),
        CircuitBreakerConfig::default(),
        Duration::seconds(config.rail_health_max_age_s),
    ));

    let coordinator = Arc::new(SettlementCoordinator::new(
        ledger.clone(),
        engine,
        freeze.clone(),
        registry.clone(),
        sanctions,
        invoices.clone(),
        quotes.clone(),
        fraud_gate,
        router,
        Arc::new(SettlementJournal::new()),
        config,
    ));

    Harness {
        ledger,
        registry,
        invoices,
        quotes,
        auctions,
        oracle,
        coordinator,
        freeze,
        decisions,
        rails,
        buyer_key,
        _temp: temp,
    }
}

async fn harness() -> Harness {
    harness_with_quote_ttl(Duration::seconds(300)).await
}

impl Harness {
    fn submit_invoice(&self, amount: Decimal, terms: u16) -> invoices::Invoice {
        let (invoice, created) = self
            .invoices
            .submit(InvoiceDraft {
                supplier: supplier(),
                buyer: buyer(),
                currency: Currency::USD,
                terms_days: terms,
                line_items: vec![LineItem {
                    description: "Widget Model A".to_string(),
                    quantity: 1,
                    unit_price: amount,
                }],
                purchase_order_id: None,
                notes: None,
            })
            .unwrap();
        assert!(created);
        invoice
    }

    /// Run a three-bid auction and issue the quote
    fn quote_for(&self, invoice: &invoices::Invoice) -> PricingQuote {
        self.auctions
            .open_auction(invoice.id, invoice.amount, invoice.terms_days);

        for (n, rate) in [(1, dec!(0.060)), (2, dec!(0.063)), (3, dec!(0.065))] {
            self.auctions
                .submit_bid(
                    invoice.id,
                    provider(n),
                    rate,
                    invoice.amount,
                    Utc::now() + Duration::seconds(300),
                )
                .unwrap();
        }

        let result = self.auctions.close_and_select(invoice.id).unwrap();
        self.quotes
            .issue(&result, invoice.amount, invoice.terms_days)
    }

    fn acceptance(&self, invoice_id: Uuid, quote: &PricingQuote) -> AcceptanceRequest {
        AcceptanceRequest {
            quote_id: quote.id,
            signer: buyer(),
            signature: self.buyer_key.sign(&acceptance_message(invoice_id, quote.id)),
        }
    }

    fn balance(&self, account: &AccountId) -> Decimal {
        self.ledger.balance(account).unwrap()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_settles_within_budget() {
    let h = harness().await;

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    // Winner is the 6.0% bid; the quote prices exactly
    assert_eq!(quote.discount_rate, dec!(0.060));
    assert_eq!(quote.total_cost, dec!(50246.58));

    let buyer_before = h.balance(&buyer());
    let provider_before = h.balance(&provider(1));

    let started = std::time::Instant::now();
    let outcome = h
        .coordinator
        .settle(invoice.id, h.acceptance(invoice.id, &quote))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    let settlement = match outcome {
        SettlementOutcome::Completed(s) => s,
        other => panic!("expected completion, got {:?}", other.label()),
    };

    assert!(elapsed < std::time::Duration::from_secs(5));
    assert!(settlement.duration_ms().unwrap() < 5000);

    // Balances: supplier full face, buyer exact quote, provider profit
    assert_eq!(h.balance(&supplier()), dec!(50000.00));
    assert_eq!(h.balance(&buyer()), buyer_before - dec!(50246.58));
    assert_eq!(h.balance(&provider(1)), provider_before + dec!(246.58));

    // Exactly one settlement with three legs
    let record = h.coordinator.journal().get(settlement.id).unwrap();
    assert_eq!(record.legs.len(), 3);
    assert_eq!(h.coordinator.journal().count_for_invoice(invoice.id), 1);

    // Invoice terminal, journal balanced, audit chain intact
    assert_eq!(
        h.invoices.get(invoice.id).unwrap().status,
        InvoiceStatus::Settled
    );
    assert!(h.ledger.reconcile(0).unwrap().balanced);
    h.decisions.verify_chain().unwrap();
    h.ledger.verify_chain().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_quote_rejected_without_state_change() {
    let h = harness_with_quote_ttl(Duration::seconds(-60)).await;

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    let seq_before = h.ledger.current_seq();
    let outcome = h
        .coordinator
        .settle(invoice.id, h.acceptance(invoice.id, &quote))
        .await
        .unwrap();

    match outcome {
        SettlementOutcome::Rejected { kind, .. } => assert_eq!(kind, RejectKind::StaleQuote),
        other => panic!("expected stale-quote rejection, got {:?}", other.label()),
    }

    // No state change anywhere
    assert_eq!(
        h.invoices.get(invoice.id).unwrap().status,
        InvoiceStatus::Pending
    );
    assert_eq!(h.ledger.current_seq(), seq_before);
    assert_eq!(h.coordinator.journal().count_for_invoice(invoice.id), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn indeterminate_commit_resolves_via_status_probe() {
    let h = harness().await;

    h.rails[0].script(LegKind::DebitBuyer, FailureMode::IndeterminateThenCommitted);

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    let outcome = h
        .coordinator
        .settle(invoice.id, h.acceptance(invoice.id, &quote))
        .await
        .unwrap();

    assert!(matches!(outcome, SettlementOutcome::Completed(_)));
    assert_eq!(
        h.invoices.get(invoice.id).unwrap().status,
        InvoiceStatus::Settled
    );
    assert!(h.ledger.reconcile(0).unwrap().balanced);
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_commit_failure_compensates_to_zero() {
    let h = harness().await;

    // Third leg fails definitively after the first two commit
    h.rails[0].script(LegKind::AdvanceCapital, FailureMode::FailCommit);

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    let supplier_before = h.balance(&supplier());
    let buyer_before = h.balance(&buyer());
    let provider_before = h.balance(&provider(1));

    let outcome = h
        .coordinator
        .settle(invoice.id, h.acceptance(invoice.id, &quote))
        .await
        .unwrap();

    match outcome {
        SettlementOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::CommitFailed),
        other => panic!("expected commit failure, got {:?}", other.label()),
    }

    // Compensations restored every balance
    assert_eq!(h.balance(&supplier()), supplier_before);
    assert_eq!(h.balance(&buyer()), buyer_before);
    assert_eq!(h.balance(&provider(1)), provider_before);

    assert_eq!(
        h.invoices.get(invoice.id).unwrap().status,
        InvoiceStatus::Failed
    );

    // Two committed legs, each with one posting and one correction
    let corrections: Vec<_> = h
        .ledger
        .stream(0)
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Correction)
        .collect();
    assert_eq!(corrections.len(), 2);

    // One failed post-check plus one record per compensation
    let records = h.decisions.records();
    let failed_post = records
        .iter()
        .filter(|r| {
            !r.passed
                && matches!(
                    r.kind,
                    enforcement::RecordKind::InvariantCheck {
                        phase: enforcement::Phase::Post,
                        ..
                    }
                )
        })
        .count();
    let compensations = records
        .iter()
        .filter(|r| {
            matches!(
                &r.kind,
                enforcement::RecordKind::SettlementOutcome { outcome, .. }
                    if outcome.starts_with("compensated:")
            )
        })
        .count();
    assert_eq!(failed_post, 1);
    assert_eq!(compensations, 2);

    assert!(h.ledger.reconcile(0).unwrap().balanced);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_fraud_score_recomputed_to_review() {
    let h = harness().await;

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    // Scored clean at submission, 26 hours ago
    h.invoices
        .set_fraud_score(invoice.id, 0.60, Utc::now() - Duration::hours(26))
        .unwrap();

    // The recomputation comes back hot
    h.oracle.set(0.82);

    let outcome = h
        .coordinator
        .settle(invoice.id, h.acceptance(invoice.id, &quote))
        .await
        .unwrap();

    match outcome {
        SettlementOutcome::Rejected { kind, .. } => assert_eq!(kind, RejectKind::Fraud),
        other => panic!("expected fraud rejection, got {:?}", other.label()),
    }

    assert_eq!(
        h.invoices.get(invoice.id).unwrap().status,
        InvoiceStatus::FraudReview
    );
    // No settlement was attempted
    assert_eq!(h.coordinator.journal().count_for_invoice(invoice.id), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn double_acceptance_one_winner() {
    let h = harness().await;

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote_a = h.quote_for(&invoice);
    let quote_b = h.quote_for(&invoice);

    let accept_a = h.acceptance(invoice.id, &quote_a);
    let accept_b = h.acceptance(invoice.id, &quote_b);

    let (ra, rb) = tokio::join!(
        h.coordinator.settle(invoice.id, accept_a),
        h.coordinator.settle(invoice.id, accept_b),
    );

    let outcomes = [ra.unwrap(), rb.unwrap()];
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, SettlementOutcome::Completed(_)))
        .count();
    let conflicts = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                SettlementOutcome::Rejected {
                    kind: RejectKind::Conflict,
                    ..
                }
            )
        })
        .count();

    assert_eq!(completed, 1);
    assert_eq!(conflicts, 1);

    // Exactly one settlement; no partial ledger effect for the loser
    assert_eq!(h.coordinator.journal().count_for_invoice(invoice.id), 1);
    assert!(h.ledger.reconcile(0).unwrap().balanced);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_accept_replays_same_settlement() {
    let h = harness().await;

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);
    let acceptance = h.acceptance(invoice.id, &quote);

    let first = h
        .coordinator
        .settle(invoice.id, acceptance.clone())
        .await
        .unwrap();
    let seq_after_first = h.ledger.current_seq();

    let second = h.coordinator.settle(invoice.id, acceptance).await.unwrap();

    match (first, second) {
        (SettlementOutcome::Completed(a), SettlementOutcome::Completed(b)) => {
            assert_eq!(a.id, b.id);
        }
        (a, b) => panic!("expected two completions, got {:?} / {:?}", a.label(), b.label()),
    }

    // No additional ledger entries from the replay
    assert_eq!(h.ledger.current_seq(), seq_after_first);
}

#[tokio::test(flavor = "multi_thread")]
async fn prepare_rejection_fails_over_to_next_rail() {
    let h = harness().await;

    h.rails[0].script(LegKind::CreditSupplier, FailureMode::RejectPrepare);

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    let outcome = h
        .coordinator
        .settle(invoice.id, h.acceptance(invoice.id, &quote))
        .await
        .unwrap();

    let settlement = match outcome {
        SettlementOutcome::Completed(s) => s,
        other => panic!("expected completion on the fallback rail, got {:?}", other.label()),
    };

    assert_eq!(settlement.rail.as_deref(), Some("fednow"));
    assert!(h.ledger.reconcile(0).unwrap().balanced);
}

#[tokio::test(flavor = "multi_thread")]
async fn all_rails_rejecting_fails_cleanly() {
    let h = harness().await;

    for rail in &h.rails {
        rail.script(LegKind::DebitBuyer, FailureMode::RejectPrepare);
    }

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    let buyer_before = h.balance(&buyer());

    let outcome = h
        .coordinator
        .settle(invoice.id, h.acceptance(invoice.id, &quote))
        .await
        .unwrap();

    match outcome {
        SettlementOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::PrepareRejected),
        other => panic!("expected prepare failure, got {:?}", other.label()),
    }

    assert_eq!(
        h.invoices.get(invoice.id).unwrap().status,
        InvoiceStatus::Failed
    );
    assert_eq!(h.balance(&buyer()), buyer_before);
}

#[tokio::test(flavor = "multi_thread")]
async fn frozen_system_refuses_acceptance() {
    let h = harness().await;

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    h.freeze.freeze("reconciliation imbalance", "test");

    let outcome = h
        .coordinator
        .settle(invoice.id, h.acceptance(invoice.id, &quote))
        .await
        .unwrap();

    match outcome {
        SettlementOutcome::Rejected { kind, .. } => assert_eq!(kind, RejectKind::Frozen),
        other => panic!("expected frozen rejection, got {:?}", other.label()),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_signature_rejected_as_unauthorized() {
    let h = harness().await;

    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    // Signature from a key the registry does not know
    let rogue = KeyPair::generate();
    let acceptance = AcceptanceRequest {
        quote_id: quote.id,
        signer: buyer(),
        signature: rogue.sign(&acceptance_message(invoice.id, quote.id)),
    };

    let outcome = h.coordinator.settle(invoice.id, acceptance).await.unwrap();

    match outcome {
        SettlementOutcome::Rejected { kind, .. } => assert_eq!(kind, RejectKind::Unauthorized),
        other => panic!("expected unauthorized rejection, got {:?}", other.label()),
    }
    assert_eq!(
        h.invoices.get(invoice.id).unwrap().status,
        InvoiceStatus::Pending
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn suspended_party_blocks_settlement() {
    let h = harness().await;
    let invoice = h.submit_invoice(dec!(50000.00), 30);
    let quote = h.quote_for(&invoice);

    // Suspend the supplier between quoting and acceptance
    h.registry
        .set_status(&supplier(), AccountStatus::Suspended)
        .unwrap();

    let outcome = h
        .coordinator
        .settle(invoice.id, h.acceptance(invoice.id, &quote))
        .await
        .unwrap();

    match outcome {
        SettlementOutcome::Rejected { kind, .. } => assert_eq!(kind, RejectKind::Compliance),
        other => panic!("expected compliance rejection, got {:?}", other.label()),
    }

    assert_eq!(h.coordinator.journal().count_for_invoice(invoice.id), 0);
}
