//! The invariant inventory
//!
//! Each guarded operation names the invariants it must pass; the structs
//! here read the facts in `CheckContext` and answer. A missing fact fails
//! closed. Thresholds come from `Thresholds`, whose defaults are the
//! production values.

use crate::{
    context::CheckContext,
    engine::Invariant,
    types::{CheckOutcome, Criticality, EnforcementAction, InvariantId, Phase},
};
use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Shared tolerance for money comparisons: one cent
fn cent() -> Decimal {
    Decimal::new(1, 2)
}

/// Tunable enforcement thresholds
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Minimum invoice amount
    pub min_amount: Decimal,
    /// Maximum invoice amount
    pub max_amount: Decimal,
    /// Allowed payment terms (days)
    pub allowed_terms: Vec<u16>,
    /// Fraud score above which invoices never progress
    pub fraud_threshold: f64,
    /// Maximum fraud score age
    pub fraud_max_age: Duration,
    /// Maximum sanctions snapshot age
    pub sanctions_max_age: Duration,
    /// Maximum credit limit cache age
    pub credit_limit_max_age: Duration,
    /// Maximum rail health probe age
    pub rail_health_max_age: Duration,
    /// Maximum FX rate age
    pub fx_max_age: Duration,
    /// Settlement hard deadline
    pub settlement_deadline: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_amount: Decimal::from(100),
            max_amount: Decimal::from(10_000_000),
            allowed_terms: vec![0, 15, 30, 45, 60, 90],
            fraud_threshold: 0.75,
            fraud_max_age: Duration::hours(24),
            sanctions_max_age: Duration::hours(6),
            credit_limit_max_age: Duration::hours(1),
            rail_health_max_age: Duration::seconds(30),
            fx_max_age: Duration::seconds(60),
            settlement_deadline: Duration::seconds(5),
        }
    }
}

// ---- Structural invariants (admission) ----

/// Invoice amount within the accepted band
pub struct AmountInRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl Invariant for AmountInRange {
    fn id(&self) -> InvariantId {
        InvariantId("amount-range")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.invoice {
            Some(inv) if inv.amount >= self.min && inv.amount <= self.max => CheckOutcome::Pass,
            Some(inv) => CheckOutcome::fail(format!(
                "amount {} outside [{}, {}]",
                inv.amount, self.min, self.max
            )),
            None => CheckOutcome::fail("invoice facts missing"),
        }
    }
}

/// Payment terms on the whitelist
pub struct TermsAllowed {
    pub allowed: Vec<u16>,
}

impl Invariant for TermsAllowed {
    fn id(&self) -> InvariantId {
        InvariantId("terms-allowed")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Important
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.invoice {
            Some(inv) if self.allowed.contains(&inv.terms_days) => CheckOutcome::Pass,
            Some(inv) => CheckOutcome::fail(format!("terms {} not in whitelist", inv.terms_days)),
            None => CheckOutcome::fail("invoice facts missing"),
        }
    }
}

/// Line items sum to the invoice amount within one cent
pub struct LineItemsSum;

impl Invariant for LineItemsSum {
    fn id(&self) -> InvariantId {
        InvariantId("line-items-sum")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.invoice {
            Some(inv) if (inv.line_items_total - inv.amount).abs() <= cent() => CheckOutcome::Pass,
            Some(inv) => CheckOutcome::fail(format!(
                "line items total {} != amount {}",
                inv.line_items_total, inv.amount
            )),
            None => CheckOutcome::fail("invoice facts missing"),
        }
    }
}

/// Content hash unique across all invoices
pub struct HashUnique;

impl Invariant for HashUnique {
    fn id(&self) -> InvariantId {
        InvariantId("hash-unique")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.invoice {
            Some(inv) if !inv.hash_duplicate => CheckOutcome::Pass,
            Some(_) => CheckOutcome::fail("duplicate invoice content hash"),
            None => CheckOutcome::fail("invoice facts missing"),
        }
    }
}

/// Supplier and buyer are different parties
pub struct PartiesDistinct;

impl Invariant for PartiesDistinct {
    fn id(&self) -> InvariantId {
        InvariantId("parties-distinct")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.invoice {
            Some(inv) if inv.supplier != inv.buyer => CheckOutcome::Pass,
            Some(_) => CheckOutcome::fail("supplier and buyer are the same account"),
            None => CheckOutcome::fail("invoice facts missing"),
        }
    }
}

// ---- Party invariants ----

/// Every participating account is active
pub struct AccountsActive;

impl Invariant for AccountsActive {
    fn id(&self) -> InvariantId {
        InvariantId("accounts-active")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.parties {
            Some(p) => match p.active.iter().find(|(_, active)| !active) {
                None => CheckOutcome::Pass,
                Some((account, _)) => {
                    CheckOutcome::fail(format!("account {} is not active", account))
                }
            },
            None => CheckOutcome::fail("party facts missing"),
        }
    }
}

/// KYC verified for every participant
pub struct KycVerified;

impl Invariant for KycVerified {
    fn id(&self) -> InvariantId {
        InvariantId("kyc-verified")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.parties {
            Some(p) => match p.kyc_verified.iter().find(|(_, ok)| !ok) {
                None => CheckOutcome::Pass,
                Some((account, _)) => {
                    CheckOutcome::fail(format!("account {} is not KYC verified", account))
                }
            },
            None => CheckOutcome::fail("party facts missing"),
        }
    }
}

/// No participant on the sanctions list; the snapshot itself must be fresh
pub struct SanctionsClear {
    pub max_snapshot_age: Duration,
}

impl Invariant for SanctionsClear {
    fn id(&self) -> InvariantId {
        InvariantId("sanctions-clear")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn decay_window(&self) -> Option<Duration> {
        Some(self.max_snapshot_age)
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        let Some(p) = &ctx.parties else {
            return CheckOutcome::fail("party facts missing");
        };

        if p.sanctions_snapshot_age_s > self.max_snapshot_age.num_seconds() {
            return CheckOutcome::fail(format!(
                "sanctions snapshot is {}s old",
                p.sanctions_snapshot_age_s
            ));
        }

        match p.sanctioned.iter().find(|(_, hit)| *hit) {
            None => CheckOutcome::Pass,
            Some((account, _)) => {
                CheckOutcome::fail(format!("account {} matched the sanctions list", account))
            }
        }
    }
}

/// Buyer stays within the approved credit limit; the cached limit must be fresh
pub struct CreditWithinLimit {
    pub max_limit_age: Duration,
}

impl Invariant for CreditWithinLimit {
    fn id(&self) -> InvariantId {
        InvariantId("credit-within-limit")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn decay_window(&self) -> Option<Duration> {
        Some(self.max_limit_age)
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        let Some(c) = &ctx.credit else {
            return CheckOutcome::fail("credit facts missing");
        };

        if c.limit_age_s > self.max_limit_age.num_seconds() {
            return CheckOutcome::fail(format!("credit limit cache is {}s old", c.limit_age_s));
        }

        if c.outstanding + c.requested <= c.limit {
            CheckOutcome::Pass
        } else {
            CheckOutcome::fail(format!(
                "outstanding {} + requested {} exceeds limit {}",
                c.outstanding, c.requested, c.limit
            ))
        }
    }
}

// ---- Pricing invariants ----

/// Quote exists, is unexpired, and has not been consumed
pub struct QuoteUsable;

impl Invariant for QuoteUsable {
    fn id(&self) -> InvariantId {
        InvariantId("quote-usable")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        let Some(q) = &ctx.quote else {
            return CheckOutcome::fail("quote facts missing");
        };

        if q.used {
            return CheckOutcome::fail("quote already consumed");
        }

        if ctx.instant() > q.expires_at {
            return CheckOutcome::fail("quote expired");
        }

        CheckOutcome::Pass
    }
}

/// Buyer is charged exactly the quoted total cost
pub struct PricingAccurate;

impl Invariant for PricingAccurate {
    fn id(&self) -> InvariantId {
        InvariantId("pricing-accurate")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn dependencies(&self) -> Vec<InvariantId> {
        vec![InvariantId("quote-usable")]
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.quote {
            Some(q) if (q.charged_cost - q.quoted_cost).abs() <= cent() => CheckOutcome::Pass,
            Some(q) => CheckOutcome::fail(format!(
                "charge {} deviates from quote {}",
                q.charged_cost, q.quoted_cost
            )),
            None => CheckOutcome::fail("quote facts missing"),
        }
    }
}

// ---- Fraud invariants ----

/// Fraud score fresh and under threshold; the pre-commit barrier must see
/// the identical timestamp pinned at acceptance
pub struct FraudScoreFresh {
    pub threshold: f64,
    pub max_age: Duration,
}

impl Invariant for FraudScoreFresh {
    fn id(&self) -> InvariantId {
        InvariantId("fraud-score-fresh")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn decay_window(&self) -> Option<Duration> {
        Some(self.max_age)
    }

    fn check(&self, phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        let Some(f) = &ctx.fraud else {
            return CheckOutcome::fail("fraud facts missing");
        };

        let age = ctx.instant() - f.computed_at;
        if age > self.max_age {
            return CheckOutcome::fail(format!("fraud score is {}h old", age.num_hours()));
        }

        if f.score > self.threshold {
            return CheckOutcome::fail(format!(
                "fraud score {:.4} above threshold {:.2}",
                f.score, self.threshold
            ));
        }

        if phase == Phase::Post {
            match f.pinned_at {
                Some(pinned) if pinned == f.computed_at => {}
                Some(_) => {
                    return CheckOutcome::fail("fraud score recomputed during critical section")
                }
                None => return CheckOutcome::fail("fraud timestamp was not pinned"),
            }
        }

        CheckOutcome::Pass
    }
}

// ---- Infrastructure invariants ----

/// Chosen rail is up and its health probe is recent
pub struct RailsHealthy {
    pub max_probe_age: Duration,
}

impl Invariant for RailsHealthy {
    fn id(&self) -> InvariantId {
        InvariantId("rails-healthy")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Important
    }

    fn decay_window(&self) -> Option<Duration> {
        Some(self.max_probe_age)
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        let Some(r) = &ctx.rails else {
            return CheckOutcome::fail("rail facts missing");
        };

        if !r.up {
            return CheckOutcome::fail(format!("rail {} is down", r.rail));
        }

        if r.probe_age_s > self.max_probe_age.num_seconds() {
            return CheckOutcome::fail(format!(
                "rail {} health probe is {}s old",
                r.rail, r.probe_age_s
            ));
        }

        CheckOutcome::Pass
    }
}

/// FX rate fresh when the settlement crosses currencies; single-currency
/// settlements carry no FX facts and pass
pub struct FxRateFresh {
    pub max_age: Duration,
}

impl Invariant for FxRateFresh {
    fn id(&self) -> InvariantId {
        InvariantId("fx-rate-fresh")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Important
    }

    fn decay_window(&self) -> Option<Duration> {
        Some(self.max_age)
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.fx {
            None => CheckOutcome::Pass,
            Some(fx) if fx.rate_age_s <= self.max_age.num_seconds() => CheckOutcome::Pass,
            Some(fx) => {
                CheckOutcome::fail(format!("FX rate for {} is {}s old", fx.pair, fx.rate_age_s))
            }
        }
    }
}

/// Winning bid unexpired and still funded
pub struct BidUsable;

impl Invariant for BidUsable {
    fn id(&self) -> InvariantId {
        InvariantId("bid-usable")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Important
    }

    fn dependencies(&self) -> Vec<InvariantId> {
        // Bid validity is judged against the quote being exercised
        vec![InvariantId("quote-usable")]
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        let Some(b) = &ctx.bid else {
            return CheckOutcome::fail("bid facts missing");
        };

        if ctx.instant() >= b.expires_at {
            return CheckOutcome::fail("winning bid expired");
        }

        if b.capacity < b.invoice_amount {
            return CheckOutcome::fail("bid capacity below invoice amount");
        }

        if b.provider_liquidity < b.capacity {
            return CheckOutcome::fail(format!(
                "provider {} liquidity below bid capacity",
                b.provider
            ));
        }

        CheckOutcome::Pass
    }
}

/// Buyer's acceptance signature verifies against the bound quote
pub struct AcceptanceSigned;

impl Invariant for AcceptanceSigned {
    fn id(&self) -> InvariantId {
        InvariantId("acceptance-signed")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.signature {
            Some(s) if s.verified => CheckOutcome::Pass,
            Some(s) => CheckOutcome::fail(format!("signature from {} failed to verify", s.signer)),
            None => CheckOutcome::fail("signature facts missing"),
        }
    }
}

// ---- Settlement invariants ----

/// Every invoice settles exactly once
pub struct SettleExactlyOnce;

impl Invariant for SettleExactlyOnce {
    fn id(&self) -> InvariantId {
        InvariantId("settle-exactly-once")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn check(&self, phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        let Some(s) = &ctx.settlement else {
            return CheckOutcome::fail("settlement facts missing");
        };

        match phase {
            Phase::Pre if s.row_count == 0 => CheckOutcome::Pass,
            Phase::Pre => CheckOutcome::fail(format!(
                "invoice already has {} settlement row(s)",
                s.row_count
            )),
            Phase::Post if s.row_count == 1 => CheckOutcome::Pass,
            Phase::Post => CheckOutcome::fail(format!(
                "expected exactly one settlement row, found {}",
                s.row_count
            )),
        }
    }
}

/// All three legs land, and their balance effects cancel across the
/// participants
pub struct LegsAtomic;

impl Invariant for LegsAtomic {
    fn id(&self) -> InvariantId {
        InvariantId("legs-atomic")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn dependencies(&self) -> Vec<InvariantId> {
        vec![
            InvariantId("settle-exactly-once"),
            InvariantId("accounts-active"),
        ]
    }

    fn check(&self, phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        if phase == Phase::Pre {
            return CheckOutcome::Pass;
        }

        let Some(s) = &ctx.settlement else {
            return CheckOutcome::fail("settlement facts missing");
        };

        if s.leg_count != 3 {
            return CheckOutcome::fail(format!("expected 3 legs, found {}", s.leg_count));
        }

        if s.participant_net.abs() > cent() {
            return CheckOutcome::fail(format!(
                "participant balance effects sum to {}",
                s.participant_net
            ));
        }

        if !s.statuses_unchanged {
            return CheckOutcome::fail("a participant's status changed during the window");
        }

        CheckOutcome::Pass
    }
}

/// Settlement completed within the hard deadline
pub struct SettlementDeadline {
    pub deadline: Duration,
}

impl Invariant for SettlementDeadline {
    fn id(&self) -> InvariantId {
        InvariantId("settlement-deadline")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Important
    }

    fn dependencies(&self) -> Vec<InvariantId> {
        vec![InvariantId("legs-atomic")]
    }

    fn check(&self, phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        if phase == Phase::Pre {
            return CheckOutcome::Pass;
        }

        let Some(s) = &ctx.settlement else {
            return CheckOutcome::fail("settlement facts missing");
        };

        match s.completed_at {
            Some(done) if done - s.started_at < self.deadline => CheckOutcome::Pass,
            Some(done) => CheckOutcome::fail(format!(
                "settlement took {}ms",
                (done - s.started_at).num_milliseconds()
            )),
            None => CheckOutcome::fail("settlement has no completion time"),
        }
    }
}

/// Journal credits equal debits; a violation freezes the system
pub struct LedgerBalanced;

impl Invariant for LedgerBalanced {
    fn id(&self) -> InvariantId {
        InvariantId("ledger-balanced")
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    fn dependencies(&self) -> Vec<InvariantId> {
        vec![InvariantId("legs-atomic")]
    }

    fn failure_action(&self) -> EnforcementAction {
        EnforcementAction::Freeze
    }

    fn check(&self, _phase: Phase, ctx: &CheckContext) -> CheckOutcome {
        match &ctx.ledger {
            Some(l) if l.imbalance <= cent() => CheckOutcome::Pass,
            Some(l) => CheckOutcome::fail(format!("journal imbalance of {}", l.imbalance)),
            None => CheckOutcome::fail("ledger facts missing"),
        }
    }
}

/// The full production registry
pub fn standard_registry(t: &Thresholds) -> Vec<Arc<dyn Invariant>> {
    vec![
        Arc::new(AmountInRange {
            min: t.min_amount,
            max: t.max_amount,
        }),
        Arc::new(TermsAllowed {
            allowed: t.allowed_terms.clone(),
        }),
        Arc::new(LineItemsSum),
        Arc::new(HashUnique),
        Arc::new(PartiesDistinct),
        Arc::new(AccountsActive),
        Arc::new(KycVerified),
        Arc::new(SanctionsClear {
            max_snapshot_age: t.sanctions_max_age,
        }),
        Arc::new(CreditWithinLimit {
            max_limit_age: t.credit_limit_max_age,
        }),
        Arc::new(QuoteUsable),
        Arc::new(PricingAccurate),
        Arc::new(FraudScoreFresh {
            threshold: t.fraud_threshold,
            max_age: t.fraud_max_age,
        }),
        Arc::new(RailsHealthy {
            max_probe_age: t.rail_health_max_age,
        }),
        Arc::new(FxRateFresh { max_age: t.fx_max_age }),
        Arc::new(BidUsable),
        Arc::new(AcceptanceSigned),
        Arc::new(SettleExactlyOnce),
        Arc::new(LegsAtomic),
        Arc::new(SettlementDeadline {
            deadline: t.settlement_deadline,
        }),
        Arc::new(LedgerBalanced),
    ]
}
