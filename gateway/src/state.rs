//! Service wiring

use crate::metrics::Metrics;
use accounts::{AccountRegistry, SanctionsScreen, StaticBureau, StaticFeed};
use chrono::Duration;
use enforcement::{standard_registry, DecisionLedger, FreezeSwitch, InvariantEngine};
use fraud::{FraudGate, SignalScorer};
use invoices::{AdmissionLimits, InvoiceStore};
use ledger_core::{crypto::KeyPair, Ledger};
use pricing::{AuctionBook, JournalLiquidity, QuoteBook};
use rails::{CircuitBreakerConfig, RailAdapter, RailRouter, SimulatedRail};
use serde::Deserialize;
use settlement::{
    LifecycleScheduler, SettlementConfig, SettlementCoordinator, SettlementJournal,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// HTTP bind address
    pub bind_addr: String,
    /// Journal data directory
    pub data_dir: PathBuf,
    /// Settlement pipeline knobs
    pub settlement: SettlementConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("./data/journal"),
            settlement: SettlementConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Environment overrides on top of defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("GATEWAY_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("GATEWAY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config
    }
}

/// Shared service graph behind the handlers
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub engine: Arc<InvariantEngine>,
    pub registry: Arc<AccountRegistry>,
    pub sanctions: Arc<SanctionsScreen>,
    pub invoices: Arc<InvoiceStore>,
    pub quotes: Arc<QuoteBook>,
    pub auctions: Arc<AuctionBook>,
    pub scorer: Arc<SignalScorer>,
    pub fraud_gate: Arc<FraudGate>,
    pub router: Arc<RailRouter>,
    pub coordinator: Arc<SettlementCoordinator>,
    pub scheduler: Arc<LifecycleScheduler>,
    pub freeze: Arc<FreezeSwitch>,
    pub decisions: Arc<DecisionLedger>,
    pub metrics: Metrics,
    pub config: GatewayConfig,
}

impl AppState {
    /// Build the full service graph.
    ///
    /// The signing key is ephemeral unless `JOURNAL_KEY_SEED` is set; a
    /// fresh key cannot verify a journal written by an earlier run.
    pub async fn build(config: GatewayConfig) -> anyhow::Result<Arc<Self>> {
        config.settlement.validate()?;
        let settlement_config = config.settlement.clone();

        let keypair = match std::env::var("JOURNAL_KEY_SEED") {
            Ok(seed) => {
                let bytes = seed.as_bytes();
                let mut arr = [0u8; 32];
                let len = bytes.len().min(32);
                arr[..len].copy_from_slice(&bytes[..len]);
                KeyPair::from_seed(&arr)
            }
            Err(_) => {
                tracing::warn!("JOURNAL_KEY_SEED not set; journal key is ephemeral");
                KeyPair::generate()
            }
        };

        let mut ledger_config = ledger_core::Config::default();
        ledger_config.data_dir = config.data_dir.clone();
        let ledger = Arc::new(Ledger::open(ledger_config, keypair).await?);

        let decisions = Arc::new(DecisionLedger::new(Arc::new(KeyPair::generate())));
        let engine = Arc::new(InvariantEngine::new(
            standard_registry(&settlement_config.thresholds()),
            decisions.clone(),
        )?);
        let freeze = Arc::new(FreezeSwitch::new());

        let registry = Arc::new(AccountRegistry::new(
            Arc::new(StaticBureau::new()),
            Duration::seconds(settlement_config.credit_limit_cache_ttl_s),
        ));
        let sanctions = Arc::new(SanctionsScreen::new(
            Arc::new(StaticFeed::new()),
            Duration::hours(settlement_config.sanctions_snapshot_max_age_h),
        ));

        let mut limits = AdmissionLimits::default();
        limits.rate_limit_per_hour = settlement_config.rate_limit_invoices_per_hour;
        let invoices = Arc::new(InvoiceStore::new(decisions.clone(), limits));

        let auctions = Arc::new(AuctionBook::new(
            Arc::new(JournalLiquidity::new(ledger.clone())),
            settlement_config.auction_config(),
        ));
        let quotes = Arc::new(QuoteBook::new(Duration::seconds(
            settlement_config.quote_ttl_s as i64,
        )));

        let scorer = Arc::new(SignalScorer::new());
        let fraud_gate = Arc::new(FraudGate::new(
            scorer.clone(),
            settlement_config.fraud_threshold,
            Duration::hours(settlement_config.fraud_score_max_age_h),
        ));

        let rail_adapters: Vec<Arc<dyn RailAdapter>> = settlement_config
            .rail_priorities
            .iter()
            .map(|rp| {
                Arc::new(SimulatedRail::new(
                    rp.rail.clone(),
                    rp.priority,
                    std::time::Duration::from_millis(10 * rp.priority as u64),
                )) as Arc<dyn RailAdapter>
            })
            .collect();
        let router = Arc::new(RailRouter::new(
            rail_adapters,
            CircuitBreakerConfig::default(),
            Duration::seconds(settlement_config.rail_health_max_age_s),
        ));

        let journal = Arc::new(SettlementJournal::new());
        let coordinator = Arc::new(SettlementCoordinator::new(
            ledger.clone(),
            engine.clone(),
            freeze.clone(),
            registry.clone(),
            sanctions.clone(),
            invoices.clone(),
            quotes.clone(),
            fraud_gate.clone(),
            router.clone(),
            journal,
            settlement_config.clone(),
        ));

        let scheduler = Arc::new(LifecycleScheduler::new(
            invoices.clone(),
            auctions.clone(),
            registry.clone(),
            coordinator.clone(),
            ledger.clone(),
            freeze.clone(),
            decisions.clone(),
            settlement_config,
        ));

        let metrics = Metrics::new()?;

        Ok(Arc::new(Self {
            ledger,
            engine,
            registry,
            sanctions,
            invoices,
            quotes,
            auctions,
            scorer,
            fraud_gate,
            router,
            coordinator,
            scheduler,
            freeze,
            decisions,
            metrics,
            config,
        }))
    }
}
