//! Prometheus metrics for the pipeline

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Invoices admitted
    pub invoices_created: IntCounter,

    /// Settlements that completed all three legs
    pub settlements_completed: IntCounter,

    /// Settlements rejected or failed
    pub settlements_failed: IntCounter,

    /// End-to-end settlement duration
    pub settlement_duration: Histogram,

    /// Auction closes below the competition target
    pub low_liquidity_closes: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create and register all collectors
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let invoices_created = IntCounter::with_opts(Opts::new(
            "invoices_created_total",
            "Invoices admitted through the store",
        ))?;
        registry.register(Box::new(invoices_created.clone()))?;

        let settlements_completed = IntCounter::with_opts(Opts::new(
            "settlements_completed_total",
            "Settlements with all three legs committed",
        ))?;
        registry.register(Box::new(settlements_completed.clone()))?;

        let settlements_failed = IntCounter::with_opts(Opts::new(
            "settlements_failed_total",
            "Settlements rejected or failed",
        ))?;
        registry.register(Box::new(settlements_failed.clone()))?;

        let settlement_duration = Histogram::with_opts(
            HistogramOpts::new(
                "settlement_duration_seconds",
                "End-to-end settlement latency",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(settlement_duration.clone()))?;

        let low_liquidity_closes = IntCounter::with_opts(Opts::new(
            "auction_low_liquidity_total",
            "Auction closes below the bid target",
        ))?;
        registry.register(Box::new(low_liquidity_closes.clone()))?;

        Ok(Self {
            invoices_created,
            settlements_completed,
            settlements_failed,
            settlement_duration,
            low_liquidity_closes,
            registry,
        })
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let metrics = Metrics::new().unwrap();
        metrics.invoices_created.inc();
        metrics.settlements_completed.inc();
        metrics.settlement_duration.observe(1.2);

        let rendered = metrics.render();
        assert!(rendered.contains("invoices_created_total"));
        assert!(rendered.contains("settlement_duration_seconds"));
    }

    #[test]
    fn test_repeated_construction() {
        // Each collector lives in its own registry; tests can build freely
        let _a = Metrics::new().unwrap();
        let _b = Metrics::new().unwrap();
    }
}
