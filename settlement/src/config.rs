//! Enumerated settlement configuration
//!
//! Every knob is a named field; unknown keys are rejected at load and
//! `validate` runs before anything is wired up.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettlementConfig {
    /// Hard end-to-end ceiling for a settlement
    pub settlement_deadline_ms: u64,

    /// Per-rail prepare budget
    pub prepare_timeout_ms: u64,

    /// Per-rail commit budget
    pub commit_timeout_ms: u64,

    /// Absolute ceiling including indeterminate-commit resolution
    pub timeout_ceiling_ms: u64,

    /// Quote TTL
    pub quote_ttl_s: u64,

    /// Auction bidding window
    pub auction_duration_s: u64,

    /// Valid-bid count below which a close is low-liquidity
    pub min_bids_target: usize,

    /// Rate applied on a low-liquidity close (annualised)
    pub fallback_discount_rate: Decimal,

    /// Fraud score above which invoices never progress
    pub fraud_threshold: f64,

    /// Maximum fraud score age at acceptance
    pub fraud_score_max_age_h: i64,

    /// Credit limit cache TTL
    pub credit_limit_cache_ttl_s: i64,

    /// Maximum sanctions snapshot age
    pub sanctions_snapshot_max_age_h: i64,

    /// Maximum rail health probe age
    pub rail_health_max_age_s: i64,

    /// Per-supplier invoice submissions per hour
    pub rate_limit_invoices_per_hour: u32,

    /// Pending invoices expire after this many hours
    pub invoice_expiry_h: i64,

    /// Orphan credit reservations released after this many minutes
    pub orphan_reservation_m: i64,

    /// Orphan prepared legs swept after this many minutes
    pub orphan_leg_sweep_m: i64,

    /// Ledger reconciliation interval
    pub reconcile_interval_m: i64,

    /// Rail priorities, fastest first
    pub rail_priorities: Vec<RailPriority>,
}

/// One rail's routing priority
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RailPriority {
    pub rail: String,
    pub priority: u8,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            settlement_deadline_ms: 5000,
            prepare_timeout_ms: 2000,
            commit_timeout_ms: 2000,
            timeout_ceiling_ms: 10_000,
            quote_ttl_s: 300,
            auction_duration_s: 10,
            min_bids_target: 3,
            fallback_discount_rate: Decimal::new(10, 2),
            fraud_threshold: 0.75,
            fraud_score_max_age_h: 24,
            credit_limit_cache_ttl_s: 3600,
            sanctions_snapshot_max_age_h: 6,
            rail_health_max_age_s: 30,
            rate_limit_invoices_per_hour: 100,
            invoice_expiry_h: 48,
            orphan_reservation_m: 10,
            orphan_leg_sweep_m: 60,
            reconcile_interval_m: 10,
            rail_priorities: vec![
                RailPriority {
                    rail: "rtp".to_string(),
                    priority: 1,
                },
                RailPriority {
                    rail: "fednow".to_string(),
                    priority: 2,
                },
                RailPriority {
                    rail: "ach".to_string(),
                    priority: 3,
                },
            ],
        }
    }
}

impl SettlementConfig {
    /// Load from a TOML file, validated
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read config: {}", e)))?;
        let config: SettlementConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Cannot parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot meet the latency contract
    pub fn validate(&self) -> Result<()> {
        if self.settlement_deadline_ms == 0 {
            return Err(Error::Config("settlement_deadline_ms must be positive".to_string()));
        }

        if self.timeout_ceiling_ms < self.settlement_deadline_ms {
            return Err(Error::Config(
                "timeout_ceiling_ms must be at least settlement_deadline_ms".to_string(),
            ));
        }

        if self.prepare_timeout_ms + self.commit_timeout_ms > self.settlement_deadline_ms {
            return Err(Error::Config(
                "prepare + commit budgets exceed the settlement deadline".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.fraud_threshold) {
            return Err(Error::Config("fraud_threshold must be in [0, 1]".to_string()));
        }

        if self.fallback_discount_rate <= Decimal::ZERO
            || self.fallback_discount_rate > Decimal::new(15, 2)
        {
            return Err(Error::Config(
                "fallback_discount_rate must be in (0, 0.15]".to_string(),
            ));
        }

        if self.rail_priorities.is_empty() {
            return Err(Error::Config("at least one rail must be configured".to_string()));
        }

        Ok(())
    }

    /// Enforcement thresholds derived from this config
    pub fn thresholds(&self) -> enforcement::Thresholds {
        enforcement::Thresholds {
            fraud_threshold: self.fraud_threshold,
            fraud_max_age: chrono::Duration::hours(self.fraud_score_max_age_h),
            sanctions_max_age: chrono::Duration::hours(self.sanctions_snapshot_max_age_h),
            credit_limit_max_age: chrono::Duration::seconds(self.credit_limit_cache_ttl_s),
            rail_health_max_age: chrono::Duration::seconds(self.rail_health_max_age_s),
            settlement_deadline: chrono::Duration::milliseconds(self.settlement_deadline_ms as i64),
            ..enforcement::Thresholds::default()
        }
    }

    /// Auction configuration derived from this config
    pub fn auction_config(&self) -> pricing::AuctionConfig {
        pricing::AuctionConfig {
            duration: chrono::Duration::seconds(self.auction_duration_s as i64),
            min_bids_target: self.min_bids_target,
            fallback_rate: self.fallback_discount_rate,
            ..pricing::AuctionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SettlementConfig::default().validate().is_ok());
    }

    #[test]
    fn test_budget_overflow_rejected() {
        let mut config = SettlementConfig::default();
        config.prepare_timeout_ms = 3000;
        config.commit_timeout_ms = 3000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ceiling_below_deadline_rejected() {
        let mut config = SettlementConfig::default();
        config.timeout_ceiling_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let toml = r#"
            settlement_deadline_ms = 5000
            mystery_knob = 1
        "#;
        assert!(toml::from_str::<SettlementConfig>(toml).is_err());
    }
}
