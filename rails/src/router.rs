//! Rail selection
//!
//! Rails are ordered by priority (fast rails first). A rail is offered
//! only when its circuit is not open and its health probe is fresh and
//! up; otherwise the router falls through to the next. Once prepare
//! succeeds on a rail the settlement stays there; the router only picks
//! the starting rail.

use crate::{
    adapter::RailAdapter,
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState},
    types::RailHealth,
    Error, Result,
};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Router over the configured rails
pub struct RailRouter {
    /// Sorted by priority at construction
    rails: Vec<Arc<dyn RailAdapter>>,
    breakers: CircuitBreakerManager,
    health_cache: DashMap<String, RailHealth>,
    max_probe_age: Duration,
}

impl RailRouter {
    /// Create a router; rails are sorted by their declared priority
    pub fn new(
        mut rails: Vec<Arc<dyn RailAdapter>>,
        breaker_config: CircuitBreakerConfig,
        max_probe_age: Duration,
    ) -> Self {
        rails.sort_by_key(|r| r.priority());
        Self {
            rails,
            breakers: CircuitBreakerManager::new(breaker_config),
            health_cache: DashMap::new(),
            max_probe_age,
        }
    }

    /// Pick the best available rail, probing health where the cached
    /// probe is stale.
    pub async fn select_rail(&self) -> Result<Arc<dyn RailAdapter>> {
        self.select_rail_excluding(&[]).await
    }

    /// Same, skipping rails already tried this settlement (a rejected
    /// prepare moves on; it does not retry the rejecting rail).
    pub async fn select_rail_excluding(&self, exclude: &[String]) -> Result<Arc<dyn RailAdapter>> {
        let now = Utc::now();

        for rail in &self.rails {
            if exclude.iter().any(|name| name == rail.name()) {
                continue;
            }
            if self.breakers.check(rail.name()).is_err() {
                tracing::debug!(rail = rail.name(), "Skipping rail: circuit open");
                continue;
            }

            let cached = self
                .health_cache
                .get(rail.name())
                .filter(|h| h.age_s(now) <= self.max_probe_age.num_seconds())
                .map(|h| h.clone());

            let health = match cached {
                Some(h) => h,
                None => {
                    let probed = rail.health().await;
                    self.health_cache.insert(rail.name().to_string(), probed.clone());
                    probed
                }
            };

            if health.up {
                return Ok(rail.clone());
            }

            tracing::debug!(rail = rail.name(), "Skipping rail: probe reports down");
        }

        Err(Error::NoRailAvailable)
    }

    /// Find a rail by name (a settlement stays on its prepare rail)
    pub fn by_name(&self, name: &str) -> Result<Arc<dyn RailAdapter>> {
        self.rails
            .iter()
            .find(|r| r.name() == name)
            .cloned()
            .ok_or_else(|| Error::Unavailable {
                rail: name.to_string(),
                reason: "not configured".to_string(),
            })
    }

    /// Record a call outcome for the breaker
    pub fn record_outcome(&self, rail: &str, success: bool) {
        if success {
            self.breakers.record_success(rail);
        } else {
            self.breakers.record_failure(rail);
        }
    }

    /// Latest cached probe ages, for pre-checks and /health
    pub fn health_snapshot(&self) -> Vec<RailHealth> {
        self.health_cache.iter().map(|h| h.clone()).collect()
    }

    /// Breaker state for a rail
    pub fn circuit_state(&self, rail: &str) -> CircuitState {
        self.breakers.state(rail)
    }

    /// Probe every rail now and refresh the cache
    pub async fn probe_all(&self) -> Vec<RailHealth> {
        let mut out = Vec::with_capacity(self.rails.len());
        for rail in &self.rails {
            let health = rail.health().await;
            self.health_cache.insert(rail.name().to_string(), health.clone());
            out.push(health);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedRail;
    use std::time::Duration as StdDuration;

    fn router(rails: Vec<Arc<SimulatedRail>>) -> RailRouter {
        RailRouter::new(
            rails.into_iter().map(|r| r as Arc<dyn RailAdapter>).collect(),
            CircuitBreakerConfig::default(),
            Duration::seconds(30),
        )
    }

    #[tokio::test]
    async fn test_fastest_priority_wins() {
        let rtp = Arc::new(SimulatedRail::new("rtp", 1, StdDuration::from_millis(0)));
        let ach = Arc::new(SimulatedRail::new("ach", 3, StdDuration::from_millis(0)));

        let router = router(vec![ach, rtp]);
        assert_eq!(router.select_rail().await.unwrap().name(), "rtp");
    }

    #[tokio::test]
    async fn test_down_rail_skipped() {
        let rtp = Arc::new(SimulatedRail::new("rtp", 1, StdDuration::from_millis(0)));
        let ach = Arc::new(SimulatedRail::new("ach", 3, StdDuration::from_millis(0)));
        rtp.set_up(false);

        let router = router(vec![rtp, ach]);
        assert_eq!(router.select_rail().await.unwrap().name(), "ach");
    }

    #[tokio::test]
    async fn test_no_rail_available() {
        let rtp = Arc::new(SimulatedRail::new("rtp", 1, StdDuration::from_millis(0)));
        rtp.set_up(false);

        let router = router(vec![rtp]);
        assert!(matches!(
            router.select_rail().await,
            Err(Error::NoRailAvailable)
        ));
    }

    #[tokio::test]
    async fn test_open_circuit_fails_over() {
        let rtp = Arc::new(SimulatedRail::new("rtp", 1, StdDuration::from_millis(0)));
        let ach = Arc::new(SimulatedRail::new("ach", 3, StdDuration::from_millis(0)));

        let router = router(vec![rtp, ach]);
        for _ in 0..3 {
            router.record_outcome("rtp", false);
        }

        assert_eq!(router.select_rail().await.unwrap().name(), "ach");
    }
}
