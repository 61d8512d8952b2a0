//! Circuit breaker per rail
//!
//! Closed until the failure threshold trips, then open until the timeout
//! elapses, then half-open while probing. The router consults the
//! breaker before offering a rail to the coordinator.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Closed (normal operation)
    Closed,
    /// Open (rejecting requests)
    Open,
    /// Half-open (testing)
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Open after N consecutive failures
    pub failure_threshold: u32,
    /// Seconds before an open circuit half-opens
    pub timeout_seconds: i64,
    /// Close after N successes in half-open
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            timeout_seconds: 30,
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone)]
struct Breaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
        }
    }
}

/// Breakers for all rails
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Breaker>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    /// Create with shared config
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Check whether the rail may take a request, transitioning
    /// open -> half-open when the timeout has elapsed.
    pub fn check(&self, rail: &str) -> Result<()> {
        let mut breaker = self.breakers.entry(rail.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = breaker
                    .last_failure_at
                    .map(|at| (Utc::now() - at).num_seconds())
                    .unwrap_or(i64::MAX);

                if elapsed >= self.config.timeout_seconds {
                    tracing::info!(rail, "Circuit half-opening");
                    breaker.state = CircuitState::HalfOpen;
                    breaker.success_count = 0;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        rail: rail.to_string(),
                        reason: format!(
                            "retry in {}s",
                            self.config.timeout_seconds - elapsed
                        ),
                    })
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self, rail: &str) {
        let mut breaker = self.breakers.entry(rail.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            CircuitState::Closed => breaker.failure_count = 0,
            CircuitState::HalfOpen => {
                breaker.success_count += 1;
                if breaker.success_count >= self.config.success_threshold {
                    tracing::info!(rail, "Circuit closing");
                    breaker.state = CircuitState::Closed;
                    breaker.failure_count = 0;
                    breaker.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, rail: &str) {
        let mut breaker = self.breakers.entry(rail.to_string()).or_insert_with(Breaker::new);

        breaker.failure_count += 1;
        breaker.last_failure_at = Some(Utc::now());

        match breaker.state {
            CircuitState::Closed => {
                if breaker.failure_count >= self.config.failure_threshold {
                    tracing::warn!(rail, failures = breaker.failure_count, "Circuit opening");
                    breaker.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(rail, "Circuit re-opening");
                breaker.state = CircuitState::Open;
                breaker.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state for a rail
    pub fn state(&self, rail: &str) -> CircuitState {
        self.breakers
            .get(rail)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }
}
