//! Per-provider circuit breakers.

use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use codementor_core::config::ModelGatewayConfig;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure bookkeeping for one provider.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: BreakerState,
    pub failures: u32,
    pub last_failure: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            last_failure: None,
        }
    }
}

impl CircuitBreaker {
    fn cooled_down(&self, reset_timeout: Duration) -> bool {
        self.last_failure
            .map(|at| at.elapsed() >= reset_timeout)
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time after the last failure before an open breaker is probed again.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&ModelGatewayConfig> for BreakerConfig {
    fn from(config: &ModelGatewayConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
        }
    }
}

/// Breakers keyed by provider name.
///
/// Each update runs under the map's per-entry lock, so concurrent callers
/// never interleave a read-modify-write on the same provider.
pub struct BreakerRegistry {
    breakers: DashMap<String, CircuitBreaker>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Ensure a breaker exists for `name`.
    pub fn register(&self, name: &str) {
        self.breakers.entry(name.to_string()).or_default();
    }

    /// Whether a call may go to `name` now.
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open
    /// and admits the call.
    pub fn try_acquire(&self, name: &str) -> bool {
        let mut breaker = self.breakers.entry(name.to_string()).or_default();
        let state = breaker.state;
        match state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open if breaker.cooled_down(self.config.reset_timeout) => {
                breaker.state = BreakerState::HalfOpen;
                tracing::info!(provider = name, "Circuit breaker half-open, probing provider");
                true
            }
            BreakerState::Open => false,
        }
    }

    /// Same answer as [`try_acquire`](Self::try_acquire) without moving any
    /// breaker.
    pub fn admits(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            None => true,
            Some(breaker) => match breaker.state {
                BreakerState::Closed | BreakerState::HalfOpen => true,
                BreakerState::Open => breaker.cooled_down(self.config.reset_timeout),
            },
        }
    }

    pub fn record_success(&self, name: &str) {
        let mut breaker = self.breakers.entry(name.to_string()).or_default();
        if breaker.state != BreakerState::Closed {
            tracing::info!(provider = name, "Circuit breaker closed");
        }
        breaker.state = BreakerState::Closed;
        breaker.failures = 0;
    }

    pub fn record_failure(&self, name: &str) {
        let mut breaker = self.breakers.entry(name.to_string()).or_default();
        breaker.failures = breaker.failures.saturating_add(1);
        breaker.last_failure = Some(Instant::now());

        let trip = breaker.state == BreakerState::HalfOpen
            || breaker.failures >= self.config.failure_threshold;
        if trip && breaker.state != BreakerState::Open {
            breaker.state = BreakerState::Open;
            tracing::warn!(
                provider = name,
                failures = breaker.failures,
                "Circuit breaker OPENED"
            );
        }
    }

    pub fn state(&self, name: &str) -> BreakerState {
        self.breakers
            .get(name)
            .map(|b| b.state)
            .unwrap_or(BreakerState::Closed)
    }

    pub fn snapshot(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.get(name).map(|b| b.clone())
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
