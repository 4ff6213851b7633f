//! Circuit breaker for upstream registry protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: a bounded number of probes test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first allow() after reset_timeout has elapsed
//! Half-Open → Closed: a probe succeeds
//! Half-Open → Open: a probe fails
//! ```
//!
//! # Design Decisions
//! - Per-client circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - `allow()` takes the write lock because it may move Open → Half-Open

use serde::Serialize;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_probes: u32,
}

/// Three-state failure gate shared by every call a client makes.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max: u32,
    inner: RwLock<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker. Zero thresholds are raised to 1.
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        let name = name.into();
        metrics::record_circuit_state(&name, CircuitState::Closed);
        Self {
            name,
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            half_open_max: config.half_open_max.max(1),
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_probes: 0,
            }),
        }
    }

    /// Whether a call may proceed right now.
    pub fn allow(&self) -> bool {
        let mut inner = self.write();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() > self.reset_timeout);
                if cooled_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_probes = 0;
                }
                cooled_down
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probes < self.half_open_max {
                    inner.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a call that reached a healthy upstream.
    pub fn record_success(&self) {
        let mut inner = self.write();
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_probes = 0;
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Report a call that failed because of the upstream.
    pub fn record_failure(&self) {
        let mut inner = self.write();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.read_stats().state
    }

    pub fn stats(&self) -> CircuitStats {
        self.read_stats()
    }

    /// Time left before an open breaker lets a probe through.
    pub fn retry_after(&self) -> Duration {
        let stats = self.read_stats();
        match (stats.state, stats.last_failure) {
            (CircuitState::Closed, _) | (_, None) => Duration::ZERO,
            (_, Some(at)) => self.reset_timeout.saturating_sub(at.elapsed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Open => tracing::warn!(
                circuit = %self.name,
                from = %from,
                consecutive_failures = inner.consecutive_failures,
                reset_timeout = ?self.reset_timeout,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => tracing::info!(circuit = %self.name, "Circuit half-open, probing upstream"),
            CircuitState::Closed => tracing::info!(circuit = %self.name, from = %from, "Circuit closed"),
        }
        metrics::record_circuit_transition(&self.name, from, to);
    }

    fn write(&self) -> RwLockWriteGuard<'_, BreakerState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_stats(&self) -> CircuitStats {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        CircuitStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure: inner.last_failure,
        }
    }
}
