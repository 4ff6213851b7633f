//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed attempt is worth repeating
//! - Wait between attempts with quadratic backoff, or the upstream's Retry-After
//! - Abandon the wait as soon as the caller cancels
//!
//! # Design Decisions
//! - Transport errors and 5xx are always retryable; other 4xx never are
//! - 429 is retried only when the upstream says when, capped by `max_retry_after`
//! - The last error is returned unchanged so the breaker can classify it

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::cancel;

/// How many times, and how patiently, a call is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based) after `err`.
    pub fn delay_for(&self, retry: u32, err: &GatewayError) -> Duration {
        match err {
            GatewayError::RateLimited {
                retry_after: Some(after),
            } => (*after).min(self.max_retry_after),
            _ => calculate_backoff(retry, self.base_delay_ms, self.max_delay_ms),
        }
    }

    /// Run `attempt` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only the backoff sleep observes `cancel`; an attempt already running is
    /// expected to be bounded by its own timeouts.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        label: &str,
        mut attempt: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut tries = 0;
        loop {
            tries += 1;
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || tries >= self.max_attempts {
                if tries > 1 {
                    tracing::warn!(registry = %label, attempts = tries, error = %err, "Giving up after retries");
                }
                return Err(err);
            }

            let delay = self.delay_for(tries, &err);
            tracing::info!(
                registry = %label,
                attempt = tries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying upstream request"
            );
            metrics::record_retry(label, retry_reason(&err));
            cancel::sleep(cancel, delay).await?;
        }
    }
}

fn retry_reason(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::Transport(_) => "transport",
        GatewayError::Upstream { .. } => "upstream",
        GatewayError::RateLimited { .. } => "rate_limited",
        _ => "other",
    }
}
