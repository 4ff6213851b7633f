//! Call orchestration for one upstream registry.
//!
//! # Call Sequence
//! ```text
//! call(key, ttl, attempt):
//!     1. breaker.allow()        → false: CircuitOpen, no I/O
//!     2. acquire permit          → cancellable; bounds concurrent calls
//!     3. dedup.run(key):
//!            cache hit           → value
//!            miss                → retry(attempt) → cache.set(key, ttl)
//!     4. report outcome          → failure / success / nothing if cancelled
//! ```
//!
//! # Design Decisions
//! - One upstream flight is one breaker report: callers served from another
//!   caller's flight only report while half-open, so probes always resolve
//! - Client errors and not-found are successes for the breaker
//! - Only successful values are cached

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{Cache, CacheStats};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::resilience::{or_cancel, CircuitBreaker, CircuitState, RequestDeduplicator, RetryPolicy};

/// Snapshot of a caller's resilience state.
#[derive(Debug, Clone, Serialize)]
pub struct CallerHealth {
    pub name: String,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub retry_after_ms: u64,
    pub cache: CacheStats,
    pub in_flight: usize,
    pub available_permits: usize,
    pub max_concurrent: usize,
}

/// Breaker, concurrency limit, dedup, cache and retries around one upstream.
pub struct ResilientCaller<T> {
    name: String,
    cache: Cache<T>,
    breaker: CircuitBreaker,
    dedup: RequestDeduplicator<T, GatewayError>,
    permits: Semaphore,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl<T> ResilientCaller<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: &GatewayConfig) -> Self {
        let name = name.into();
        let max_concurrent = config.concurrency.max_concurrent_requests.max(1);
        Self {
            cache: Cache::new(name.clone(), &config.cache),
            breaker: CircuitBreaker::new(name.clone(), &config.circuit_breaker),
            dedup: RequestDeduplicator::new(name.clone()),
            permits: Semaphore::new(max_concurrent),
            max_concurrent,
            retry: RetryPolicy::from(&config.retries),
            name,
        }
    }

    /// Run `attempt` for `key` behind every resilience layer.
    ///
    /// `attempt` performs one upstream request; it may be invoked several
    /// times by the retry loop, or not at all on a cache hit or when another
    /// caller's flight for the same key supplies the result.
    pub async fn call<F, Fut>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        ttl: Duration,
        attempt: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let span = tracing::debug_span!(
            "registry_call",
            registry = %self.name,
            key = %key,
            request_id = %Uuid::new_v4()
        );
        self.orchestrate(cancel, key, ttl, attempt).instrument(span).await
    }

    async fn orchestrate<F, Fut>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        ttl: Duration,
        attempt: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        if self.permits.is_closed() {
            return Err(self.closed_error());
        }

        if !self.breaker.allow() {
            let stats = self.breaker.stats();
            tracing::debug!(circuit = %stats.state, "Circuit rejected call");
            return Err(GatewayError::CircuitOpen {
                state: stats.state,
                consecutive_failures: stats.consecutive_failures,
                retry_after: self.breaker.retry_after(),
            });
        }

        let _permit = match or_cancel(cancel, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.closed_error()),
            Err(cancelled) => return Err(cancelled.into()),
        };

        let (result, shared) = self
            .dedup
            .run(cancel, key, || self.load(cancel, key, ttl, attempt))
            .await;
        if shared {
            tracing::debug!("Served from in-flight request");
            // The flight's own leader reports it; half-open probes still resolve.
            if self.breaker.state() != CircuitState::HalfOpen {
                return result;
            }
        }

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(GatewayError::Cancelled(_)) => {}
            Err(err) if err.counts_as_failure() => self.breaker.record_failure(),
            Err(_) => self.breaker.record_success(),
        }
        result
    }

    async fn load<F, Fut>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        ttl: Duration,
        attempt: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        if let Some(hit) = self.cache.get(key) {
            tracing::debug!("Cache hit");
            return Ok(hit);
        }

        let value = self.retry.run(cancel, &self.name, attempt).await?;
        self.cache.set(key, value.clone(), ttl);
        Ok(value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &Cache<T> {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn health(&self) -> CallerHealth {
        let stats = self.breaker.stats();
        CallerHealth {
            name: self.name.clone(),
            circuit: stats.state,
            consecutive_failures: stats.consecutive_failures,
            retry_after_ms: self.breaker.retry_after().as_millis() as u64,
            cache: self.cache.stats(),
            in_flight: self.dedup.in_flight(),
            available_permits: self.permits.available_permits(),
            max_concurrent: self.max_concurrent,
        }
    }

    /// Reject new calls and stop the cache's cleanup loop. Idempotent.
    pub fn close(&self) {
        self.permits.close();
        self.cache.close();
    }

    fn closed_error(&self) -> GatewayError {
        GatewayError::Configuration(format!("client '{}' is closed", self.name))
    }
}
