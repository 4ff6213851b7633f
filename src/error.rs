//! Error types shared by the resilience core and the registry clients.

use std::time::Duration;
use thiserror::Error;

use crate::resilience::cancel::Cancelled;
use crate::resilience::circuit_breaker::CircuitState;

/// Errors surfaced by an orchestrated registry call.
///
/// The type is `Clone` because a single upstream outcome is handed to every
/// caller coalesced onto the same in-flight request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The circuit breaker rejected the call before any I/O.
    #[error("circuit {state} after {consecutive_failures} consecutive failures, retry in {retry_after:?}")]
    CircuitOpen {
        state: CircuitState,
        consecutive_failures: u32,
        retry_after: Duration,
    },

    /// The caller's cancellation token fired while waiting.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// Connection, DNS, TLS or timeout failure talking to the upstream.
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream answered with a 5xx.
    #[error("upstream error: status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Upstream answered 429.
    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Upstream answered with a 4xx other than 404 and 429.
    #[error("client error: status {status}: {message}")]
    Client { status: u16, message: String },

    /// The registry has no entity for the requested identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// The upstream body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request was rejected locally before any I/O.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client was asked for something its configuration cannot express.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Whether another attempt may succeed.
    ///
    /// 429 is only retried when the upstream said when to come back.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) | GatewayError::Upstream { .. } => true,
            GatewayError::RateLimited { retry_after } => retry_after.is_some(),
            _ => false,
        }
    }

    /// Whether this outcome says something about upstream health.
    ///
    /// Client errors and not-found answers are well-formed responses from a
    /// working service and are recorded as successes.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_)
                | GatewayError::Upstream { .. }
                | GatewayError::RateLimited { .. }
                | GatewayError::InvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}
