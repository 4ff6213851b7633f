//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to upstream registry:
//!     → circuit_breaker.rs (fail fast while open)
//!     → dedup.rs (one flight per key, waiters share the result)
//!     → retries.rs (retry transient failures with backoff.rs delays)
//!     → cancel.rs (every wait is abandoned when the caller cancels)
//!     → outcome reported back to circuit_breaker.rs
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline (reqwest timeouts) and a cancel token
//! - Only transport errors, 5xx and 429 with Retry-After are retried
//! - Circuit breaker prevents cascading failures
//! - Registry lookups are reads, so retrying is always safe

pub mod backoff;
pub mod cancel;
pub mod circuit_breaker;
pub mod dedup;
pub mod retries;

pub use cancel::{or_cancel, Cancelled};
pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStats};
pub use dedup::RequestDeduplicator;
pub use retries::RetryPolicy;
