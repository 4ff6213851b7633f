//! Resilient gateway for business-registry APIs.
//!
//! Each configured registry gets its own client with a TTL/LRU response
//! cache, a circuit breaker, request coalescing, a concurrency limit and
//! retry with backoff. The pieces live in their own modules and can be used
//! on their own.

// Core building blocks
pub mod cache;
pub mod resilience;

// Registry access
pub mod client;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod observability;

pub use cache::Cache;
pub use client::{Gateway, RegistryClient, ResilientCaller};
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use resilience::{CircuitBreaker, RequestDeduplicator};
