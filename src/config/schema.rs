//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the registry gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Response cache sizing and cleanup.
    pub cache: CacheConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Outbound concurrency limits.
    pub concurrency: ConcurrencyConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Upstream registry definitions.
    pub registries: Vec<RegistryConfig>,
}

/// Per-client response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Soft bound on live entries (0 = default of 10 000).
    pub max_entries: usize,

    /// Interval between expiry/size sweeps in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            cleanup_interval_secs: 300,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before probing, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Probes allowed while half-open.
    pub half_open_max: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_max: 2,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,

    /// Backoff unit in milliseconds; retry n waits n² × base.
    pub base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,

    /// Longest Retry-After we are willing to honour, in seconds.
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            max_retry_after_secs: 60,
        }
    }
}

/// Outbound concurrency configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Concurrent upstream calls per registry client.
    pub max_concurrent_requests: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
        }
    }
}

/// Timeout configuration for upstream HTTP calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A single upstream business registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Registry identifier used for lookup, logging and metrics.
    pub name: String,

    /// Base URL, e.g. "https://data.brreg.no/enhetsregisteret/api".
    pub base_url: String,

    /// Path for entity lookups; must contain `{id}`.
    #[serde(default = "default_company_path")]
    pub company_path: String,

    /// Path for name searches; must contain `{query}`.
    #[serde(default = "default_search_path")]
    pub search_path: String,

    /// Cache TTL for entity lookups in seconds.
    #[serde(default = "default_company_ttl")]
    pub company_ttl_secs: u64,

    /// Cache TTL for search results in seconds.
    #[serde(default = "default_search_ttl")]
    pub search_ttl_secs: u64,

    /// User-Agent sent upstream.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Honour HTTP(S)_PROXY from the environment.
    #[serde(default = "default_system_proxy")]
    pub system_proxy: bool,
}

impl RegistryConfig {
    /// Registry with default paths and TTLs.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            company_path: default_company_path(),
            search_path: default_search_path(),
            company_ttl_secs: default_company_ttl(),
            search_ttl_secs: default_search_ttl(),
            user_agent: None,
            system_proxy: default_system_proxy(),
        }
    }
}

fn default_company_path() -> String {
    "/companies/{id}".to_string()
}

fn default_search_path() -> String {
    "/companies?name={query}".to_string()
}

fn default_company_ttl() -> u64 {
    3600
}

fn default_search_ttl() -> u64 {
    300
}

fn default_system_proxy() -> bool {
    true
}
