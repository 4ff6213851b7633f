//! Configuration validation.
//!
//! Serde handles syntax; this checks semantics (non-zero limits, unique
//! registry names, parseable URLs, path placeholders) and reports every
//! problem at once rather than stopping at the first.

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must be greater than zero")]
    ZeroValue(String),

    #[error("registry name must not be empty")]
    EmptyRegistryName,

    #[error("registry '{0}' is defined more than once")]
    DuplicateRegistry(String),

    #[error("registry '{registry}': invalid base_url: {reason}")]
    InvalidBaseUrl { registry: String, reason: String },

    #[error("registry '{registry}': {field} must contain {placeholder}")]
    MissingPlaceholder {
        registry: String,
        field: &'static str,
        placeholder: &'static str,
    },

    #[error("invalid metrics_address '{0}'")]
    InvalidMetricsAddress(String),
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let limits = [
        ("circuit_breaker.failure_threshold", config.circuit_breaker.failure_threshold as u64),
        ("circuit_breaker.reset_timeout_ms", config.circuit_breaker.reset_timeout_ms),
        ("circuit_breaker.half_open_max", config.circuit_breaker.half_open_max as u64),
        ("retries.max_attempts", config.retries.max_attempts as u64),
        (
            "concurrency.max_concurrent_requests",
            config.concurrency.max_concurrent_requests as u64,
        ),
        ("cache.cleanup_interval_secs", config.cache.cleanup_interval_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (field, value) in limits {
        if value == 0 {
            errors.push(ValidationError::ZeroValue(field.to_string()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let mut seen = HashSet::new();
    for registry in &config.registries {
        let name = registry.name.trim();
        if name.is_empty() {
            errors.push(ValidationError::EmptyRegistryName);
        } else if !seen.insert(name) {
            errors.push(ValidationError::DuplicateRegistry(name.to_string()));
        }

        if let Err(e) = url::Url::parse(&registry.base_url) {
            errors.push(ValidationError::InvalidBaseUrl {
                registry: registry.name.clone(),
                reason: e.to_string(),
            });
        }

        if !registry.company_path.contains("{id}") {
            errors.push(ValidationError::MissingPlaceholder {
                registry: registry.name.clone(),
                field: "company_path",
                placeholder: "{id}",
            });
        }
        if !registry.search_path.contains("{query}") {
            errors.push(ValidationError::MissingPlaceholder {
                registry: registry.name.clone(),
                field: "search_path",
                placeholder: "{query}",
            });
        }

        if registry.company_ttl_secs == 0 {
            errors.push(ValidationError::ZeroValue(format!("registries.{name}.company_ttl_secs")));
        }
        if registry.search_ttl_secs == 0 {
            errors.push(ValidationError::ZeroValue(format!("registries.{name}.search_ttl_secs")));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
