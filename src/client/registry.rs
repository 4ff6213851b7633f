//! HTTP client for one business registry.
//!
//! Lookups and searches are rendered from the registry's path templates and
//! sent through a [`ResilientCaller`], so every request is cached, coalesced,
//! retried and guarded by the circuit breaker.

use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::orchestrator::{CallerHealth, ResilientCaller};
use crate::config::{GatewayConfig, RegistryConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;

const COMPANY_PREFIX: &str = "company:";
const SEARCH_PREFIX: &str = "search:";
const MAX_ERROR_BODY: usize = 256;

/// Resilient JSON client for a single registry.
pub struct RegistryClient {
    name: String,
    http: reqwest::Client,
    base_url: String,
    company_path: String,
    search_path: String,
    company_ttl: Duration,
    search_ttl: Duration,
    caller: ResilientCaller<Value>,
}

impl RegistryClient {
    pub fn new(registry: &RegistryConfig, config: &GatewayConfig) -> GatewayResult<Self> {
        Url::parse(&registry.base_url).map_err(|e| {
            GatewayError::Configuration(format!("registry '{}': invalid base_url: {e}", registry.name))
        })?;

        let user_agent = registry
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("registry-gateway/{}", env!("CARGO_PKG_VERSION")));
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs.max(1)))
            .timeout(Duration::from_secs(config.timeouts.request_secs.max(1)))
            .user_agent(user_agent);
        if !registry.system_proxy {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|e| GatewayError::Configuration(format!("registry '{}': {e}", registry.name)))?;

        Ok(Self {
            name: registry.name.clone(),
            http,
            base_url: registry.base_url.trim_end_matches('/').to_string(),
            company_path: registry.company_path.clone(),
            search_path: registry.search_path.clone(),
            company_ttl: Duration::from_secs(registry.company_ttl_secs),
            search_ttl: Duration::from_secs(registry.search_ttl_secs),
            caller: ResilientCaller::new(registry.name.clone(), config),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch one entity by registry identifier.
    pub async fn company(&self, cancel: &CancellationToken, id: &str) -> GatewayResult<Value> {
        let id = non_empty(id, "company id")?;
        let url = self.endpoint(&self.company_path, "{id}", id)?;
        let key = format!("{COMPANY_PREFIX}{id}");
        self.caller
            .call(cancel, &key, self.company_ttl, || self.fetch(&url, id))
            .await
    }

    /// Search entities by name.
    pub async fn search(&self, cancel: &CancellationToken, query: &str) -> GatewayResult<Value> {
        let query = non_empty(query, "search query")?;
        let url = self.endpoint(&self.search_path, "{query}", query)?;
        let key = format!("{SEARCH_PREFIX}{query}");
        self.caller
            .call(cancel, &key, self.search_ttl, || self.fetch(&url, query))
            .await
    }

    /// Drop a cached entity. Returns whether anything was cached.
    pub fn invalidate_company(&self, id: &str) -> bool {
        self.caller.cache().delete(&format!("{COMPANY_PREFIX}{}", id.trim()))
    }

    /// Drop every cached search result. Returns how many were removed.
    pub fn invalidate_searches(&self) -> usize {
        self.caller.cache().delete_prefix(SEARCH_PREFIX)
    }

    pub fn health(&self) -> CallerHealth {
        self.caller.health()
    }

    pub fn close(&self) {
        self.caller.close();
    }

    fn endpoint(&self, template: &str, placeholder: &str, value: &str) -> GatewayResult<Url> {
        let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
        let path = template.replace(placeholder, &encoded);
        Url::parse(&format!("{}{}", self.base_url, path)).map_err(|e| {
            GatewayError::Configuration(format!("registry '{}': invalid endpoint {path}: {e}", self.name))
        })
    }

    /// One upstream request, mapped onto the gateway error taxonomy.
    async fn fetch(&self, url: &Url, subject: &str) -> GatewayResult<Value> {
        let start = Instant::now();
        let response = match self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                metrics::record_upstream_request(&self.name, "transport", start);
                tracing::debug!(registry = %self.name, url = %url, error = %err, "Upstream unreachable");
                return Err(err.into());
            }
        };

        let status = response.status();
        metrics::record_upstream_request(&self.name, outcome(status), start);
        if status.is_success() {
            return Ok(response.json::<Value>().await?);
        }

        let retry_after = parse_retry_after(response.headers());
        let message = truncate(response.text().await.unwrap_or_default());
        tracing::debug!(registry = %self.name, status = status.as_u16(), "Upstream returned error status");

        Err(match status {
            StatusCode::NOT_FOUND => GatewayError::NotFound(subject.to_string()),
            StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited { retry_after },
            s if s.is_server_error() => GatewayError::Upstream {
                status: s.as_u16(),
                message,
            },
            s => GatewayError::Client {
                status: s.as_u16(),
                message,
            },
        })
    }
}

fn non_empty<'a>(value: &'a str, what: &str) -> GatewayResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(GatewayError::InvalidRequest(format!("{what} must not be empty")))
    } else {
        Ok(value)
    }
}

fn outcome(status: StatusCode) -> &'static str {
    match status {
        s if s.is_success() => "success",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::TOO_MANY_REQUESTS => "rate_limited",
        s if s.is_server_error() => "server_error",
        _ => "client_error",
    }
}

/// Delay-seconds form only; an HTTP-date yields `None`.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(mut message: String) -> String {
    if message.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}
