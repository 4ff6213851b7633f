//! Named registry clients built from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::orchestrator::CallerHealth;
use crate::client::registry::RegistryClient;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};

/// One [`RegistryClient`] per configured registry, keyed by name.
pub struct Gateway {
    clients: BTreeMap<String, Arc<RegistryClient>>,
}

impl Gateway {
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let mut clients = BTreeMap::new();
        for registry in &config.registries {
            let client = RegistryClient::new(registry, config)?;
            if clients.insert(registry.name.clone(), Arc::new(client)).is_some() {
                return Err(GatewayError::Configuration(format!(
                    "registry '{}' is defined more than once",
                    registry.name
                )));
            }
        }
        tracing::info!(registries = clients.len(), "Gateway initialized");
        Ok(Self { clients })
    }

    pub fn client(&self, name: &str) -> GatewayResult<Arc<RegistryClient>> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::Configuration(format!("unknown registry '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn health(&self) -> Vec<CallerHealth> {
        self.clients.values().map(|client| client.health()).collect()
    }

    /// Close every client. Safe to call more than once.
    pub fn close(&self) {
        for client in self.clients.values() {
            client.close();
        }
    }
}
