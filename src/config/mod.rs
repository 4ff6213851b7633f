//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, all errors collected)
//!     → GatewayConfig (validated, immutable)
//!     → borrowed by Gateway::from_config to build one client per registry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CacheConfig, CircuitBreakerConfig, ConcurrencyConfig, GatewayConfig, LogFormat,
    ObservabilityConfig, RegistryConfig, RetryConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
