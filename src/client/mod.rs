//! Registry client subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway::client(name)
//!     → RegistryClient::company(id) / search(query)
//!     → render URL from path template, derive cache key
//!     → ResilientCaller::call (breaker → permit → dedup → cache → retry)
//!     → reqwest GET, status mapped to GatewayError
//! ```
//!
//! # Design Decisions
//! - One breaker, cache, dedup table and semaphore per registry
//! - Cache keys are namespaced (`company:`, `search:`) so searches can be
//!   invalidated as a group
//! - Bodies are kept as `serde_json::Value`; registries disagree on schemas

pub mod gateway;
pub mod orchestrator;
pub mod registry;

pub use gateway::Gateway;
pub use orchestrator::{CallerHealth, ResilientCaller};
pub use registry::RegistryClient;
