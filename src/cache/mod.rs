//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! get(key):
//!     → live entry: refresh accessed_at, return value
//!     → expired entry: remove, count -= 1, miss
//!
//! set(key, value, ttl):
//!     → upsert entry, count += 1 for new keys
//!     → count > max_entries: schedule async LRU sweep (overage + 10%)
//!
//! cleanup loop (every cleanup_interval):
//!     → drop expired entries, count -= removed
//!     → evict LRU overage so count <= max_entries
//! ```
//!
//! # Design Decisions
//! - One cache per registry client, no process-wide instance
//! - Misses and expiry are `None`, never errors
//! - Eviction never blocks inserts; only sweeps exclude each other

pub mod entry;
pub mod store;

pub use entry::CacheEntry;
pub use store::{Cache, CacheStats, DEFAULT_MAX_ENTRIES};
