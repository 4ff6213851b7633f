//! A single cached value with its expiry and last-access stamp.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Ceiling for TTLs that would overflow `Instant` arithmetic (~136 years).
const MAX_TTL: Duration = Duration::from_secs(u32::MAX as u64);

/// Cached value owned by a [`Cache`](crate::cache::Cache).
///
/// `accessed_at` is kept as nanoseconds since the owning cache's epoch so a
/// read can refresh it through a shared reference.
#[derive(Debug)]
pub struct CacheEntry<V> {
    key: String,
    value: V,
    expires_at: Instant,
    accessed_at: AtomicU64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(key: String, value: V, now: Instant, ttl: Duration, accessed_at: u64) -> Self {
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .unwrap_or(now + MAX_TTL);
        Self {
            key,
            value,
            expires_at,
            accessed_at: AtomicU64::new(accessed_at),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// An entry is live strictly before `expires_at`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub(crate) fn accessed_at(&self) -> u64 {
        self.accessed_at.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, at: u64) {
        self.accessed_at.fetch_max(at, Ordering::Relaxed);
    }
}
