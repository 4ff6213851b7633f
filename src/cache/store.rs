//! Concurrent TTL cache with LRU size bounding.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::entry::CacheEntry;
use crate::config::CacheConfig;
use crate::observability::metrics;

/// Capacity used when a cache is configured with `max_entries = 0`.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Counters describing cache behaviour since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Key → value store with per-entry TTL and a soft entry-count bound.
///
/// Cloning is cheap and yields another handle onto the same storage. Reads
/// and writes go straight to a sharded map; only eviction sweeps serialise
/// among themselves. Inserting past `max_entries` schedules an eviction on
/// the runtime instead of evicting inline, so the bound may be exceeded
/// briefly. A periodic cleanup restores it.
#[derive(Clone)]
pub struct Cache<V> {
    inner: Arc<CacheInner<V>>,
}

struct CacheInner<V> {
    name: String,
    entries: DashMap<String, CacheEntry<V>>,
    count: AtomicI64,
    max_entries: usize,
    epoch: Instant,
    evict_lock: Mutex<()>,
    eviction_scheduled: AtomicBool,
    shutdown: CancellationToken,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache from configuration and start its cleanup loop.
    pub fn new(name: impl Into<String>, config: &CacheConfig) -> Self {
        Self::with_settings(
            name,
            config.max_entries,
            Duration::from_secs(config.cleanup_interval_secs.max(1)),
        )
    }

    /// Create a cache with an explicit capacity and cleanup interval.
    ///
    /// The cleanup loop is only started when called inside a tokio runtime.
    pub fn with_settings(name: impl Into<String>, max_entries: usize, cleanup_interval: Duration) -> Self {
        let max_entries = if max_entries == 0 { DEFAULT_MAX_ENTRIES } else { max_entries };
        let inner = Arc::new(CacheInner {
            name: name.into(),
            entries: DashMap::new(),
            count: AtomicI64::new(0),
            max_entries,
            epoch: Instant::now(),
            evict_lock: Mutex::new(()),
            eviction_scheduled: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        });
        spawn_cleanup(&inner, cleanup_interval);
        Self { inner }
    }

    /// Look up a live entry, refreshing its access stamp.
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key)
    }

    /// Insert or replace `key` with the given TTL.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let inner = &self.inner;
        let now = Instant::now();
        let key = key.into();
        let entry = CacheEntry::new(key.clone(), value, now, ttl, inner.offset(now));
        if inner.entries.insert(key, entry).is_some() {
            return;
        }

        let count = inner.count.fetch_add(1, Ordering::AcqRel) + 1;
        if count > inner.max_entries as i64 {
            self.schedule_eviction();
        }
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.delete(key)
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        self.inner.delete_prefix(prefix)
    }

    /// Current entry count. Approximate while writers are active.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.inner.max_entries
    }

    /// Evict the `n` least recently accessed entries.
    ///
    /// Returns the number actually removed, which is smaller than `n` when
    /// fewer entries exist.
    pub fn evict_lru(&self, n: usize) -> usize {
        self.inner.evict_lru(n)
    }

    /// Drop expired entries and enforce the size bound.
    ///
    /// Returns how many entries were removed. Runs periodically on its own;
    /// exposed for callers that need the bound to hold right now.
    pub fn cleanup(&self) -> usize {
        self.inner.cleanup()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        CacheStats {
            entries: inner.len(),
            hits: inner.hits.load(Ordering::Relaxed),
            misses: inner.misses.load(Ordering::Relaxed),
            evictions: inner.evictions.load(Ordering::Relaxed),
            expirations: inner.expirations.load(Ordering::Relaxed),
        }
    }

    /// Stop the background cleanup loop. Safe to call repeatedly.
    pub fn close(&self) {
        if !self.inner.shutdown.is_cancelled() {
            debug!(cache = %self.inner.name, "Closing cache");
        }
        self.inner.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn schedule_eviction(&self) {
        let inner = &self.inner;
        if inner
            .eviction_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(inner);
                handle.spawn(async move {
                    inner.evict_overage();
                });
            }
            // No runtime to hand the sweep to.
            Err(_) => inner.evict_overage(),
        }
    }
}

impl<V> CacheInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            None => false,
            Some(entry) if !entry.is_expired_at(now) => {
                entry.touch(self.offset(now));
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(&self.name, true);
                return Some(entry.value().value().clone());
            }
            Some(_) => true,
        };

        if expired
            && self
                .entries
                .remove_if(key, |_, entry| entry.is_expired_at(now))
                .is_some()
        {
            self.count.fetch_sub(1, Ordering::AcqRel);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_expirations(&self.name, 1);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(&self.name, false);
        None
    }

    fn delete(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    fn delete_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            let matches = key.starts_with(prefix);
            if matches {
                removed += 1;
            }
            !matches
        });
        self.count.fetch_sub(removed as i64, Ordering::AcqRel);
        removed
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::Acquire).max(0) as usize
    }

    fn evict_lru(&self, n: usize) -> usize {
        let _sweep = self.evict_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.evict_lru_locked(n)
    }

    fn evict_lru_locked(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }

        let mut by_access: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.accessed_at()))
            .collect();
        by_access.sort_unstable_by_key(|(_, accessed_at)| *accessed_at);

        let mut removed = 0usize;
        for (key, accessed_at) in by_access.into_iter().take(n) {
            // Skip entries that were read or rewritten after the snapshot.
            if self
                .entries
                .remove_if(&key, |_, entry| entry.accessed_at() == accessed_at)
                .is_some()
            {
                removed += 1;
            }
        }

        self.count.fetch_sub(removed as i64, Ordering::AcqRel);
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        metrics::record_cache_evictions(&self.name, removed);
        debug!(cache = %self.name, requested = n, removed, "LRU eviction sweep");
        removed
    }

    /// Eviction scheduled from `set`: trims the overage plus 10% headroom.
    fn evict_overage(&self) {
        let _sweep = self.evict_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.eviction_scheduled.store(false, Ordering::Release);

        let overage = self.len().saturating_sub(self.max_entries);
        if overage > 0 {
            self.evict_lru_locked(overage + self.max_entries / 10);
        }
        metrics::record_cache_size(&self.name, self.len());
    }

    fn cleanup(&self) -> usize {
        let _sweep = self.evict_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let mut expired = 0usize;
        self.entries.retain(|_, entry| {
            let live = !entry.is_expired_at(now);
            if !live {
                expired += 1;
            }
            live
        });
        // Relative update: inserts racing this sweep have their own fetch_add.
        self.count.fetch_sub(expired as i64, Ordering::AcqRel);
        self.expirations.fetch_add(expired as u64, Ordering::Relaxed);
        metrics::record_cache_expirations(&self.name, expired);

        let overage = self.len().saturating_sub(self.max_entries);
        let evicted = self.evict_lru_locked(overage);

        let size = self.len();
        metrics::record_cache_size(&self.name, size);
        if expired + evicted > 0 {
            debug!(cache = %self.name, expired, evicted, size, "Cache cleanup finished");
        }
        expired + evicted
    }

    fn offset(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_nanos() as u64
    }
}

impl<V> Drop for CacheInner<V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Run `cleanup` every `interval` until the cache is closed or dropped.
fn spawn_cleanup<V>(inner: &Arc<CacheInner<V>>, interval: Duration)
where
    V: Clone + Send + Sync + 'static,
{
    let Ok(handle) = Handle::try_current() else {
        debug!(cache = %inner.name, "No tokio runtime, periodic cache cleanup disabled");
        return;
    };

    let cache: Weak<CacheInner<V>> = Arc::downgrade(inner);
    let shutdown = inner.shutdown.clone();
    let name = inner.name.clone();
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(cache) = cache.upgrade() else { break };
                    cache.cleanup();
                }
                _ = shutdown.cancelled() => break,
            }
        }
        debug!(cache = %name, "Cache cleanup loop stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn cache(max_entries: usize) -> Cache<String> {
        Cache::with_settings("test", max_entries, HOUR)
    }

    async fn tick() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    #[tokio::test]
    async fn test_basic_set_and_get() {
        let cache = cache(100);
        cache.set("company:1", "acme".to_string(), HOUR);

        assert_eq!(cache.get("company:1"), Some("acme".to_string()));
        assert_eq!(cache.get("company:2"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let cache = cache(100);
        cache.set("k", "v".to_string(), Duration::from_millis(10));
        assert!(cache.get("k").is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_update_does_not_change_size() {
        let cache = cache(100);
        cache.set("k", "v1".to_string(), HOUR);
        cache.set("other", "x".to_string(), HOUR);
        assert_eq!(cache.len(), 2);

        cache.set("k", "v2".to_string(), Duration::from_millis(10));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("k"), Some("v2".to_string()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k").is_none(), "rewritten TTL should apply");
    }

    #[tokio::test]
    async fn test_delete_and_delete_prefix() {
        let cache = cache(100);
        cache.set("company:1", "a".to_string(), HOUR);
        cache.set("company:2", "b".to_string(), HOUR);
        cache.set("search:acme", "c".to_string(), HOUR);
        cache.set("search:bolt", "d".to_string(), HOUR);

        assert!(cache.delete("company:1"));
        assert!(!cache.delete("company:1"));
        assert_eq!(cache.len(), 3);

        assert_eq!(cache.delete_prefix("search:"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("company:2"), Some("b".to_string()));
        assert_eq!(cache.delete_prefix("missing:"), 0);
    }

    #[tokio::test]
    async fn test_lru_ordering() {
        let cache = cache(5);
        for key in ["a", "b", "c", "d", "e"] {
            cache.set(key, key.to_string(), HOUR);
            tick().await;
        }
        assert!(cache.get("a").is_some());
        tick().await;
        assert!(cache.get("b").is_some());
        tick().await;

        assert_eq!(cache.evict_lru(3), 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_some());
        for key in ["c", "d", "e"] {
            assert!(cache.get(key).is_none(), "{key} should have been evicted");
        }
    }

    #[tokio::test]
    async fn test_end_to_end_eviction_scenario() {
        let cache = cache(5);
        for key in ["a", "b", "c", "d", "e"] {
            cache.set(key, key.to_string(), HOUR);
            tick().await;
        }
        cache.get("a");
        tick().await;
        cache.get("b");
        tick().await;

        cache.set("f", "f".to_string(), HOUR);
        tick().await;
        cache.set("g", "g".to_string(), HOUR);

        // Let the scheduled sweep run, then converge.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.cleanup();

        assert!(cache.len() <= 5);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_none());
        assert!(cache.get("d").is_none());
        assert!(cache.get("g").is_some());
    }

    #[tokio::test]
    async fn test_evict_more_than_available() {
        let cache = cache(10);
        cache.set("a", "1".to_string(), HOUR);
        cache.set("b", "2".to_string(), HOUR);
        assert_eq!(cache.evict_lru(50), 2);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.evict_lru(1), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_size_bound_converges_after_burst() {
        let cache: Cache<u64> = Cache::with_settings("burst", 100, HOUR);

        let mut handles = Vec::new();
        for t in 0..4u64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..250u64 {
                    cache.set(format!("k{t}-{i}"), i, HOUR);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.cleanup();
        assert!(cache.len() <= 100, "size {} exceeds bound", cache.len());
        assert!(cache.stats().evictions > 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired() {
        let cache = cache(100);
        cache.set("short", "1".to_string(), Duration::from_millis(10));
        cache.set("long", "2".to_string(), HOUR);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some("2".to_string()));
    }

    #[test]
    fn test_count_exact_when_cleanup_races_inserts() {
        let cache: Cache<u64> = Cache::with_settings("race", 100_000, HOUR);
        cache.set("old", 0, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));

        let writers: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..2_000u64 {
                        cache.set(format!("k{t}-{i}"), i, HOUR);
                    }
                })
            })
            .collect();
        let mut removed = 0;
        for _ in 0..50 {
            removed += cache.cleanup();
        }
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(removed, 1);
        assert_eq!(cache.len(), cache.inner.entries.len());
        assert_eq!(cache.len(), 8_000);
    }

    #[tokio::test]
    async fn test_background_cleanup_runs() {
        let cache: Cache<String> = Cache::with_settings("bg", 100, Duration::from_millis(20));
        cache.set("k", "v".to_string(), Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
        cache.close();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let cache = cache(10);
        assert!(!cache.is_closed());
        cache.close();
        cache.close();
        assert!(cache.is_closed());

        // Still usable as a plain map after close.
        cache.set("k", "v".to_string(), HOUR);
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_zero_capacity_uses_default() {
        let cache = cache(0);
        assert_eq!(cache.max_entries(), DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn test_usable_without_runtime() {
        let cache: Cache<u32> = Cache::with_settings("sync", 3, HOUR);
        for i in 0..10 {
            cache.set(format!("k{i}"), i, HOUR);
        }
        assert!(cache.len() <= 3);
        cache.close();
    }
}
