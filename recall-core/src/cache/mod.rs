//! Bounded in-memory caching.
//!
//! [`Cache`] memoizes expensive keyed computations (embeddings, ranked search
//! results) with two independent bounds and sliding expiry:
//!
//! - **Entry count** (`max_size`): inserting into a full cache evicts one entry first.
//! - **Memory budget** (`memory_limit`): each value is charged its serialized JSON
//!   length; entries are evicted until the new value fits or the cache is empty.
//! - **TTL**: an entry is valid while `now - timestamp <= ttl`. Every successful
//!   `get` refreshes `timestamp`, so reads extend freshness.
//!
//! Eviction picks the entry with the lowest access count, breaking ties by the
//! oldest timestamp. Expired entries are purged lazily on `get` and in bulk by
//! [`Cache::cleanup`], which a [`CacheSweeper`] runs on a fixed interval.
//!
//! Cache operations never fail. A value that cannot be serialized is charged
//! zero bytes.

mod pools;
mod sweeper;

pub use pools::CachePools;
pub use sweeper::{CacheSweeper, Sweep};

use crate::config::CacheLimits;
use crate::time::{SystemTimeSource, TimeSource};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const DEFAULT_MAX_SIZE: usize = 1000;
pub const DEFAULT_MEMORY_LIMIT: usize = 50 * 1024 * 1024;
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Fraction of `max_size` a sweep trims the cache down to.
const SWEEP_LOW_WATERMARK: f64 = 0.8;

/// A cached value with its freshness and access bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Last write or successful read
    pub timestamp: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    size: usize,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.timestamp) > self.ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub memory_usage: usize,
    pub memory_limit: usize,
    pub max_size: usize,
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    memory_usage: usize,
}

impl<T> CacheState<T> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.entries.remove(key)?;
        self.memory_usage = self.memory_usage.saturating_sub(entry.size);
        Some(entry)
    }

    /// Removes the least used entry. Linear scan; fine at the sizes this cache targets.
    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.access_count, entry.timestamp))
            .map(|(key, _)| key.clone())?;

        self.remove(&victim);
        Some(victim)
    }
}

/// A bounded, thread-safe key-value cache with sliding TTL expiry.
///
/// All operations take a single lock for their whole read-modify-write span,
/// so concurrent callers never observe a torn update. Concurrent writers to
/// the same key are last-write-wins.
///
/// # Example
///
/// ```
/// use recall_core::cache::Cache;
/// use std::time::Duration;
///
/// let cache: Cache<String> = Cache::new(100, 1024 * 1024);
/// cache.set("greeting", "hello".to_string(), Duration::from_secs(60));
/// assert_eq!(cache.get("greeting").as_deref(), Some("hello"));
/// ```
pub struct Cache<T> {
    name: String,
    max_size: usize,
    memory_limit: usize,
    default_ttl: Duration,
    clock: Arc<dyn TimeSource>,
    state: Mutex<CacheState<T>>,
}

impl<T> Cache<T>
where
    T: Clone + Serialize,
{
    pub fn new(max_size: usize, memory_limit: usize) -> Self {
        Self {
            name: "cache".to_string(),
            max_size,
            memory_limit,
            default_ttl: DEFAULT_TTL,
            clock: Arc::new(SystemTimeSource),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                memory_usage: 0,
            }),
        }
    }

    pub fn from_limits(limits: &CacheLimits) -> Self {
        Self::new(limits.max_entries, limits.memory_limit_bytes).with_default_ttl(limits.ttl())
    }

    /// Names the cache in log output.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Stores `data` under `key` for `ttl`.
    ///
    /// Makes room first: one eviction when the entry count is at `max_size`,
    /// then as many as needed for the new value to fit in `memory_limit`.
    /// Overwriting a key resets its access count to 1.
    pub fn set(&self, key: impl Into<String>, data: T, ttl: Duration) {
        let key = key.into();
        let size = estimate_size(&data);
        let now = self.clock.now();
        let mut state = self.state.lock();

        if state.entries.len() >= self.max_size {
            if let Some(evicted) = state.evict_lru() {
                trace!(cache = %self.name, key = %evicted, "Evicted entry at capacity");
            }
        }

        while state.memory_usage + size > self.memory_limit && !state.entries.is_empty() {
            if let Some(evicted) = state.evict_lru() {
                trace!(cache = %self.name, key = %evicted, "Evicted entry over memory limit");
            }
        }

        state.remove(&key);
        state.entries.insert(
            key,
            CacheEntry {
                data,
                timestamp: now,
                ttl,
                access_count: 1,
                size,
            },
        );
        state.memory_usage += size;
    }

    /// Stores `data` with the cache's default TTL.
    pub fn insert(&self, key: impl Into<String>, data: T) {
        self.set(key, data, self.default_ttl);
    }

    /// Returns the value for `key` if present and fresh.
    ///
    /// A hit bumps the access count and refreshes the timestamp. An expired
    /// entry is purged and reported as absent.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let expired = state.entries.get(key)?.is_expired(now);
        if expired {
            state.remove(key);
            trace!(cache = %self.name, key, "Entry expired");
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.timestamp = now;
        Some(entry.data.clone())
    }

    /// Returns the cached value or computes, stores and returns it.
    ///
    /// Errors from `init` are returned as-is and nothing is cached. The lock
    /// is not held while `init` runs, so two callers missing the same key may
    /// both compute it.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        init: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(hit) = self.get(key) {
            debug!(cache = %self.name, "Cache hit");
            return Ok(hit);
        }

        debug!(cache = %self.name, "Cache miss");
        let value = init().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Removes `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.memory_usage = 0;
    }

    /// Purges expired entries, then evicts until at most 80% of `max_size` remain.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            state.remove(&key);
            removed += 1;
        }

        let watermark = self.max_size as f64 * SWEEP_LOW_WATERMARK;
        while state.entries.len() as f64 > watermark {
            if state.evict_lru().is_none() {
                break;
            }
            removed += 1;
        }

        if removed > 0 {
            debug!(
                cache = %self.name,
                removed,
                size = state.entries.len(),
                "Cache cleanup"
            );
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated bytes held, as charged at insert time.
    pub fn memory_usage(&self) -> usize {
        self.state.lock().memory_usage
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            size: state.entries.len(),
            memory_usage: state.memory_usage,
            memory_limit: self.memory_limit,
            max_size: self.max_size,
        }
    }
}

impl<T> Default for Cache<T>
where
    T: Clone + Serialize,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_MEMORY_LIMIT)
    }
}

impl<T> std::fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("max_size", &self.max_size)
            .field("memory_limit", &self.memory_limit)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

/// Serialized JSON length of `data`, or 0 when it cannot be serialized.
fn estimate_size<T: Serialize>(data: &T) -> usize {
    serde_json::to_string(data).map(|json| json.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeTimeSource;
    use std::collections::HashMap;

    fn cache_with_clock<T: Clone + Serialize>(
        max_size: usize,
        memory_limit: usize,
    ) -> (Cache<T>, Arc<FakeTimeSource>) {
        let clock = Arc::new(FakeTimeSource::new());
        let cache = Cache::new(max_size, memory_limit).with_time_source(clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_get_missing_key() {
        let cache: Cache<String> = Cache::default();
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let (cache, clock) = cache_with_clock::<String>(10, 1024);
        cache.set("k", "v".to_string(), Duration::from_millis(100));

        clock.advance_millis(150);

        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_entry_valid_at_exact_ttl() {
        let (cache, clock) = cache_with_clock::<String>(10, 1024);
        cache.set("k", "v".to_string(), Duration::from_millis(100));

        clock.advance_millis(100);

        assert_eq!(cache.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_sliding_expiration() {
        let (cache, clock) = cache_with_clock::<String>(10, 1024);
        cache.set("k", "v".to_string(), Duration::from_millis(1000));

        clock.advance_millis(900);
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        clock.advance_millis(900);
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        clock.advance_millis(1001);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_lru_evicts_least_accessed() {
        let (cache, clock) = cache_with_clock::<u32>(3, 1024);
        cache.insert("one", 1);
        clock.advance_millis(1);
        cache.insert("two", 2);
        clock.advance_millis(1);
        cache.insert("three", 3);
        clock.advance_millis(1);

        assert_eq!(cache.get("one"), Some(1));
        assert_eq!(cache.get("two"), Some(2));

        cache.insert("four", 4);

        assert_eq!(cache.len(), 3);
        assert!(cache.get("three").is_none());
        assert_eq!(cache.get("one"), Some(1));
        assert_eq!(cache.get("two"), Some(2));
        assert_eq!(cache.get("four"), Some(4));
    }

    #[test]
    fn test_lru_ties_broken_by_oldest_timestamp() {
        let (cache, clock) = cache_with_clock::<u32>(2, 1024);
        cache.insert("older", 1);
        clock.advance_millis(10);
        cache.insert("newer", 2);
        clock.advance_millis(10);

        cache.insert("third", 3);

        assert!(cache.get("older").is_none());
        assert_eq!(cache.get("newer"), Some(2));
        assert_eq!(cache.get("third"), Some(3));
    }

    #[test]
    fn test_memory_limit_evicts_before_max_size() {
        let value = "x".repeat(60);
        let (cache, _clock) = cache_with_clock::<String>(100, 100);

        cache.insert("first", value.clone());
        assert_eq!(cache.memory_usage(), 62);

        cache.insert("second", value);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
        assert_eq!(cache.memory_usage(), 62);
    }

    #[test]
    fn test_value_larger_than_limit_empties_cache_and_is_stored() {
        let (cache, _clock) = cache_with_clock::<String>(10, 16);
        cache.insert("small", "a".to_string());
        cache.insert("huge", "b".repeat(64));

        assert_eq!(cache.len(), 1);
        assert!(cache.get("small").is_none());
        assert_eq!(cache.memory_usage(), 66);
    }

    #[test]
    fn test_overwrite_resets_access_count_and_memory() {
        let (cache, clock) = cache_with_clock::<String>(3, 1024);
        cache.insert("hot", "a".to_string());
        for _ in 0..5 {
            cache.get("hot");
        }
        clock.advance_millis(1);
        cache.insert("other", "b".to_string());
        cache.get("other");
        cache.get("other");
        clock.advance_millis(1);

        // A fresh write restarts the access history.
        cache.insert("hot", "longer value".to_string());
        assert_eq!(cache.memory_usage(), 3 + 14);

        clock.advance_millis(1);
        cache.insert("new", "c".to_string());
        clock.advance_millis(1);
        cache.insert("newest", "d".to_string());

        assert!(cache.get("hot").is_none());
        assert_eq!(cache.get("other").as_deref(), Some("b"));
        assert_eq!(cache.get("new").as_deref(), Some("c"));
    }

    #[test]
    fn test_delete_and_clear() {
        let cache: Cache<String> = Cache::new(10, 1024);
        cache.insert("a", "1".to_string());
        cache.insert("b", "2".to_string());

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.memory_usage(), 3);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_cleanup_purges_expired_entries() {
        let (cache, clock) = cache_with_clock::<u32>(10, 1024);
        cache.set("short", 1, Duration::from_millis(50));
        cache.set("long", 2, Duration::from_secs(60));

        clock.advance_millis(100);

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[test]
    fn test_cleanup_trims_to_low_watermark() {
        let (cache, clock) = cache_with_clock::<u32>(10, 1024);
        for i in 0..10 {
            cache.insert(format!("k{i}"), i);
            clock.advance_millis(1);
        }
        assert_eq!(cache.len(), 10);

        assert_eq!(cache.cleanup(), 2);
        assert_eq!(cache.len(), 8);
        // Oldest entries go first when access counts tie.
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.get("k2"), Some(2));
    }

    #[test]
    fn test_unserializable_value_charged_zero() {
        let mut value: HashMap<Vec<u8>, u8> = HashMap::new();
        value.insert(vec![1, 2], 3);

        let cache: Cache<HashMap<Vec<u8>, u8>> = Cache::new(10, 1);
        cache.insert("map", value.clone());

        assert_eq!(cache.memory_usage(), 0);
        assert_eq!(cache.get("map"), Some(value));
    }

    #[test]
    fn test_stats() {
        let cache: Cache<String> = Cache::new(5, 2048);
        cache.insert("a", "abc".to_string());

        assert_eq!(
            cache.stats(),
            CacheStats {
                size: 1,
                memory_usage: 5,
                memory_limit: 2048,
                max_size: 5,
            }
        );
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with_memoizes() {
        let cache: Cache<u32> = Cache::new(10, 1024);
        let mut calls = 0;

        let first: std::result::Result<u32, String> = cache
            .get_or_try_insert_with("answer", DEFAULT_TTL, || {
                calls += 1;
                async { Ok(42) }
            })
            .await;
        assert_eq!(first, Ok(42));

        let second: std::result::Result<u32, String> = cache
            .get_or_try_insert_with("answer", DEFAULT_TTL, || async { Ok(0) })
            .await;
        assert_eq!(second, Ok(42));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_get_or_try_insert_with_does_not_cache_errors() {
        let cache: Cache<u32> = Cache::new(10, 1024);

        let failed: std::result::Result<u32, &str> = cache
            .get_or_try_insert_with("k", DEFAULT_TTL, || async { Err("boom") })
            .await;
        assert_eq!(failed, Err("boom"));
        assert!(cache.is_empty());
    }
}
