//! TTL- and size-bounded result cache with LRU eviction.
//!
//! Entries are visible only while `now < created_at + ttl`; expired entries
//! are logically absent and are removed lazily on access or eagerly via
//! [`CacheStore::purge_expired`]. Under capacity pressure the least recently
//! used live entry is evicted first.

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::types::CachedResult;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Derive the cache key for a tool call: `lowercase(tool) + "::" + normalized(query)`.
pub fn cache_key(tool_name: &str, query: &str) -> String {
    format!("{}::{}", tool_name.to_lowercase(), normalize_query(query))
}

/// Trim, collapse internal whitespace runs to one space, and lowercase.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Values that can report their approximate memory footprint.
pub trait ByteSize {
    fn byte_size(&self) -> usize;
}

impl ByteSize for String {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for serde_json::Value {
    fn byte_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

impl ByteSize for CachedResult {
    fn byte_size(&self) -> usize {
        self.payload.byte_size() + self.source_urls.iter().map(String::len).sum::<usize>()
    }
}

/// A stored value with its expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub size_bytes: usize,
}

impl<V> CacheEntry<V> {
    /// Whether the entry is still visible at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match (now - self.created_at).to_std() {
            Ok(age) => age < self.ttl,
            // Clock moved backwards past creation; still within TTL.
            Err(_) => !self.ttl.is_zero(),
        }
    }
}

/// Aggregate cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    /// Entries removed because of expiry or capacity pressure.
    pub eviction_count: u64,
    /// Of `eviction_count`, the entries removed because their TTL lapsed.
    pub expired_count: u64,
    /// Puts refused because the entry alone exceeds capacity.
    pub rejected_count: u64,
    pub bytes_used: usize,
    pub max_bytes: usize,
}

impl CacheStats {
    /// Compute the hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

struct CacheInner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    bytes_used: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    rejections: u64,
}

impl<V> CacheInner<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.pop(key)?;
        self.bytes_used -= entry.size_bytes;
        Some(entry)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.evictions += expired.len() as u64;
        self.expirations += expired.len() as u64;
        expired.len()
    }
}

/// Thread-safe TTL cache shared across sessions.
pub struct CacheStore<V> {
    inner: Mutex<CacheInner<V>>,
    max_bytes: usize,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

/// The cache type used for tool results.
pub type ResultCache = CacheStore<CachedResult>;

impl<V: ByteSize + Clone + Send> CacheStore<V> {
    /// Create a cache bounded by `max_bytes` total and `max_entries` entries.
    pub fn new(max_bytes: usize, max_entries: usize) -> Self {
        Self::with_clock(max_bytes, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(max_bytes: usize, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                bytes_used: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
                rejections: 0,
            }),
            max_bytes,
            max_entries: max_entries.max(1),
            clock,
        }
    }

    pub fn from_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(config.max_bytes, config.max_entries, clock)
    }

    /// Store `value` under `key`, replacing any existing entry.
    ///
    /// An entry larger than the whole cache is dropped and counted as a
    /// rejection; this never fails.
    pub async fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if let Err(e) = self.try_put(key, value, ttl).await {
            warn!(error = %e, "Cache put rejected");
        }
    }

    /// Like [`put`](Self::put) but reports an oversized entry.
    pub async fn try_put(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let key = key.into();
        let size_bytes = value.byte_size();
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        // A rejected value leaves any existing entry untouched.
        if size_bytes > self.max_bytes {
            inner.rejections += 1;
            return Err(CacheError::CapacityExceeded {
                key,
                size_bytes,
                max_bytes: self.max_bytes,
            });
        }

        inner.remove(&key);

        let over_capacity = |inner: &CacheInner<V>| {
            inner.bytes_used + size_bytes > self.max_bytes
                || inner.entries.len() + 1 > self.max_entries
        };

        if over_capacity(&*inner) {
            inner.purge_expired(now);
        }
        while over_capacity(&*inner) {
            match inner.entries.pop_lru() {
                Some((evicted_key, entry)) => {
                    inner.bytes_used -= entry.size_bytes;
                    inner.evictions += 1;
                    debug!(key = %evicted_key, size_bytes = entry.size_bytes, "Evicted LRU cache entry");
                }
                None => break,
            }
        }

        inner.bytes_used += size_bytes;
        inner.entries.put(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: now,
                ttl,
                size_bytes,
            },
        );
        Ok(())
    }

    /// Return the live value for `key`, removing it if it has expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let Some(live) = inner.entries.peek(key).map(|entry| entry.is_live(now)) else {
            inner.misses += 1;
            return None;
        };

        if !live {
            inner.remove(key);
            inner.evictions += 1;
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether `key` currently holds a live value. Does not touch recency or counters.
    pub async fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        inner
            .entries
            .peek(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    pub async fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        if inner.remove(key).is_some() {
            debug!(key = %key, "Invalidated cache entry");
        }
    }

    /// Remove every entry whose key starts with `prefix`. Returns the count.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            inner.remove(key);
        }
        keys.len()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.bytes_used = 0;
    }

    /// Eagerly remove every expired entry. Returns the count.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.inner.lock().await.purge_expired(now)
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entry_count: inner.entries.len(),
            hit_count: inner.hits,
            miss_count: inner.misses,
            eviction_count: inner.evictions,
            expired_count: inner.expirations,
            rejected_count: inner.rejections,
            bytes_used: inner.bytes_used,
            max_bytes: self.max_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn make_cache(max_bytes: usize, max_entries: usize) -> (CacheStore<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = CacheStore::with_clock(max_bytes, max_entries, clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_cache_key_normalization() {
        assert_eq!(
            cache_key("Web_Search", "  Rust   ASYNC\truntime \n"),
            "web_search::rust async runtime"
        );
        assert_eq!(normalize_query(""), "");
        assert_eq!(cache_key("web", "a b"), cache_key("WEB", " A  B "));
        // Only the query is normalized; the tool name is just lowercased.
        assert_eq!(cache_key(" Web ", "q"), " web ::q");
    }

    #[tokio::test]
    async fn test_put_get_until_ttl_elapses() {
        let (cache, clock) = make_cache(1024, 10);
        cache
            .put("k", "value".to_string(), Duration::from_secs(60))
            .await;

        assert_eq!(cache.get("k").await.as_deref(), Some("value"));
        clock.advance(chrono::Duration::seconds(59));
        assert_eq!(cache.get("k").await.as_deref(), Some("value"));
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(cache.get("k").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.expired_count, 1);
        assert_eq!(stats.eviction_count, 1);
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.bytes_used, 0);
    }

    #[tokio::test]
    async fn test_put_resets_ttl_clock() {
        let (cache, clock) = make_cache(1024, 10);
        cache.put("k", "v1".to_string(), Duration::from_secs(10)).await;
        clock.advance(chrono::Duration::seconds(8));
        cache.put("k", "v2".to_string(), Duration::from_secs(10)).await;
        clock.advance(chrono::Duration::seconds(8));
        assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
        assert_eq!(cache.stats().await.bytes_used, 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_never_visible() {
        let (cache, _clock) = make_cache(1024, 10);
        cache.put("k", "v".to_string(), Duration::ZERO).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_lru_eviction_under_byte_pressure() {
        let (cache, _clock) = make_cache(10, 100);
        let ttl = Duration::from_secs(60);
        cache.put("a", "aaaa".to_string(), ttl).await;
        cache.put("b", "bbbb".to_string(), ttl).await;
        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get("a").await.is_some());
        cache.put("c", "cccc".to_string(), ttl).await;

        assert!(cache.contains("a").await);
        assert!(!cache.contains("b").await);
        assert!(cache.contains("c").await);
        let stats = cache.stats().await;
        assert_eq!(stats.bytes_used, 8);
        assert_eq!(stats.eviction_count, 1);
    }

    #[tokio::test]
    async fn test_entry_count_limit() {
        let (cache, _clock) = make_cache(1024, 2);
        let ttl = Duration::from_secs(60);
        cache.put("a", "1".to_string(), ttl).await;
        cache.put("b", "2".to_string(), ttl).await;
        cache.put("c", "3".to_string(), ttl).await;
        assert!(!cache.contains("a").await);
        assert_eq!(cache.stats().await.entry_count, 2);
    }

    #[tokio::test]
    async fn test_expired_entries_evicted_before_live_ones() {
        let (cache, clock) = make_cache(8, 100);
        cache.put("old", "oooo".to_string(), Duration::from_secs(5)).await;
        cache.put("live", "llll".to_string(), Duration::from_secs(60)).await;
        // "live" is the most recent; make "old" expire without touching recency.
        clock.advance(chrono::Duration::seconds(10));
        cache.put("new", "nnnn".to_string(), Duration::from_secs(60)).await;

        assert!(cache.contains("live").await);
        assert!(cache.contains("new").await);
        assert_eq!(cache.stats().await.expired_count, 1);
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected_silently() {
        let (cache, _clock) = make_cache(4, 10);
        cache.put("small", "ok".to_string(), Duration::from_secs(60)).await;
        cache
            .put("huge", "far too large".to_string(), Duration::from_secs(60))
            .await;

        assert!(cache.get("huge").await.is_none());
        assert!(cache.contains("small").await);
        assert_eq!(cache.stats().await.rejected_count, 1);

        let err = cache
            .try_put("huge", "far too large".to_string(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn test_oversized_replacement_keeps_existing_entry() {
        let (cache, _clock) = make_cache(4, 10);
        cache.put("key", "old".to_string(), Duration::from_secs(60)).await;
        cache
            .put("key", "far too large".to_string(), Duration::from_secs(60))
            .await;

        assert_eq!(cache.get("key").await.as_deref(), Some("old"));
        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.rejected_count, 1);
        assert_eq!(stats.eviction_count, 0);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let (cache, _clock) = make_cache(1024, 10);
        let ttl = Duration::from_secs(60);
        cache.put("web::a", "1".to_string(), ttl).await;
        cache.put("web::b", "2".to_string(), ttl).await;
        cache.put("paper::a", "3".to_string(), ttl).await;

        cache.invalidate("web::a").await;
        assert!(!cache.contains("web::a").await);

        assert_eq!(cache.invalidate_prefix("web::").await, 1);
        assert_eq!(cache.stats().await.entry_count, 1);

        cache.clear().await;
        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.bytes_used, 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (cache, clock) = make_cache(1024, 10);
        cache.put("short", "s".to_string(), Duration::from_secs(1)).await;
        cache.put("long", "l".to_string(), Duration::from_secs(100)).await;
        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.stats().await.entry_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_last_writer_wins() {
        let cache = Arc::new(CacheStore::<String>::new(1024, 100));
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .put("shared", format!("value-{i:02}"), Duration::from_secs(60))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let value = cache.get("shared").await.unwrap();
        assert!(value.starts_with("value-"));
        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.bytes_used, value.len());
    }

    #[test]
    fn test_stats_hit_rate() {
        let stats = CacheStats {
            hit_count: 8,
            miss_count: 2,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
