//! Query Cache Module
//!
//! Process-wide cache for data-layer query results, keyed by a stable
//! 64-hex-character fingerprint of `(domain, resource, query, offset, limit)`.
//!
//! ## Design
//!
//! Uses LRU (Least Recently Used) eviction with configurable entry and byte
//! limits. Entries carry a TTL; expired entries answer `Miss` and count as
//! evictions.

use crate::config::CacheConfig;
use crate::value::Record;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Cache statistics snapshot
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
    pub size_bytes: usize,
    pub size_mb: f64,
    pub hit_rate_percent: f64,
}

struct Entry {
    value: Arc<Vec<Record>>,
    size_bytes: usize,
    inserted_at: Instant,
    last_access: Instant,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    size_bytes: usize,
    counters: Counters,
}

/// Process-wide LRU result cache.
///
/// All operations take the inner lock briefly; nothing blocks while holding
/// it. Writes are visible to subsequent `get` calls immediately.
pub struct QueryCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: usize,
    ttl: Duration,
}

static GLOBAL_CACHE: OnceLock<QueryCache> = OnceLock::new();

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        QueryCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                size_bytes: 0,
                counters: Counters::default(),
            }),
            max_entries: config.max_entries.max(1),
            max_bytes: config.max_bytes,
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// The process-wide cache instance, created on first use with default
    /// configuration.
    pub fn global() -> &'static QueryCache {
        GLOBAL_CACHE.get_or_init(|| QueryCache::new(&CacheConfig::default()))
    }

    /// Deterministic cache key: SHA-256 over the identifying parts of a
    /// query, rendered as 64 lowercase hex characters.
    pub fn generate_key(
        domain: &str,
        resource: &str,
        query_fingerprint: &str,
        offset: usize,
        limit: usize,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(domain.as_bytes());
        hasher.update([0]);
        hasher.update(resource.as_bytes());
        hasher.update([0]);
        hasher.update(query_fingerprint.as_bytes());
        hasher.update([0]);
        hasher.update(offset.to_le_bytes());
        hasher.update(limit.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Insert a page of records. Evicts least-recently-used entries until the
    /// entry and byte limits hold.
    pub fn put(&self, key: &str, value: Vec<Record>) {
        let size_bytes: usize = value.iter().map(Record::estimated_size).sum();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.remove(key) {
            inner.size_bytes -= old.size_bytes;
        }
        inner.size_bytes += size_bytes;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Arc::new(value),
                size_bytes,
                inserted_at: now,
                last_access: now,
            },
        );

        self.evict_over_limit(&mut inner);
    }

    /// Look up a key. A hit refreshes the entry's LRU position; an expired
    /// entry is dropped, counted as an eviction, and answered as a miss.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<Record>>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let live = match inner.entries.get(key) {
            None => {
                inner.counters.misses += 1;
                return None;
            }
            Some(entry) => entry.inserted_at.elapsed() <= self.ttl,
        };

        if !live {
            if let Some(entry) = inner.entries.remove(key) {
                inner.size_bytes -= entry.size_bytes;
            }
            inner.counters.evictions += 1;
            inner.counters.misses += 1;
            return None;
        }

        inner.counters.hits += 1;
        inner.entries.get_mut(key).map(|entry| {
            entry.last_access = Instant::now();
            Arc::clone(&entry.value)
        })
    }

    /// Drop all entries and reset statistics.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.size_bytes = 0;
        inner.counters = Counters::default();
    }

    /// Sweep expired entries eagerly. Returns the number removed; each one
    /// counts as an eviction.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = inner.entries.remove(key) {
                inner.size_bytes -= entry.size_bytes;
                inner.counters.evictions += 1;
            }
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.counters.hits + inner.counters.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.counters.hits as f64 / lookups as f64 * 100.0
        };
        CacheStats {
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            evictions: inner.counters.evictions,
            entry_count: inner.entries.len(),
            size_bytes: inner.size_bytes,
            size_mb: inner.size_bytes as f64 / (1024.0 * 1024.0),
            hit_rate_percent: hit_rate,
        }
    }

    /// Strict LRU eviction: remove least-recently-accessed entries while
    /// either limit is exceeded.
    fn evict_over_limit(&self, inner: &mut Inner) {
        while inner.entries.len() > self.max_entries
            || (self.max_bytes > 0 && inner.size_bytes > self.max_bytes)
        {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    if let Some(entry) = inner.entries.remove(&key) {
                        inner.size_bytes -= entry.size_bytes;
                        inner.counters.evictions += 1;
                    }
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn record(id: i64) -> Record {
        Record::from_pairs([("id", Value::Int(id))])
    }

    fn cache_with(max_entries: usize, ttl_secs: u64) -> QueryCache {
        QueryCache::new(&CacheConfig {
            max_entries,
            max_bytes: 0,
            ttl_secs,
        })
    }

    #[test]
    fn test_put_then_get() {
        let cache = cache_with(10, 60);
        cache.put("k1", vec![record(1), record(2)]);

        let hit = cache.get("k1").expect("expected a hit");
        assert_eq!(hit.len(), 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_miss_is_counted() {
        let cache = cache_with(10, 60);
        assert!(cache.get("absent").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_clear_makes_everything_miss() {
        let cache = cache_with(10, 60);
        cache.put("k1", vec![record(1)]);
        cache.put("k2", vec![record(2)]);
        cache.clear();

        assert!(cache.get("k1").is_none());
        assert!(cache.get("k2").is_none());
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn test_lru_eviction_at_entry_cap() {
        let cache = cache_with(2, 60);
        cache.put("a", vec![record(1)]);
        cache.put("b", vec![record(2)]);

        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get("a").is_some());

        cache.put("c", vec![record(3)]);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_byte_cap_eviction() {
        let cache = QueryCache::new(&CacheConfig {
            max_entries: 100,
            max_bytes: 1,
            ttl_secs: 60,
        });
        cache.put("a", vec![record(1)]);
        cache.put("b", vec![record(2)]);
        // Every entry is over the byte budget, so only the newest remains
        // at most.
        assert!(cache.stats().entry_count <= 1);
    }

    #[test]
    fn test_ttl_expiry_counts_as_eviction() {
        let cache = cache_with(10, 0);
        cache.put("k", vec![record(1)]);
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get("k").is_none());
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = cache_with(10, 0);
        cache.put("a", vec![record(1)]);
        cache.put("b", vec![record(2)]);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.stats().entry_count, 0);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_generate_key_is_deterministic() {
        let a = QueryCache::generate_key("sales", "orders", "q1", 0, 100);
        let b = QueryCache::generate_key("sales", "orders", "q1", 0, 100);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_key_distinguishes_inputs() {
        let base = QueryCache::generate_key("sales", "orders", "q1", 0, 100);
        assert_ne!(base, QueryCache::generate_key("sales", "orders", "q1", 100, 100));
        assert_ne!(base, QueryCache::generate_key("sales", "orders", "q2", 0, 100));
        assert_ne!(base, QueryCache::generate_key("sales", "invoices", "q1", 0, 100));
        // Field boundaries must matter: ("ab","c") != ("a","bc").
        assert_ne!(
            QueryCache::generate_key("ab", "c", "q", 0, 0),
            QueryCache::generate_key("a", "bc", "q", 0, 0)
        );
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = cache_with(10, 60);
        cache.put("k", vec![record(1)]);
        let _ = cache.get("k");
        let _ = cache.get("k");
        let _ = cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate_percent - 66.666).abs() < 0.1);
    }
}
