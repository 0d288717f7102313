//! TTL + LRU cache.
//!
//! Per-key time-bounded reuse with a hard size cap. Reads return a defensive
//! clone so callers can never mutate a cached value in place. All operations
//! take one mutex; nothing does I/O under the lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    /// Monotonic use counter; the smallest value is the LRU entry.
    last_used: u64,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    tick: u64,
    hits: u64,
    misses: u64,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    max_size: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size: max_size.max(1),
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                tick: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let expired = match inner.map.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
        };

        if expired {
            inner.map.remove(key);
            inner.misses += 1;
            return None;
        }

        let entry = inner.map.get_mut(key).expect("checked above");
        entry.last_used = tick;
        let value = entry.value.clone();
        inner.hits += 1;
        Some(value)
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.map.contains_key(&key) && inner.map.len() >= self.max_size {
            // Evict the least recently used entry before inserting.
            if let Some(lru) = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&lru);
            }
        }

        inner.map.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len(),
            max_size: self.max_size,
            hit_rate: if total > 0 {
                inner.hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn hit_returns_equal_but_cloned_value() {
        let cache: TtlCache<String, Vec<i64>> = TtlCache::new(Duration::from_secs(60), 10);
        cache.insert("AAPL".to_string(), vec![1, 2, 3]);

        let mut got = cache.get(&"AAPL".to_string()).unwrap();
        assert_eq!(got, vec![1, 2, 3]);

        // Mutating the returned copy must not affect the cached value.
        got.push(99);
        assert_eq!(cache.get(&"AAPL".to_string()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn miss_then_hit_counts() {
        let cache: TtlCache<&str, i64> = TtlCache::new(Duration::from_secs(60), 10);
        assert!(cache.get(&"x").is_none());
        cache.insert("x", 7);
        assert_eq!(cache.get(&"x"), Some(7));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache: TtlCache<&str, i64> = TtlCache::new(Duration::from_millis(20), 10);
        cache.insert("x", 7);
        assert_eq!(cache.get(&"x"), Some(7));

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&"x").is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let cache: TtlCache<&str, i64> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes least recently used.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(1));
        assert!(cache.get(&"b").is_none());
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn overwrite_does_not_evict() {
        let cache: TtlCache<&str, i64> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn clear_resets_counters() {
        let cache: TtlCache<&str, i64> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        let _ = cache.get(&"a");
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }
}
