//! Bounded LRU cache with optional TTL and hit/miss/eviction counters.
//!
//! Lookups are always cache-aside: callers check, compute on miss, then
//! store. No cache here is authoritative.

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

/// LRU with optional per-cache TTL. `get` promotes to most-recently-used;
/// `insert` past capacity evicts the least-recently-used entry.
pub struct TtlLru<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Option<Duration>,
}

struct Inner<K: Hash + Eq, V> {
    map: lru::LruCache<K, Entry<V>>,
    stats: CacheStats,
}

impl<K: Hash + Eq, V: Clone> TtlLru<K, V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            inner: Mutex::new(Inner {
                map: lru::LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
            ttl,
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        enum Outcome<V> {
            Hit(V),
            Expired,
            Absent,
        }

        let now = Instant::now();
        let inner = &mut *self.inner.lock();
        let outcome = match inner.map.get(key) {
            None => Outcome::Absent,
            Some(entry) => {
                if entry.expires_at.is_some_and(|deadline| now >= deadline) {
                    Outcome::Expired
                } else {
                    Outcome::Hit(entry.value.clone())
                }
            }
        };
        match outcome {
            Outcome::Hit(value) => {
                inner.stats.hits += 1;
                Some(value)
            }
            Outcome::Expired => {
                inner.map.pop(key);
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                None
            }
            Outcome::Absent => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        let inner = &mut *self.inner.lock();
        let at_capacity = inner.map.len() == usize::from(inner.map.cap());
        let replaced = inner.map.put(key, Entry { value, expires_at });
        if at_capacity && replaced.is_none() {
            inner.stats.evictions += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().map.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_promotes_and_insert_evicts_tail() {
        let cache: TtlLru<String, u32> = TtlLru::new(2, None);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);

        // Touch "a" so "b" becomes the LRU tail.
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c".into(), 3);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn ttl_expires_entries() {
        let cache: TtlLru<String, u32> = TtlLru::new(4, Some(Duration::from_millis(0)));
        cache.insert("k".into(), 7);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache: TtlLru<String, u32> = TtlLru::new(4, None);
        cache.insert("k".into(), 7);
        assert_eq!(cache.get("k"), Some(7));
        assert_eq!(cache.get("missing"), None);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn overwriting_existing_key_is_not_an_eviction() {
        let cache: TtlLru<String, u32> = TtlLru::new(2, None);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.insert("b".into(), 3);
        assert_eq!(cache.get("b"), Some(3));
        assert_eq!(cache.stats().evictions, 0);
    }
}
