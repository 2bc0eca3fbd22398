//! The two cache tiers in front of the KV store.
//!
//! L1 is a small bounded LRU keyed per entity; L2 is a larger TTL cache.
//! Both are read-through and written only by the data manager, so there is
//! a single writer per shard and no cross-cache invalidation protocol.

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// A TTL cache with a capacity bound. Expired entries are dropped on read
/// and swept opportunistically on insert.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, (Instant, V)>,
    ttl: Duration,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache with the given TTL and capacity.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Fetch a live entry.
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or refresh an entry.
    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.len() >= self.capacity {
            self.sweep();
        }
        // Still full after sweeping expired entries: drop an arbitrary one
        // rather than grow unbounded.
        if self.entries.len() >= self.capacity
            && let Some(victim) = self.entries.keys().next().cloned()
        {
            self.entries.remove(&victim);
        }
        self.entries.insert(key, (Instant::now(), value));
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Live entry count (expired entries may still be counted until swept).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (inserted, _)| inserted.elapsed() < ttl);
    }
}

/// Build an LRU cache with a non-zero capacity (clamped to at least 1).
#[must_use]
pub fn bounded_lru<K: Eq + Hash, V>(capacity: usize) -> lru::LruCache<K, V> {
    lru::LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_expiry() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_millis(0), 8);
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), None, "zero TTL expires immediately");
    }

    #[test]
    fn test_live_entry() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60), 8);
        cache.insert("k", 1);
        assert_eq!(cache.get(&"k"), Some(1));
    }

    #[test]
    fn test_capacity_bound() {
        let mut cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60), 4);
        for i in 0..32 {
            cache.insert(i, i);
        }
        assert!(cache.len() <= 5, "cache stays near its capacity bound");
    }

    #[test]
    fn test_lru_evicts_oldest() {
        let mut cache = bounded_lru::<u32, u32>(2);
        cache.put(1, 1);
        cache.put(2, 2);
        cache.put(3, 3);
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.get(&3), Some(&3));
    }
}
