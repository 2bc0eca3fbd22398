//! Bounded LRU + TTL cache for query results.
//!
//! Keyed on `(op, normalised args)`. Invalidation is time-based; hot-key
//! invalidation on entity-change watches is permitted but not required.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::cache::bounded_lru;

/// Cache key: op plus the canonical JSON of the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    op: &'static str,
    args: String,
}

impl QueryKey {
    /// Build a key from an op name and its serialisable arguments.
    #[must_use]
    pub fn new(op: &'static str, args: &impl serde::Serialize) -> Self {
        Self {
            op,
            args: serde_json::to_string(args).unwrap_or_default(),
        }
    }
}

/// The query result cache.
pub struct QueryCache {
    entries: Mutex<lru::LruCache<QueryKey, (Instant, serde_json::Value)>>,
    ttl: Duration,
}

impl QueryCache {
    /// Create a cache with the given capacity and TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(bounded_lru(capacity)),
            ttl,
        }
    }

    /// Fetch a live cached result.
    #[must_use]
    pub fn get(&self, key: &QueryKey) -> Option<serde_json::Value> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(key) {
            Some((at, value)) if at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Store a result.
    pub fn insert(&self, key: QueryKey, value: serde_json::Value) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.put(key, (Instant::now(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_ttl_expiry() {
        let cache = QueryCache::new(8, Duration::from_secs(60));
        let key = QueryKey::new("entity", &serde_json::json!({"id": "x"}));
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), serde_json::json!({"ok": true}));
        assert_eq!(cache.get(&key), Some(serde_json::json!({"ok": true})));

        let expired = QueryCache::new(8, Duration::from_millis(0));
        expired.insert(key.clone(), serde_json::json!(1));
        assert!(expired.get(&key).is_none());
    }

    #[test]
    fn test_distinct_args_distinct_entries() {
        let a = QueryKey::new("entity", &serde_json::json!({"id": "x"}));
        let b = QueryKey::new("entity", &serde_json::json!({"id": "y"}));
        assert_ne!(a, b);
    }
}
