//! Bounded response cache.
//!
//! Owned by the component that issues the request (album and playlist
//! lookups in the catalog client, cover bytes in the tagging engine) and
//! injected at construction so tests and callers control its size and
//! lifetime.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use tokio::sync::Mutex;

/// Least-recently-used map with a fixed capacity.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Look up a value, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let value = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(value)
    }

    /// Insert a value, evicting the least recently used entry when full.
    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Drop a single entry.
    pub fn invalidate(&mut self, key: &K) -> Option<V> {
        self.order.retain(|k| k != key);
        self.entries.remove(key)
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

/// Async-shareable cache keyed by normalized request parameters.
#[derive(Debug)]
pub struct ResponseCache<V> {
    inner: Mutex<LruCache<String, V>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Build the cache key for a request: endpoint plus sorted parameters.
    pub fn key(endpoint: &str, params: &[(&str, &str)]) -> String {
        let mut params = params.to_vec();
        params.sort();
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", endpoint, query)
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().await.get(&key.to_string())
    }

    pub async fn insert(&self, key: impl Into<String>, value: V) {
        self.inner.lock().await.insert(key.into(), value);
    }

    pub async fn invalidate(&self, key: &str) -> Option<V> {
        self.inner.lock().await.invalidate(&key.to_string())
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalidate() {
        let mut cache = LruCache::new(4);
        cache.insert("a", 1);
        assert_eq!(cache.invalidate(&"a"), Some(1));
        assert!(cache.is_empty());
        cache.insert("b", 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = ResponseCache::<u8>::key("albums/1", &[("include", "tracks"), ("l", "en-US")]);
        let b = ResponseCache::<u8>::key("albums/1", &[("l", "en-US"), ("include", "tracks")]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_response_cache_roundtrip() {
        let cache = ResponseCache::new(8);
        cache.insert("k", vec![1u8, 2, 3]).await;
        assert_eq!(cache.get("k").await, Some(vec![1, 2, 3]));
        cache.invalidate("k").await;
        assert_eq!(cache.get("k").await, None);
    }
}
