// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Bounded LRU cache.
//!
//! Backs the scan-cursor continuation stores, the per-key write statistics,
//! and the SPOP counters. All of these are small (hundreds to a few
//! thousand entries) and advisory: losing an entry restarts an iteration or
//! delays a compaction hint, never breaks correctness. Recency is a
//! monotonic tick; eviction scans for the minimum, which is cheap at these
//! capacities.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

struct Inner<K, V> {
    map: HashMap<K, (V, u64)>,
    capacity: usize,
    tick: u64,
}

/// Internally-locked LRU map; single-operation calls are thread-safe.
pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                capacity,
                tick: 0,
            }),
        }
    }

    /// Returns the value for `key` and refreshes its recency.
    pub fn lookup(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.map.get_mut(key).map(|(v, t)| {
            *t = tick;
            v.clone()
        })
    }

    /// Inserts or replaces, evicting the least-recently-used entry when at
    /// capacity.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        if inner.capacity == 0 {
            return;
        }
        inner.tick += 1;
        let tick = inner.tick;
        if inner.map.len() >= inner.capacity && !inner.map.contains_key(&key) {
            if let Some(oldest) = inner
                .map
                .iter()
                .min_by_key(|(_, (_, t))| *t)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&oldest);
            }
        }
        inner.map.insert(key, (value, tick));
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().map.remove(key).map(|(v, _)| v)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        while inner.map.len() > capacity {
            if let Some(oldest) = inner
                .map
                .iter()
                .min_by_key(|(_, (_, t))| *t)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn clear(&self) {
        self.inner.lock().map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup() {
        let cache = LruCache::new(4);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.lookup(&"a"), Some(1));
        assert_eq!(cache.lookup(&"b"), Some(2));
        assert_eq!(cache.lookup(&"c"), None);
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" is now least recently used.
        cache.lookup(&"a");
        cache.insert("c", 3);

        assert_eq!(cache.lookup(&"a"), Some(1));
        assert_eq!(cache.lookup(&"b"), None);
        assert_eq!(cache.lookup(&"c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&"a"), Some(10));
        assert_eq!(cache.lookup(&"b"), Some(2));
    }

    #[test]
    fn test_remove() {
        let cache = LruCache::new(2);
        cache.insert("a", 1);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.lookup(&"a"), None);
        assert_eq!(cache.remove(&"a"), None);
    }

    #[test]
    fn test_shrink_capacity() {
        let cache = LruCache::new(4);
        for (i, k) in ["a", "b", "c", "d"].iter().enumerate() {
            cache.insert(*k, i);
        }
        cache.set_capacity(2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_accepts_nothing() {
        let cache = LruCache::new(0);
        cache.insert("a", 1);
        assert!(cache.is_empty());
    }
}
