//! Bounded, single-threaded entity caches for the client monitor (§4.10
//! "three bounded LRU caches"). A sibling of
//! [`pimd_model::EntityCache`](../pimd_model/struct.EntityCache.html),
//! which is process-wide, unbounded and concurrent — the monitor's copy
//! is thread-affined (§5) and must evict, so it trades the `DashMap` for
//! a plain `HashMap` plus an explicit recency list.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A fixed-capacity cache that evicts the least-recently-touched entry
/// once a new key would exceed `capacity`. Recency is tracked as an
/// append-only `VecDeque` of keys with lazy removal of stale entries
/// (cheaper than a full intrusive LRU list for the small capacities the
/// monitor actually uses).
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    recency: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.entries.contains_key(key) {
            self.touch(key);
        }
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(key.clone(), value);
        self.touch(&key);
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.recency.retain(|k| k != key);
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: &K) {
        self.recency.retain(|k| k != key);
        self.recency.push_back(key.clone());
    }

    fn evict_one(&mut self) {
        while let Some(oldest) = self.recency.pop_front() {
            if self.entries.remove(&oldest).is_some() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_touched() {
        let mut cache: BoundedCache<i64, &str> = BoundedCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.get(&1);
        cache.insert(3, "c");
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[test]
    fn reinserting_an_existing_key_does_not_evict() {
        let mut cache: BoundedCache<i64, &str> = BoundedCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert(1, "a-updated");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some(&"a-updated"));
    }
}
