//! A bounded map that evicts a uniformly random resident entry when full.
//!
//! Deliberately not an LRU: callers must not assume recently used entries
//! survive an eviction.

use std::collections::HashMap;
use std::hash::Hash;

use rand::Rng;

#[derive(Debug)]
pub(crate) struct RandomEvictCache<K, V> {
    capacity: usize,
    values: HashMap<K, V>,
    // resident keys, unordered, for O(1) random selection
    keys: Vec<K>,
}

impl<K, V> RandomEvictCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: HashMap::new(),
            keys: Vec::new(),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.values.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(resident) = self.values.get_mut(&key) {
            *resident = value;
            return;
        }
        if self.values.len() >= self.capacity {
            let victim = rand::thread_rng().gen_range(0..self.keys.len());
            let evicted = self.keys.swap_remove(victim);
            self.values.remove(&evicted);
        }
        self.keys.push(key.clone());
        self.values.insert(key, value);
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
        self.keys.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }
}
