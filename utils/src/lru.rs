//! A bounded set that evicts the least-recently-used key once full.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
    num::NonZeroUsize,
};

/// A bounded set that evicts the least-recently-used key once full.
///
/// Both [LruSet::insert] and a successful [LruSet::contains] refresh the recency of a key.
pub struct LruSet<K: Eq + Hash + Clone> {
    capacity: usize,
    tick: u64,
    keys: HashMap<K, u64>,
    order: BTreeMap<u64, K>,
}

impl<K: Eq + Hash + Clone> LruSet<K> {
    /// Create a new set holding at most `capacity` keys.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: capacity.get(),
            tick: 0,
            keys: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    fn touch(&mut self, key: &K) -> bool {
        let Some(last) = self.keys.get_mut(key) else {
            return false;
        };
        self.order.remove(last);
        self.tick += 1;
        *last = self.tick;
        self.order.insert(self.tick, key.clone());
        true
    }

    /// Insert a key, evicting the least-recently-used key if the set is full.
    pub fn insert(&mut self, key: K) {
        if self.touch(&key) {
            return;
        }
        if self.keys.len() >= self.capacity {
            if let Some((_, evicted)) = self.order.pop_first() {
                self.keys.remove(&evicted);
            }
        }
        self.tick += 1;
        self.keys.insert(key.clone(), self.tick);
        self.order.insert(self.tick, key);
    }

    /// Returns whether the key is present (refreshing its recency if so).
    pub fn contains(&mut self, key: &K) -> bool {
        self.touch(key)
    }

    /// Removes a key, returning whether it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.keys.remove(key) {
            Some(last) => {
                self.order.remove(&last);
                true
            }
            None => false,
        }
    }

    /// Returns the number of keys in the set.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
