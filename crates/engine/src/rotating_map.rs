// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Bucketed map giving approximate TTL expiry without per-entry timers.
//!
//! A fixed-length ring of hash maps: `put` writes into the head bucket, each
//! `rotate` retires the oldest bucket wholesale. An entry inserted at tick
//! `i` therefore expires at or before tick `i + num_buckets` unless removed
//! or refreshed first. Bucket storage is reused across rotations; the steady
//! path allocates nothing per tick.

use ahash::RandomState;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;

type Bucket<K, V> = HashMap<K, V, RandomState>;

/// A rotating expiry map. The front bucket is the newest.
#[derive(Debug)]
pub struct RotatingMap<K, V> {
    buckets: VecDeque<Bucket<K, V>>,
}

impl<K: Hash + Eq, V> RotatingMap<K, V> {
    /// Creates a map with `num_buckets` buckets (at least 2, so an entry
    /// survives at least one full rotation period).
    #[must_use]
    pub fn new(num_buckets: usize) -> Self {
        let num_buckets = num_buckets.max(2);
        let mut buckets = VecDeque::with_capacity(num_buckets);
        for _ in 0..num_buckets {
            buckets.push_back(Bucket::default());
        }
        RotatingMap { buckets }
    }

    /// Inserts into the head bucket, removing any prior entry for the key
    /// from older buckets first. Re-putting an existing key is therefore a
    /// refresh: the entry's remaining lifetime restarts.
    ///
    /// Returns the previously stored value, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        let mut prior = None;
        for bucket in self.buckets.iter_mut().skip(1) {
            if let Some(old) = bucket.remove(&key) {
                prior = Some(old);
                break;
            }
        }
        match self.buckets[0].insert(key, value) {
            Some(old) => Some(old),
            None => prior,
        }
    }

    /// Returns the stored value for the key, searching newest to oldest.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.buckets.iter().find_map(|bucket| bucket.get(key))
    }

    /// Removes and returns the stored value for the key.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.buckets
            .iter_mut()
            .find_map(|bucket| bucket.remove(key))
    }

    /// Advances the ring one tick: drains the oldest bucket's surviving
    /// entries into `expired` and recycles its storage as the new head.
    pub fn rotate_into(&mut self, expired: &mut Vec<(K, V)>) {
        let mut oldest = match self.buckets.pop_back() {
            Some(bucket) => bucket,
            None => return,
        };
        expired.extend(oldest.drain());
        self.buckets.push_front(oldest);
    }

    /// Total number of live entries across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(HashMap::len).sum()
    }

    /// Whether the map holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    #![allow(missing_docs)]
    use super::*;

    fn expire(map: &mut RotatingMap<u64, &'static str>) -> Vec<(u64, &'static str)> {
        let mut out = Vec::new();
        map.rotate_into(&mut out);
        out
    }

    #[test]
    fn entry_expires_after_num_buckets_rotations() {
        let mut map = RotatingMap::new(2);
        let _ = map.put(1, "a");
        assert!(expire(&mut map).is_empty());
        assert_eq!(expire(&mut map), vec![(1, "a")]);
        assert!(map.is_empty());
    }

    #[test]
    fn remove_prevents_expiry() {
        let mut map = RotatingMap::new(2);
        let _ = map.put(1, "a");
        assert!(expire(&mut map).is_empty());
        assert_eq!(map.remove(&1), Some("a"));
        assert!(expire(&mut map).is_empty());
        assert!(expire(&mut map).is_empty());
    }

    #[test]
    fn put_refreshes_lifetime() {
        let mut map = RotatingMap::new(2);
        let _ = map.put(1, "a");
        assert!(expire(&mut map).is_empty());
        // The key is now in the oldest bucket; a re-put moves it to the head.
        assert_eq!(map.put(1, "a2"), Some("a"));
        assert_eq!(map.len(), 1);
        assert!(expire(&mut map).is_empty());
        assert_eq!(expire(&mut map), vec![(1, "a2")]);
    }

    #[test]
    fn get_searches_all_buckets() {
        let mut map = RotatingMap::new(3);
        let _ = map.put(1, "a");
        let mut scratch = Vec::new();
        map.rotate_into(&mut scratch);
        map.rotate_into(&mut scratch);
        assert!(scratch.is_empty());
        assert_eq!(map.get(&1), Some(&"a"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn expires_exactly_once() {
        let mut map = RotatingMap::new(2);
        let _ = map.put(1, "a");
        let mut total = Vec::new();
        for _ in 0..6 {
            map.rotate_into(&mut total);
        }
        assert_eq!(total, vec![(1, "a")]);
    }
}
