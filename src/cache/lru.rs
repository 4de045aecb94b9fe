//! Capacity-bounded entry index with recency order.
//!
//! Thin layer over [`lru::LruCache`] that splits eviction into a query
//! (`victim_for`) and the mutation (`insert`), so callers can delete a
//! victim's payload before the index forgets it.

use crate::fingerprint::Fingerprint;
use lru::LruCache;
use std::num::NonZeroUsize;

#[derive(Debug)]
pub struct LruIndex<V> {
    entries: LruCache<Fingerprint, V>,
}

impl<V> LruIndex<V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entries.contains(key)
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&mut self, key: &Fingerprint) -> Option<&V> {
        self.entries.get(key)
    }

    /// Looks up `key` without touching the order.
    pub fn peek(&self, key: &Fingerprint) -> Option<&V> {
        self.entries.peek(key)
    }

    /// The entry that inserting `key` would evict, if any.
    pub fn victim_for(&self, key: &Fingerprint) -> Option<&Fingerprint> {
        if self.entries.contains(key) || self.entries.len() < self.capacity() {
            return None;
        }
        self.oldest()
    }

    /// Inserts or overwrites `key` as most recently used.
    ///
    /// Returns the evicted least recently used entry when a new key pushes
    /// the index past capacity. At most one entry is ever evicted.
    pub fn insert(&mut self, key: Fingerprint, value: V) -> Option<(Fingerprint, V)> {
        if self.entries.contains(&key) {
            // `push` hands back the replaced pair for an existing key.
            self.entries.put(key, value);
            return None;
        }
        self.entries.push(key, value)
    }

    pub fn remove(&mut self, key: &Fingerprint) -> Option<V> {
        self.entries.pop(key)
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &Fingerprint> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Least recently used key.
    pub fn oldest(&self) -> Option<&Fingerprint> {
        self.entries.peek_lru().map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from(s)
    }

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn order(idx: &LruIndex<u32>) -> Vec<&str> {
        idx.keys().map(|k| k.as_str()).collect()
    }

    fn assert_consistent(idx: &LruIndex<u32>) {
        assert!(idx.len() <= idx.capacity());
        let keys: Vec<_> = idx.keys().collect();
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(keys.len(), idx.len());
        assert_eq!(unique.len(), keys.len());
        assert!(keys.iter().all(|k| idx.contains(k)));
    }

    #[test]
    fn bound_and_key_set_hold_after_every_insert() {
        let mut idx = LruIndex::new(cap(3));
        let keys = ["a", "b", "a", "c", "d", "e", "b", "b", "f", "a"];
        for (i, k) in keys.iter().enumerate() {
            idx.insert(fp(k), i as u32);
            assert_consistent(&idx);
        }
        assert_eq!(order(&idx), vec!["a", "f", "b"]);
    }

    #[test]
    fn overwrite_updates_value_and_promotes() {
        let mut idx = LruIndex::new(cap(3));
        idx.insert(fp("k1"), 1);
        idx.insert(fp("k2"), 2);
        assert!(idx.insert(fp("k1"), 10).is_none());
        assert_eq!(idx.len(), 2);
        assert_eq!(order(&idx), vec!["k1", "k2"]);
        assert_eq!(idx.peek(&fp("k1")), Some(&10));
    }

    #[test]
    fn inserting_past_capacity_evicts_least_recent() {
        let mut idx = LruIndex::new(cap(2));
        assert!(idx.insert(fp("k1"), 1).is_none());
        assert!(idx.insert(fp("k2"), 2).is_none());
        assert_eq!(idx.victim_for(&fp("k3")), Some(&fp("k1")));
        assert_eq!(idx.victim_for(&fp("k2")), None);

        let evicted = idx.insert(fp("k3"), 3);
        assert_eq!(evicted, Some((fp("k1"), 1)));
        assert!(!idx.contains(&fp("k1")));
        assert_eq!(order(&idx), vec!["k3", "k2"]);
        assert_consistent(&idx);
    }

    #[test]
    fn get_promotes() {
        let mut idx = LruIndex::new(cap(3));
        idx.insert(fp("k1"), 1);
        idx.insert(fp("k2"), 2);
        idx.insert(fp("k3"), 3);

        assert_eq!(idx.get(&fp("k2")), Some(&2));
        assert_eq!(order(&idx), vec!["k2", "k3", "k1"]);
        assert_eq!(idx.get(&fp("k1")), Some(&1));
        assert_eq!(order(&idx), vec!["k1", "k2", "k3"]);
        assert_eq!(idx.oldest(), Some(&fp("k3")));
        assert_eq!(idx.get(&fp("missing")), None);

        // k3 is now the eviction candidate.
        assert_eq!(idx.insert(fp("k4"), 4).map(|(k, _)| k), Some(fp("k3")));
    }

    #[test]
    fn peek_leaves_order_alone() {
        let mut idx = LruIndex::new(cap(2));
        idx.insert(fp("k1"), 1);
        idx.insert(fp("k2"), 2);
        assert_eq!(idx.peek(&fp("k1")), Some(&1));
        assert_eq!(order(&idx), vec!["k2", "k1"]);
    }

    #[test]
    fn remove_forgets_the_key() {
        let mut idx = LruIndex::new(cap(3));
        idx.insert(fp("k1"), 1);
        idx.insert(fp("k2"), 2);
        assert_eq!(idx.remove(&fp("k1")), Some(1));
        assert_eq!(idx.remove(&fp("k1")), None);
        assert_eq!(order(&idx), vec!["k2"]);
        assert_consistent(&idx);
        assert!(idx.remove(&fp("k2")).is_some());
        assert!(idx.is_empty());
    }
}
