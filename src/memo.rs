//! Insert-once shared maps backing the rewrite memo tables.

use std::{collections::HashMap, hash::Hash, sync::Mutex};

/// A concurrency-safe map where each key is written at most once. The only
/// write primitive is [`MemoMap::insert_if_absent`], which hands back
/// whichever value ended up stored, so racing writers can check that they
/// agreed. Entries are never removed.
#[derive(Debug)]
pub struct MemoMap<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> MemoMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    /// Stores `value` unless `key` is already present.
    ///
    /// # Returns
    /// The stored value: `value` itself if this call won, the earlier
    /// winner's value otherwise.
    pub fn insert_if_absent(&self, key: K, value: V) -> V {
        self.inner.lock().unwrap().entry(key).or_insert(value).clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V: Clone> Default for MemoMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_insert_wins() {
        let map = MemoMap::new();
        assert_eq!(map.get(&1), None);
        assert_eq!(map.insert_if_absent(1, "a"), "a");
        assert_eq!(map.insert_if_absent(1, "b"), "a");
        assert_eq!(map.get(&1), Some("a"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn concurrent_writers_agree() {
        let map = MemoMap::new();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for key in 0..100 {
                        // every writer computes the same value for a key, the
                        // winner must hand it back unchanged
                        assert_eq!(map.insert_if_absent(key, key * 2), key * 2);
                    }
                });
            }
        });
        assert_eq!(map.len(), 100);
    }
}
