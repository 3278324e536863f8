//! Incrementally-rehashing hash table used for the per-database keyspace
//! (spec §4.3, design note in spec §9).
//!
//! Modeled directly on the redesign note: two bucket tables plus a cursor.
//! While a rehash is in progress (`old` is non-empty), every read checks
//! both tables and every write goes to `new`; [`IncrementalDict::rehash_step`]
//! migrates a bounded number of buckets per call so a caller (the cron tick)
//! can spend roughly a fixed budget per invocation instead of rehashing the
//! whole table at once.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const INITIAL_BUCKETS: usize = 4;
const LOAD_FACTOR_NUMERATOR: usize = 1;
const LOAD_FACTOR_DENOMINATOR: usize = 1;

fn bucket_index(hash: u64, len: usize) -> usize {
    (hash as usize) & (len - 1)
}

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[derive(Clone)]
pub struct IncrementalDict<K, V> {
    old: Vec<Vec<(K, V)>>,
    new: Vec<Vec<(K, V)>>,
    rehash_cursor: usize,
    len: usize,
}

impl<K, V> Default for IncrementalDict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V> IncrementalDict<K, V> {
    pub fn new() -> Self {
        Self {
            old: Vec::new(),
            new: vec![Vec::new(); INITIAL_BUCKETS],
            rehash_cursor: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_rehashing(&self) -> bool {
        !self.old.is_empty()
    }

    fn start_rehash_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.len * LOAD_FACTOR_DENOMINATOR < self.new.len() * LOAD_FACTOR_NUMERATOR {
            return;
        }
        self.old = std::mem::replace(&mut self.new, vec![Vec::new(); self.old_len_next()]);
        self.rehash_cursor = 0;
    }

    fn old_len_next(&self) -> usize {
        (self.new.len() * 2).max(INITIAL_BUCKETS)
    }

    /// Migrates up to `buckets` old buckets into the new table. No-op if no
    /// rehash is in progress. Called from the cron tick (spec §4.3); also
    /// opportunistically advanced a little on every insert/remove.
    pub fn rehash_step(&mut self, buckets: usize) {
        if !self.is_rehashing() {
            return;
        }
        let mut migrated = 0;
        while migrated < buckets && self.rehash_cursor < self.old.len() {
            let bucket = std::mem::take(&mut self.old[self.rehash_cursor]);
            for (k, v) in bucket {
                let idx = bucket_index(hash_of(&k), self.new.len());
                self.new[idx].push((k, v));
            }
            self.rehash_cursor += 1;
            migrated += 1;
        }
        if self.rehash_cursor >= self.old.len() {
            self.old.clear();
            self.rehash_cursor = 0;
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.rehash_step(1);
        self.start_rehash_if_needed();
        let hash = hash_of(&key);

        if self.is_rehashing() {
            let old_idx = bucket_index(hash, self.old.len());
            if let Some(pos) = self.old[old_idx].iter().position(|(k, _)| *k == key) {
                self.old[old_idx].remove(pos);
            }
        }

        let new_idx = bucket_index(hash, self.new.len());
        if let Some(slot) = self.new[new_idx].iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.new[new_idx].push((key, value));
        self.len += 1;
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = hash_of(key);
        if self.is_rehashing() {
            let old_idx = bucket_index(hash, self.old.len());
            if let Some((_, v)) = self.old[old_idx].iter().find(|(k, _)| k == key) {
                return Some(v);
            }
        }
        let new_idx = bucket_index(hash, self.new.len());
        self.new[new_idx].iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = hash_of(key);
        if self.is_rehashing() {
            let old_idx = bucket_index(hash, self.old.len());
            if self.old[old_idx].iter().any(|(k, _)| k == key) {
                return self.old[old_idx]
                    .iter_mut()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v);
            }
        }
        let new_idx = bucket_index(hash, self.new.len());
        self.new[new_idx]
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.rehash_step(1);
        let hash = hash_of(key);
        if self.is_rehashing() {
            let old_idx = bucket_index(hash, self.old.len());
            if let Some(pos) = self.old[old_idx].iter().position(|(k, _)| k == key) {
                self.len -= 1;
                return Some(self.old[old_idx].remove(pos).1);
            }
        }
        let new_idx = bucket_index(hash, self.new.len());
        if let Some(pos) = self.new[new_idx].iter().position(|(k, _)| k == key) {
            self.len -= 1;
            return Some(self.new[new_idx].remove(pos).1);
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.old
            .iter()
            .flatten()
            .chain(self.new.iter().flatten())
            .map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn clear(&mut self) {
        self.old.clear();
        self.new = vec![Vec::new(); INITIAL_BUCKETS];
        self.rehash_cursor = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trip() {
        let mut d: IncrementalDict<Vec<u8>, i32> = IncrementalDict::new();
        d.insert(b"a".to_vec(), 1);
        d.insert(b"b".to_vec(), 2);
        assert_eq!(d.get(&b"a".to_vec()), Some(&1));
        assert_eq!(d.remove(&b"a".to_vec()), Some(1));
        assert_eq!(d.get(&b"a".to_vec()), None);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn grows_and_rehashes_under_many_inserts() {
        let mut d: IncrementalDict<u64, u64> = IncrementalDict::new();
        for i in 0..2000 {
            d.insert(i, i * 2);
        }
        // Drain any in-progress rehash.
        while d.is_rehashing() {
            d.rehash_step(8);
        }
        for i in 0..2000 {
            assert_eq!(d.get(&i), Some(&(i * 2)));
        }
        assert_eq!(d.len(), 2000);
    }

    #[test]
    fn reads_during_rehash_still_find_old_entries() {
        let mut d: IncrementalDict<u64, u64> = IncrementalDict::new();
        for i in 0..200 {
            d.insert(i, i);
        }
        assert!(d.is_rehashing() || d.len() < 4);
        for i in 0..200 {
            assert_eq!(d.get(&i), Some(&i));
        }
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut d: IncrementalDict<u64, u64> = IncrementalDict::new();
        d.insert(1, 1);
        d.clear();
        assert_eq!(d.len(), 0);
        assert_eq!(d.get(&1), None);
    }
}
