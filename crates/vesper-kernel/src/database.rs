//! Per-database keyspace and its satellite index structures (spec §3).
//!
//! A [`Database`] never reads the clock itself — every method that needs
//! "now" takes it as a parameter — so the whole crate stays free of hidden
//! I/O and is trivial to drive deterministically from tests.

use std::collections::{HashMap, HashSet, VecDeque};

use vesper_types::{ClientId, DbIndex, Key, UnixTime};

use crate::dict::IncrementalDict;
use crate::object::Value;

/// Number of random candidates sampled per database per active-expire tick
/// (spec §4.3).
pub const ACTIVE_EXPIRE_SAMPLE_SIZE: usize = 10;
/// Active expiration keeps sampling while at least this fraction of the
/// last sample had actually expired (spec §4.3).
pub const ACTIVE_EXPIRE_THRESHOLD: f64 = 0.25;

/// One logical database (`SELECT N` addresses one of these).
///
/// `Clone` is used only to take an immutable snapshot for a background
/// save/rewrite (spec §9's forked-child design note, resolved as a
/// dedicated thread over a cloned snapshot rather than `fork()`; see
/// DESIGN.md). Live command handling always mutates the original.
#[derive(Clone)]
pub struct Database {
    pub id: DbIndex,
    keyspace: IncrementalDict<Key, Value>,
    expires: HashMap<Key, UnixTime>,
    blocking_keys: HashMap<Key, VecDeque<ClientId>>,
    io_keys: HashMap<Key, VecDeque<ClientId>>,
    watched_keys: HashMap<Key, HashSet<ClientId>>,
}

/// Outcome of a write-lookup: the found value plus the set of clients
/// watching that key, who must now be marked dirty-CAS by the caller.
pub struct WriteLookup<'a> {
    pub value: Option<&'a mut Value>,
    pub watchers_to_dirty: Vec<ClientId>,
}

impl Database {
    pub fn new(id: DbIndex) -> Self {
        Self {
            id,
            keyspace: IncrementalDict::new(),
            expires: HashMap::new(),
            blocking_keys: HashMap::new(),
            io_keys: HashMap::new(),
            watched_keys: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keyspace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyspace.is_empty()
    }

    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    /// Removes `key` if it has expired as of `now`, without touching
    /// WATCHers (spec §4.3's read-lookup policy). Returns whether it was
    /// removed.
    fn expire_if_due(&mut self, key: &[u8], now: UnixTime) -> bool {
        let Some(&expire_at) = self.expires.get(key) else {
            return false;
        };
        if !expire_at.is_past(now) {
            return false;
        }
        self.keyspace.remove(&key.to_vec());
        self.expires.remove(key);
        true
    }

    /// Read-lookup: expire-checks first, then returns the live value if
    /// any (spec §4.3).
    pub fn lookup_read(&mut self, key: &[u8], now: UnixTime) -> Option<&Value> {
        self.expire_if_due(key, now);
        self.keyspace.get(&key.to_vec())
    }

    /// Write-lookup: expire-checks, then returns the live value (mutable)
    /// plus every client that must be marked dirty-CAS because it watches
    /// this key (spec §4.3, §4.11). The caller applies the dirty-CAS flag;
    /// the kernel has no notion of "client" flags itself.
    pub fn lookup_write(&mut self, key: &[u8], now: UnixTime) -> WriteLookup<'_> {
        self.expire_if_due(key, now);
        let watchers_to_dirty = self
            .watched_keys
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        WriteLookup {
            value: self.keyspace.get_mut(&key.to_vec()),
            watchers_to_dirty,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.keyspace.contains_key(&key.to_vec())
    }

    /// Non-expiring raw lookup. Used by read paths that have already
    /// resolved expiry themselves (e.g. `DEBUG DIGEST`, which snapshots a
    /// consistent view without mutating the keyspace).
    pub fn peek(&self, key: &[u8]) -> Option<&Value> {
        self.keyspace.get(&key.to_vec())
    }

    /// Inserts or replaces `key`'s value, clearing any prior expiry (the
    /// caller re-applies an expiry afterward if the command requires one,
    /// e.g. SETEX).
    pub fn set(&mut self, key: Key, value: Value) -> Vec<ClientId> {
        let watchers = self
            .watched_keys
            .get(&key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        self.expires.remove(&key);
        self.keyspace.insert(key, value);
        watchers
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        self.expires.remove(key);
        self.keyspace.remove(&key.to_vec())
    }

    pub fn set_expire(&mut self, key: &[u8], when: UnixTime) {
        if self.keyspace.contains_key(&key.to_vec()) {
            self.expires.insert(key.to_vec(), when);
        }
    }

    /// A handful of volatile keys for `maxmemory` eviction sampling (spec
    /// §4.7): the caller picks the earliest-expiring of these and removes
    /// it rather than scanning the whole `expires` table.
    pub fn sample_volatile(&self, sample_size: usize) -> Vec<(Key, UnixTime)> {
        self.expires.iter().take(sample_size).map(|(key, when)| (key.clone(), *when)).collect()
    }

    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key).is_some()
    }

    pub fn expire_at(&self, key: &[u8]) -> Option<UnixTime> {
        self.expires.get(key).copied()
    }

    /// Samples up to [`ACTIVE_EXPIRE_SAMPLE_SIZE`] keys with an expiry and
    /// removes the ones that are due, repeating while the last round's hit
    /// rate was at least [`ACTIVE_EXPIRE_THRESHOLD`] (spec §4.3's adaptive
    /// active-expire cycle). Returns the total number of keys expired.
    pub fn active_expire_cycle(&mut self, now: UnixTime) -> usize {
        let mut total_expired = 0;
        loop {
            let sample: Vec<Key> = self
                .expires
                .keys()
                .take(ACTIVE_EXPIRE_SAMPLE_SIZE)
                .cloned()
                .collect();
            if sample.is_empty() {
                break;
            }
            let mut expired_this_round = 0;
            for key in &sample {
                if self.expire_if_due(key, now) {
                    expired_this_round += 1;
                }
            }
            total_expired += expired_this_round;
            let hit_rate = expired_this_round as f64 / sample.len() as f64;
            if hit_rate < ACTIVE_EXPIRE_THRESHOLD {
                break;
            }
        }
        total_expired
    }

    /// Advances the keyspace's incremental rehash by a bounded number of
    /// buckets (spec §4.3). Suspended entirely by the caller while a
    /// background child (BGSAVE/BGREWRITEAOF) is active, to preserve
    /// copy-on-write.
    pub fn rehash_step(&mut self, buckets: usize) {
        self.keyspace.rehash_step(buckets);
    }

    pub fn is_rehashing(&self) -> bool {
        self.keyspace.is_rehashing()
    }

    // -- WATCH ---------------------------------------------------------

    pub fn watch(&mut self, key: Key, client: ClientId) {
        self.watched_keys.entry(key).or_default().insert(client);
    }

    /// Every client currently watching `key`, without mutating anything
    /// (unlike [`Self::lookup_write`], which only surfaces this as a side
    /// effect of a write). Used by `vesper-server` to mark WATCHers
    /// dirty-CAS for commands whose key range it already knows statically
    /// from the command table, without re-deriving it through a write.
    pub fn watchers_of(&self, key: &[u8]) -> Vec<ClientId> {
        self.watched_keys.get(key).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    pub fn unwatch_all(&mut self, client: ClientId, keys: &[Key]) {
        for key in keys {
            if let Some(set) = self.watched_keys.get_mut(key) {
                set.remove(&client);
                if set.is_empty() {
                    self.watched_keys.remove(key);
                }
            }
        }
    }

    /// Every client watching any key currently in this database — used by
    /// FLUSHDB/FLUSHALL, which must dirty-CAS all of them (spec §4.11).
    pub fn all_watchers(&self) -> Vec<ClientId> {
        let mut out: Vec<ClientId> = self
            .watched_keys
            .values()
            .flat_map(|set| set.iter().copied())
            .collect();
        out.sort_by_key(ClientId::as_u64);
        out.dedup();
        out
    }

    /// Clears the whole database (FLUSHDB), returning the watchers that
    /// must be marked dirty-CAS.
    pub fn flush(&mut self) -> Vec<ClientId> {
        let watchers = self.all_watchers();
        self.keyspace.clear();
        self.expires.clear();
        self.blocking_keys.clear();
        self.io_keys.clear();
        self.watched_keys.clear();
        watchers
    }

    // -- Blocking keys (BLPOP/BRPOP) ------------------------------------

    pub fn add_blocking_waiter(&mut self, key: Key, client: ClientId) {
        self.blocking_keys.entry(key).or_default().push_back(client);
    }

    pub fn pop_blocking_waiter(&mut self, key: &[u8]) -> Option<ClientId> {
        let waiters = self.blocking_keys.get_mut(key)?;
        let next = waiters.pop_front();
        if waiters.is_empty() {
            self.blocking_keys.remove(key);
        }
        next
    }

    pub fn remove_blocking_waiter(&mut self, key: &[u8], client: ClientId) {
        if let Some(waiters) = self.blocking_keys.get_mut(key) {
            waiters.retain(|c| *c != client);
            if waiters.is_empty() {
                self.blocking_keys.remove(key);
            }
        }
    }

    // -- Swap-in waiters (VM) --------------------------------------------

    pub fn add_io_waiter(&mut self, key: Key, client: ClientId) {
        self.io_keys.entry(key).or_default().push_back(client);
    }

    pub fn take_io_waiters(&mut self, key: &[u8]) -> Vec<ClientId> {
        self.io_keys.remove(key).map(Into::into).unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keyspace.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StringData;

    fn db() -> Database {
        Database::new(DbIndex::new(0))
    }

    #[test]
    fn expired_keys_are_absent_from_keyspace() {
        let mut d = db();
        d.set(b"k".to_vec(), Value::string(StringData::from_bytes(b"v".to_vec())));
        d.set_expire(b"k", UnixTime::from_secs(100));
        assert!(d.lookup_read(b"k", UnixTime::from_secs(50)).is_some());
        assert!(d.lookup_read(b"k", UnixTime::from_secs(101)).is_none());
        assert!(!d.contains(b"k"));
    }

    #[test]
    fn expires_is_subset_of_keyspace_invariant() {
        let mut d = db();
        d.set(b"a".to_vec(), Value::string(StringData::from_bytes(b"1".to_vec())));
        d.set_expire(b"a", UnixTime::from_secs(1000));
        d.remove(b"a");
        assert_eq!(d.expires_len(), 0);
    }

    #[test]
    fn watchers_are_collected_on_write_lookup() {
        let mut d = db();
        d.set(b"k".to_vec(), Value::string(StringData::from_bytes(b"v".to_vec())));
        d.watch(b"k".to_vec(), ClientId::new(1));
        d.watch(b"k".to_vec(), ClientId::new(2));
        let lookup = d.lookup_write(b"k", UnixTime::from_secs(0));
        assert_eq!(lookup.watchers_to_dirty.len(), 2);
    }

    #[test]
    fn flush_returns_all_watchers_and_empties_db() {
        let mut d = db();
        d.set(b"k".to_vec(), Value::string(StringData::from_bytes(b"v".to_vec())));
        d.watch(b"k".to_vec(), ClientId::new(7));
        let watchers = d.flush();
        assert_eq!(watchers, vec![ClientId::new(7)]);
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn active_expire_cycle_sweeps_due_keys() {
        let mut d = db();
        for i in 0..20u32 {
            let key = format!("k{i}").into_bytes();
            d.set(key.clone(), Value::string(StringData::from_bytes(b"v".to_vec())));
            d.set_expire(&key, UnixTime::from_secs(10));
        }
        let expired = d.active_expire_cycle(UnixTime::from_secs(20));
        assert_eq!(expired, 20);
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn blocking_waiters_are_fifo() {
        let mut d = db();
        d.add_blocking_waiter(b"k".to_vec(), ClientId::new(1));
        d.add_blocking_waiter(b"k".to_vec(), ClientId::new(2));
        assert_eq!(d.pop_blocking_waiter(b"k"), Some(ClientId::new(1)));
        assert_eq!(d.pop_blocking_waiter(b"k"), Some(ClientId::new(2)));
        assert_eq!(d.pop_blocking_waiter(b"k"), None);
    }
}
