//! Resident-key access-time tracking and swap-out candidate selection (spec
//! §4.9: "sample up to 5 keys per DB, score each by `age × log(1 +
//! approx_size)`, choose the best").
//!
//! The value object model has no `atime` field (resident values carry no VM
//! bookkeeping at all — see `vesper-kernel::object`'s doc comment), so this
//! is the side table the server updates on every read/write to a resident
//! key.

use std::collections::HashMap;

use vesper_kernel::object::{Value, ValueData};
use vesper_types::{DbIndex, Key, UnixTime};

#[derive(Default)]
pub struct AccessTracker {
    last_access: HashMap<(DbIndex, Key), UnixTime>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&mut self, db: DbIndex, key: &[u8], now: UnixTime) {
        self.last_access.insert((db, key.to_vec()), now);
    }

    pub fn forget(&mut self, db: DbIndex, key: &[u8]) {
        self.last_access.remove(&(db, key.to_vec()));
    }

    fn age_secs(&self, db: DbIndex, key: &[u8], now: UnixTime) -> i64 {
        self.last_access
            .get(&(db, key.to_vec()))
            .map_or(0, |&atime| (now.as_secs() - atime.as_secs()).max(0))
    }

    /// Picks the single best swap-out candidate from up to 5 sampled
    /// resident keys, skipping any with `refcount > 1` (spec §4.9's
    /// correctness rule: a shared value must not be swapped).
    pub fn best_swap_candidate<'a>(
        &self,
        db: DbIndex,
        candidates: impl IntoIterator<Item = (&'a Key, &'a Value)>,
        now: UnixTime,
    ) -> Option<Key> {
        candidates
            .into_iter()
            .take(5)
            .filter(|(_, value)| value.refcount <= 1)
            .map(|(key, value)| {
                let age = self.age_secs(db, key, now) as f64;
                let size = approx_size(value) as f64;
                (key.clone(), age * (1.0 + size).ln())
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(key, _)| key)
    }
}

/// Rough byte-size estimate used only for swap-out scoring, not for
/// `used_memory` accounting (which `vesper-server` derives separately).
pub fn approx_size(value: &Value) -> usize {
    match &value.data {
        ValueData::Str(s) => s.len(),
        ValueData::List(items) => items.iter().map(vesper_kernel::object::StringData::len).sum(),
        ValueData::Set(members) => members.iter().map(Vec::len).sum(),
        ValueData::ZSet(zset) => zset.skiplist().iter().map(|entry| entry.member.len() + 8).sum(),
        ValueData::Hash(hash) => hash.iter().map(|(field, value)| field.len() + value.len()).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_kernel::object::StringData;

    #[test]
    fn prefers_the_oldest_largest_candidate() {
        let mut tracker = AccessTracker::new();
        let db = DbIndex::new(0);
        tracker.touch(db, b"old", UnixTime::from_secs(0));
        tracker.touch(db, b"new", UnixTime::from_secs(990));
        let old_key = b"old".to_vec();
        let new_key = b"new".to_vec();
        let old_value = Value::string(StringData::from_bytes(vec![b'x'; 100]));
        let new_value = Value::string(StringData::from_bytes(vec![b'x'; 100]));
        let candidates = vec![(&old_key, &old_value), (&new_key, &new_value)];
        let chosen = tracker.best_swap_candidate(db, candidates, UnixTime::from_secs(1000));
        assert_eq!(chosen, Some(old_key));
    }

    #[test]
    fn shared_values_are_never_selected() {
        let mut tracker = AccessTracker::new();
        let db = DbIndex::new(0);
        tracker.touch(db, b"shared", UnixTime::from_secs(0));
        let key = b"shared".to_vec();
        let mut value = Value::string(StringData::from_bytes(b"v".to_vec()));
        value.refcount = 2;
        let candidates = vec![(&key, &value)];
        assert_eq!(tracker.best_swap_candidate(db, candidates, UnixTime::from_secs(10)), None);
    }
}
