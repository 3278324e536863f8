//! The swap-table: out-of-band storage for swapped keys' page coordinates
//! (spec §4.9). A key present here is, by construction, absent from its
//! `Database`'s keyspace — see `vesper-kernel::object`'s doc comment on why
//! VM coordinates don't live on `Value` itself, and DESIGN.md for the
//! grounding decision.

use std::collections::HashMap;

use vesper_types::{DbIndex, Key, UnixTime, ValueType};

/// Where a swapped key's I/O currently stands (spec §3's storage states,
/// minus `MEMORY` — a key only has a [`SwapEntry`] once it has left memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Swapped,
    SwappingOut,
    LoadingIn,
}

#[derive(Debug, Clone)]
pub struct SwapEntry {
    pub page: u64,
    pub used_pages: u64,
    pub atime: UnixTime,
    pub swapped_type: ValueType,
    pub residency: Residency,
}

#[derive(Default)]
pub struct SwapTable {
    entries: HashMap<(DbIndex, Key), SwapEntry>,
}

impl SwapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, db: DbIndex, key: &[u8]) -> Option<&SwapEntry> {
        self.entries.get(&(db, key.to_vec()))
    }

    pub fn is_swapped(&self, db: DbIndex, key: &[u8]) -> bool {
        self.entries.contains_key(&(db, key.to_vec()))
    }

    pub fn insert(&mut self, db: DbIndex, key: Key, entry: SwapEntry) {
        self.entries.insert((db, key), entry);
    }

    pub fn remove(&mut self, db: DbIndex, key: &[u8]) -> Option<SwapEntry> {
        self.entries.remove(&(db, key.to_vec()))
    }

    pub fn set_residency(&mut self, db: DbIndex, key: &[u8], residency: Residency) {
        if let Some(entry) = self.entries.get_mut(&(db, key.to_vec())) {
            entry.residency = residency;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> SwapEntry {
        SwapEntry {
            page: 3,
            used_pages: 1,
            atime: UnixTime::ZERO,
            swapped_type: ValueType::String,
            residency: Residency::Swapped,
        }
    }

    #[test]
    fn tracks_swapped_keys_independently_per_db() {
        let mut table = SwapTable::new();
        table.insert(DbIndex::new(0), b"k".to_vec(), entry());
        assert!(table.is_swapped(DbIndex::new(0), b"k"));
        assert!(!table.is_swapped(DbIndex::new(1), b"k"));
    }

    #[test]
    fn remove_returns_the_entry_and_clears_membership() {
        let mut table = SwapTable::new();
        table.insert(DbIndex::new(0), b"k".to_vec(), entry());
        let removed = table.remove(DbIndex::new(0), b"k").unwrap();
        assert_eq!(removed.page, 3);
        assert!(!table.is_swapped(DbIndex::new(0), b"k"));
    }
}
