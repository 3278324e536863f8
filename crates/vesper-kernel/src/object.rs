//! The value object model (spec §3, §4.2).
//!
//! A [`Value`] is a small sum type over the five logical types, each with
//! the encoding(s) spec §3 allows it. Unlike the source this is modeled
//! after, values here are plain owned Rust data rather than
//! manually-refcounted heap objects: Rust's ownership already gives every
//! key exclusive access to its value, so the "shared small-integer
//! singleton" optimization (spec §3's `refcount>1` clause) is expressed as
//! copy-on-write `i64` values rather than actual pointer sharing — see
//! DESIGN.md for the reasoning. `refcount` is retained on [`Value`] purely
//! for `DEBUG OBJECT` / VM-eligibility reporting parity with spec §3's field
//! list.

use std::collections::HashMap;
use std::collections::VecDeque;

use vesper_types::{Encoding, ValueType};

use crate::skiplist::Skiplist;

/// Smallest non-negative integer that is no longer eligible for the shared
/// singleton range (spec §4.2: "small non-negative values in `[0,10000)`").
pub const SHARED_INT_UPPER_BOUND: i64 = 10_000;

/// A STRING payload: either its raw bytes or, when the bytes are exactly
/// the canonical decimal form of an in-range integer, the integer itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringData {
    Raw(Vec<u8>),
    Int(i64),
}

impl StringData {
    /// Builds a STRING payload from bytes, choosing INT encoding when the
    /// bytes are the canonical decimal form of an `i64` (spec §4.2).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if let Some(n) = canonical_i64(&bytes) {
            StringData::Int(n)
        } else {
            StringData::Raw(bytes)
        }
    }

    pub fn from_i64(n: i64) -> Self {
        StringData::Int(n)
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            StringData::Raw(_) => Encoding::Raw,
            StringData::Int(_) => Encoding::Int,
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            StringData::Raw(b) => b.clone(),
            StringData::Int(n) => n.to_string().into_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StringData::Raw(b) => b.len(),
            StringData::Int(n) => n.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StringData::Int(n) => Some(*n),
            StringData::Raw(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StringData::Int(n) => Some(*n as f64),
            StringData::Raw(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
        }
    }

    /// Whether this value is currently an interned shared-singleton
    /// candidate (spec §4.2). Since this implementation doesn't actually
    /// pointer-share, this only reports eligibility, not identity.
    pub fn is_shared_singleton_range(&self) -> bool {
        matches!(self, StringData::Int(n) if (0..SHARED_INT_UPPER_BOUND).contains(n))
    }
}

/// Returns `Some(n)` iff `bytes` is exactly the canonical (no leading zero,
/// no leading `+`, `-0` excluded) decimal rendering of `n: i64`.
fn canonical_i64(bytes: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let n: i64 = s.parse().ok()?;
    if n.to_string() == s { Some(n) } else { None }
}

/// HASH payload: starts PACKEDMAP (order-preserving, byte-packed small
/// hash), promotes one-way to HASHTABLE once thresholds are exceeded (spec
/// §3/§4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum HashData {
    Packed(Vec<(Vec<u8>, Vec<u8>)>),
    Full(HashMap<Vec<u8>, Vec<u8>>),
}

impl Default for HashData {
    fn default() -> Self {
        HashData::Packed(Vec::new())
    }
}

impl HashData {
    pub fn encoding(&self) -> Encoding {
        match self {
            HashData::Packed(_) => Encoding::PackedMap,
            HashData::Full(_) => Encoding::HashTable,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HashData::Packed(entries) => entries.len(),
            HashData::Full(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, field: &[u8]) -> Option<&Vec<u8>> {
        match self {
            HashData::Packed(entries) => entries.iter().find(|(f, _)| f == field).map(|(_, v)| v),
            HashData::Full(map) => map.get(field),
        }
    }

    /// Inserts `field -> value`, returning the previous value if any.
    /// Promotes PACKEDMAP to HASHTABLE if the insert exceeds either
    /// threshold; promotion never reverts (spec §3).
    pub fn insert(
        &mut self,
        field: Vec<u8>,
        value: Vec<u8>,
        max_entries: usize,
        max_value_len: usize,
    ) -> Option<Vec<u8>> {
        if let HashData::Packed(entries) = self {
            if let Some(slot) = entries.iter_mut().find(|(f, _)| *f == field) {
                return Some(std::mem::replace(&mut slot.1, value));
            }
            let exceeds = entries.len() + 1 > max_entries
                || field.len() > max_value_len
                || value.len() > max_value_len
                || entries
                    .iter()
                    .any(|(f, v)| f.len() > max_value_len || v.len() > max_value_len);
            entries.push((field.clone(), value.clone()));
            if exceeds {
                self.promote();
            }
            return None;
        }
        match self {
            HashData::Full(map) => map.insert(field, value),
            HashData::Packed(_) => unreachable!(),
        }
    }

    fn promote(&mut self) {
        if let HashData::Packed(entries) = self {
            let map = entries.drain(..).collect();
            *self = HashData::Full(map);
        }
    }

    pub fn remove(&mut self, field: &[u8]) -> Option<Vec<u8>> {
        match self {
            HashData::Packed(entries) => {
                let pos = entries.iter().position(|(f, _)| f == field)?;
                Some(entries.remove(pos).1)
            }
            HashData::Full(map) => map.remove(field),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_> {
        match self {
            HashData::Packed(entries) => {
                Box::new(entries.iter().map(|(f, v)| (f.as_slice(), v.as_slice())))
            }
            HashData::Full(map) => Box::new(map.iter().map(|(f, v)| (f.as_slice(), v.as_slice()))),
        }
    }
}

/// ZSET payload: a member→score mapping kept consistent with an ordering
/// skiplist (spec §3/§4.4). The two MUST always agree on membership and
/// score; every mutator updates both.
pub struct ZSetData {
    scores: HashMap<Vec<u8>, f64>,
    skiplist: Skiplist,
}

impl std::fmt::Debug for ZSetData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZSetData").field("len", &self.len()).finish()
    }
}

impl Default for ZSetData {
    fn default() -> Self {
        Self::new()
    }
}

impl ZSetData {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            skiplist: Skiplist::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Inserts or updates `member`'s score. Returns the previous score.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) -> Option<f64> {
        let previous = self.scores.insert(member.clone(), score);
        if let Some(prev_score) = previous {
            self.skiplist.remove(prev_score, &member);
        }
        self.skiplist.insert(score, member);
        previous
    }

    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        let score = self.scores.remove(member)?;
        self.skiplist.remove(score, member);
        Some(score)
    }

    pub fn rank(&self, member: &[u8]) -> Option<u64> {
        let score = self.score(member)?;
        self.skiplist.rank(score, member)
    }

    pub fn skiplist(&self) -> &Skiplist {
        &self.skiplist
    }

    pub fn members(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.scores.keys()
    }
}

impl Clone for ZSetData {
    fn clone(&self) -> Self {
        let mut out = ZSetData::new();
        for entry in self.skiplist.iter() {
            out.insert(entry.member.clone(), entry.score);
        }
        out
    }
}

impl PartialEq for ZSetData {
    fn eq(&self, other: &Self) -> bool {
        self.scores == other.scores
    }
}

/// The payload carried by a [`Value`], tagged by logical type.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    Str(StringData),
    List(VecDeque<StringData>),
    Set(std::collections::HashSet<Vec<u8>>),
    ZSet(ZSetData),
    Hash(HashData),
}

/// A complete value object: payload plus the bookkeeping fields spec §3
/// lists (`refcount`, VM residency). VM fields live in `vesper-vm`'s
/// swap-table rather than on every in-memory `Value`, since a resident
/// value by definition has no swap coordinates; see DESIGN.md.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub data: ValueData,
    pub refcount: u32,
}

impl Value {
    pub fn string(data: StringData) -> Self {
        Self {
            data: ValueData::Str(data),
            refcount: 1,
        }
    }

    pub fn list(items: VecDeque<StringData>) -> Self {
        Self {
            data: ValueData::List(items),
            refcount: 1,
        }
    }

    pub fn set(items: std::collections::HashSet<Vec<u8>>) -> Self {
        Self {
            data: ValueData::Set(items),
            refcount: 1,
        }
    }

    pub fn zset(zset: ZSetData) -> Self {
        Self {
            data: ValueData::ZSet(zset),
            refcount: 1,
        }
    }

    pub fn hash(hash: HashData) -> Self {
        Self {
            data: ValueData::Hash(hash),
            refcount: 1,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match &self.data {
            ValueData::Str(_) => ValueType::String,
            ValueData::List(_) => ValueType::List,
            ValueData::Set(_) => ValueType::Set,
            ValueData::ZSet(_) => ValueType::ZSet,
            ValueData::Hash(_) => ValueType::Hash,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match &self.data {
            ValueData::Str(s) => s.encoding(),
            ValueData::List(_) | ValueData::Set(_) | ValueData::ZSet(_) => Encoding::Raw,
            ValueData::Hash(h) => h.encoding(),
        }
    }

    pub fn as_string(&self) -> Option<&StringData> {
        match &self.data {
            ValueData::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&VecDeque<StringData>> {
        match &self.data {
            ValueData::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut VecDeque<StringData>> {
        match &mut self.data {
            ValueData::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&std::collections::HashSet<Vec<u8>>> {
        match &self.data {
            ValueData::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set_mut(&mut self) -> Option<&mut std::collections::HashSet<Vec<u8>>> {
        match &mut self.data {
            ValueData::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_zset(&self) -> Option<&ZSetData> {
        match &self.data {
            ValueData::ZSet(z) => Some(z),
            _ => None,
        }
    }

    pub fn as_zset_mut(&mut self) -> Option<&mut ZSetData> {
        match &mut self.data {
            ValueData::ZSet(z) => Some(z),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashData> {
        match &self.data {
            ValueData::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_hash_mut(&mut self) -> Option<&mut HashData> {
        match &mut self.data {
            ValueData::Hash(h) => Some(h),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_int_encoding_boundary() {
        assert_eq!(StringData::from_bytes(b"123".to_vec()).encoding(), Encoding::Int);
        assert_eq!(StringData::from_bytes(b"-123".to_vec()).encoding(), Encoding::Int);
        // leading zero disqualifies canonical form
        assert_eq!(StringData::from_bytes(b"0123".to_vec()).encoding(), Encoding::Raw);
        // 20-digit value within i64 range
        assert_eq!(
            StringData::from_bytes(b"9223372036854775807".to_vec()).encoding(),
            Encoding::Int
        );
        // one more digit overflows i64, stays RAW
        assert_eq!(
            StringData::from_bytes(b"92233720368547758070".to_vec()).encoding(),
            Encoding::Raw
        );
    }

    #[test]
    fn hash_promotes_on_entry_count_threshold() {
        let mut hash = HashData::default();
        for i in 0..4 {
            hash.insert(format!("f{i}").into_bytes(), b"v".to_vec(), 4, 64);
        }
        assert_eq!(hash.encoding(), Encoding::PackedMap);
        hash.insert(b"f4".to_vec(), b"v".to_vec(), 4, 64);
        assert_eq!(hash.encoding(), Encoding::HashTable);
    }

    #[test]
    fn hash_promotion_does_not_revert_on_shrink() {
        let mut hash = HashData::default();
        for i in 0..5 {
            hash.insert(format!("f{i}").into_bytes(), b"v".to_vec(), 4, 64);
        }
        assert_eq!(hash.encoding(), Encoding::HashTable);
        for i in 0..5 {
            hash.remove(format!("f{i}").into_bytes().as_slice());
        }
        assert_eq!(hash.encoding(), Encoding::HashTable);
    }

    #[test]
    fn zset_skiplist_and_mapping_stay_consistent() {
        let mut z = ZSetData::new();
        z.insert(b"a".to_vec(), 1.0);
        z.insert(b"b".to_vec(), 2.0);
        z.insert(b"a".to_vec(), 5.0); // update
        assert_eq!(z.len(), 2);
        assert_eq!(z.score(b"a"), Some(5.0));
        assert_eq!(z.skiplist().len(), 2);
        assert_eq!(z.rank(b"b"), Some(0));
        assert_eq!(z.rank(b"a"), Some(1));
    }
}
