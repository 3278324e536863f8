//! # vesper-types: Core types for Vesper
//!
//! Shared small value types used across every crate in the workspace:
//! - Identifiers ([`DbIndex`], [`ClientId`])
//! - Temporal types ([`UnixTime`])
//! - The value type/encoding tags shared between the kernel and persistence
//!   layers ([`ValueType`], [`Encoding`])
//! - Wire-level key/value byte aliases ([`Key`])

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Index of one of the server's `databases` (SELECT 0..N).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DbIndex(u32);

impl DbIndex {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for DbIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DbIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Unique identifier assigned to a client connection when it is accepted.
///
/// Monotonically increasing for the lifetime of the process; never reused,
/// which lets replication/MONITOR bookkeeping reference a client safely
/// even after it disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Monotonically increasing source of [`ClientId`]s for one process.
#[derive(Debug)]
pub struct ClientIdAllocator {
    next: u64,
}

impl Default for ClientIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientIdAllocator {
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> ClientId {
        let id = ClientId(self.next);
        self.next += 1;
        id
    }
}

// ============================================================================
// Temporal types
// ============================================================================

/// Whole-second Unix timestamp, the unit every expiry and `last_save_time`
/// field in the system is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTime(i64);

impl UnixTime {
    pub const ZERO: Self = Self(0);

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(self) -> i64 {
        self.0
    }

    /// Current wall-clock time, truncated to whole seconds.
    ///
    /// # Panics
    /// Panics if the system clock is set before the Unix epoch.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs();
        Self(secs as i64)
    }

    pub fn saturating_add(self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// True if `self` is strictly in the past relative to `now`.
    pub fn is_past(self, now: Self) -> bool {
        now.0 > self.0
    }
}

impl Display for UnixTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Value type system tags (shared between vesper-kernel and vesper-persistence
// so the RDB encoder doesn't need to depend on the kernel's object model)
// ============================================================================

/// Logical value type, per spec §3's value object `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    List,
    Set,
    ZSet,
    Hash,
}

impl ValueType {
    /// The RDB key-type byte for this value type.
    pub const fn rdb_tag(self) -> u8 {
        match self {
            ValueType::String => 0,
            ValueType::List => 1,
            ValueType::Set => 2,
            ValueType::ZSet => 3,
            ValueType::Hash => 4,
        }
    }

    pub const fn from_rdb_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueType::String),
            1 => Some(ValueType::List),
            2 => Some(ValueType::Set),
            3 => Some(ValueType::ZSet),
            4 => Some(ValueType::Hash),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Set => "set",
            ValueType::ZSet => "zset",
            ValueType::Hash => "hash",
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Physical encoding of a value, per spec §3/§4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    Raw,
    Int,
    PackedMap,
    HashTable,
}

impl Encoding {
    pub const fn name(self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Int => "int",
            Encoding::PackedMap => "zipmap",
            Encoding::HashTable => "hashtable",
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Storage residency of a value when the VM subsystem is enabled (spec §3/§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Storage {
    #[default]
    Memory,
    Swapped,
    SwappingOut,
    LoadingIn,
}

/// Byte-string key/value alias used at API boundaries that don't need the
/// full `bytes::Bytes` reference-counted buffer.
pub type Key = Vec<u8>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_allocator_is_monotonic_and_never_repeats() {
        let mut alloc = ClientIdAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        let c = alloc.next();
        assert!(a.as_u64() < b.as_u64());
        assert!(b.as_u64() < c.as_u64());
    }

    #[test]
    fn value_type_rdb_tag_round_trips() {
        for ty in [
            ValueType::String,
            ValueType::List,
            ValueType::Set,
            ValueType::ZSet,
            ValueType::Hash,
        ] {
            assert_eq!(ValueType::from_rdb_tag(ty.rdb_tag()), Some(ty));
        }
    }

    #[test]
    fn unix_time_is_past_compares_strictly() {
        let expire = UnixTime::from_secs(100);
        assert!(!expire.is_past(UnixTime::from_secs(100)));
        assert!(expire.is_past(UnixTime::from_secs(101)));
    }
}
