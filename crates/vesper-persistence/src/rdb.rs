//! RDB snapshot encoding and decoding (spec §4.6).
//!
//! Bit-exact layout: `REDIS0001` magic, then for each non-empty database a
//! `0xFE` + length-encoded db index, then a run of entries (optional
//! `0xFD` + 4-byte little-endian expire, key-type byte, key string, value
//! body), terminated by `0xFF`.
//!
//! [`encode_value_body`]/[`decode_value_body`] encode just one value's
//! body (no key, no type byte) and are reused by `vesper-vm`'s swap-file
//! codec (spec §4.9 explicitly reuses `rdbLoadObject` for swap-in), so a
//! value written to the swap file and one written to the RDB file use the
//! exact same bytes.

use vesper_kernel::Database;
use vesper_kernel::object::{HashData, StringData, Value, ValueData, ZSetData};
use vesper_types::{DbIndex, UnixTime, ValueType};

use crate::error::{PersistenceError, Result};
use crate::length::{decode_double, decode_length, decode_string, encode_double, encode_length, encode_string, DecodedLength};

pub const MAGIC: &[u8] = b"REDIS0001";
const OPCODE_EXPIRE: u8 = 0xFD;
const OPCODE_SELECTDB: u8 = 0xFE;
const OPCODE_EOF: u8 = 0xFF;

/// Encodes one value's body (spec §4.6's per-type "value bodies" table).
/// Does not write the leading type byte; callers that need it (the
/// whole-file RDB writer) write `value.value_type().rdb_tag()` themselves,
/// and swap-file callers (`vesper-vm`) store the type out of band.
pub fn encode_value_body(value: &Value, compress: bool, out: &mut Vec<u8>) {
    match &value.data {
        ValueData::Str(s) => encode_string(&s.as_bytes(), compress, out),
        ValueData::List(items) => {
            encode_length(items.len() as u64, out);
            for item in items {
                encode_string(&item.as_bytes(), compress, out);
            }
        }
        ValueData::Set(members) => {
            encode_length(members.len() as u64, out);
            for member in members {
                encode_string(member, compress, out);
            }
        }
        ValueData::ZSet(zset) => {
            encode_length(zset.len() as u64, out);
            for entry in zset.skiplist().iter() {
                encode_string(&entry.member, compress, out);
                encode_double(entry.score, out);
            }
        }
        ValueData::Hash(hash) => {
            encode_length(hash.len() as u64, out);
            for (field, value) in hash.iter() {
                encode_string(field, compress, out);
                encode_string(value, compress, out);
            }
        }
    }
}

/// Decodes one value's body given its logical type.
pub fn decode_value_body(value_type: ValueType, buf: &[u8], pos: &mut usize) -> Result<Value> {
    match value_type {
        ValueType::String => Ok(Value::string(StringData::from_bytes(decode_string(buf, pos)?))),
        ValueType::List => {
            let DecodedLength::Len(n) = decode_length(buf, pos)? else {
                return Err(PersistenceError::CorruptRdb("list length is a special byte".into()));
            };
            let mut items = std::collections::VecDeque::with_capacity(n as usize);
            for _ in 0..n {
                items.push_back(StringData::from_bytes(decode_string(buf, pos)?));
            }
            Ok(Value::list(items))
        }
        ValueType::Set => {
            let DecodedLength::Len(n) = decode_length(buf, pos)? else {
                return Err(PersistenceError::CorruptRdb("set length is a special byte".into()));
            };
            let mut members = std::collections::HashSet::with_capacity(n as usize);
            for _ in 0..n {
                members.insert(decode_string(buf, pos)?);
            }
            Ok(Value::set(members))
        }
        ValueType::ZSet => {
            let DecodedLength::Len(n) = decode_length(buf, pos)? else {
                return Err(PersistenceError::CorruptRdb("zset length is a special byte".into()));
            };
            let mut zset = ZSetData::new();
            for _ in 0..n {
                let member = decode_string(buf, pos)?;
                let score = decode_double(buf, pos)?;
                zset.insert(member, score);
            }
            Ok(Value::zset(zset))
        }
        ValueType::Hash => {
            let DecodedLength::Len(n) = decode_length(buf, pos)? else {
                return Err(PersistenceError::CorruptRdb("hash length is a special byte".into()));
            };
            let mut hash = HashData::default();
            for _ in 0..n {
                let field = decode_string(buf, pos)?;
                let value = decode_string(buf, pos)?;
                // Loading never promotes on its own (thresholds are a
                // runtime config the codec has no access to); the caller
                // re-inserts through `HashData::insert` with the
                // configured thresholds if it wants PACKEDMAP/HASHTABLE
                // fidelity restored rather than a blanket PACKEDMAP.
                hash.insert(field, value, usize::MAX, usize::MAX);
            }
            Ok(Value::hash(hash))
        }
    }
}

/// Writes a full RDB snapshot of every non-empty database to `out`.
pub fn encode_rdb(databases: &[Database], now: UnixTime, compress: bool, out: &mut Vec<u8>) {
    out.extend_from_slice(MAGIC);
    for db in databases {
        if db.is_empty() {
            continue;
        }
        out.push(OPCODE_SELECTDB);
        encode_length(u64::from(db.id.as_u32()), out);

        let keys: Vec<Vec<u8>> = db.keys().cloned().collect();
        for key in keys {
            let Some(value) = db.peek(&key) else { continue };
            if let Some(expire_at) = db.expire_at(&key) {
                if expire_at.is_past(now) {
                    continue;
                }
                out.push(OPCODE_EXPIRE);
                out.extend_from_slice(&(expire_at.as_secs() as u32).to_le_bytes());
            }
            out.push(value.value_type().rdb_tag());
            encode_string(&key, compress, out);
            encode_value_body(value, compress, out);
        }
    }
    out.push(OPCODE_EOF);
}

/// One decoded entry: key, value, and optional absolute expiry.
pub struct LoadedEntry {
    pub db: DbIndex,
    pub key: Vec<u8>,
    pub value: Value,
    pub expire_at: Option<UnixTime>,
}

/// Parses a full RDB byte stream into a flat sequence of entries. The
/// caller (`vesper-server`'s startup path) is responsible for routing each
/// entry into the right `Database` and re-deriving the hash encoding
/// (PACKEDMAP vs HASHTABLE) from the configured thresholds.
pub fn decode_rdb(buf: &[u8]) -> Result<Vec<LoadedEntry>> {
    if buf.len() < MAGIC.len() || &buf[..MAGIC.len()] != MAGIC {
        return Err(PersistenceError::UnsupportedVersion(
            String::from_utf8_lossy(&buf[..buf.len().min(9)]).into_owned(),
        ));
    }
    let mut pos = MAGIC.len();
    let mut entries = Vec::new();
    let mut current_db = DbIndex::new(0);
    let mut pending_expire: Option<UnixTime> = None;

    loop {
        let opcode = *buf
            .get(pos)
            .ok_or_else(|| PersistenceError::CorruptRdb("unexpected end of RDB (no EOF marker)".into()))?;
        match opcode {
            OPCODE_EOF => break,
            OPCODE_SELECTDB => {
                pos += 1;
                let DecodedLength::Len(n) = decode_length(buf, &mut pos)? else {
                    return Err(PersistenceError::CorruptRdb("SELECTDB index is a special byte".into()));
                };
                current_db = DbIndex::new(n as u32);
            }
            OPCODE_EXPIRE => {
                pos += 1;
                let bytes = buf
                    .get(pos..pos + 4)
                    .ok_or_else(|| PersistenceError::CorruptRdb("truncated expire timestamp".into()))?;
                pos += 4;
                let secs = u32::from_le_bytes(bytes.try_into().unwrap());
                pending_expire = Some(UnixTime::from_secs(i64::from(secs)));
            }
            type_tag => {
                pos += 1;
                let value_type = ValueType::from_rdb_tag(type_tag)
                    .ok_or_else(|| PersistenceError::CorruptRdb(format!("unknown type tag {type_tag}")))?;
                let key = decode_string(buf, &mut pos)?;
                let value = decode_value_body(value_type, buf, &mut pos)?;
                entries.push(LoadedEntry {
                    db: current_db,
                    key,
                    value,
                    expire_at: pending_expire.take(),
                });
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_kernel::object::StringData;

    fn sample_databases() -> Vec<Database> {
        let mut db0 = Database::new(DbIndex::new(0));
        db0.set(b"s".to_vec(), Value::string(StringData::from_bytes(b"v".to_vec())));
        db0.set(
            b"l".to_vec(),
            Value::list(
                [b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
                    .into_iter()
                    .map(StringData::from_bytes)
                    .collect(),
            ),
        );
        let mut zset = ZSetData::new();
        zset.insert(b"a".to_vec(), 1.5);
        db0.set(b"z".to_vec(), Value::zset(zset));
        db0.set_expire(b"s", UnixTime::from_secs(1_000_000));
        vec![db0]
    }

    #[test]
    fn round_trip_preserves_every_key_and_expiry() {
        let dbs = sample_databases();
        let mut out = Vec::new();
        encode_rdb(&dbs, UnixTime::ZERO, false, &mut out);
        let entries = decode_rdb(&out).unwrap();
        assert_eq!(entries.len(), 3);
        let s = entries.iter().find(|e| e.key == b"s").unwrap();
        assert_eq!(s.expire_at, Some(UnixTime::from_secs(1_000_000)));
        assert_eq!(s.value.as_string().unwrap().as_bytes(), b"v");
    }

    #[test]
    fn expired_keys_at_load_time_are_still_loaded_verbatim() {
        // RDB loading doesn't filter expiry itself (the caller re-applies
        // the expire-aware keyspace insert); this just checks the
        // timestamp round-trips exactly rather than being dropped.
        let dbs = sample_databases();
        let mut out = Vec::new();
        encode_rdb(&dbs, UnixTime::from_secs(2_000_000), false, &mut out);
        let entries = decode_rdb(&out).unwrap();
        // "s" had already expired relative to now=2_000_000 at save time
        // and was skipped by encode_rdb, so only l/z remain.
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = decode_rdb(b"NOTREDIS").unwrap_err();
        assert!(matches!(err, PersistenceError::UnsupportedVersion(_)));
    }

    #[test]
    fn compressed_strings_round_trip_through_full_file() {
        let mut db0 = Database::new(DbIndex::new(0));
        let long = vec![b'x'; 200];
        db0.set(b"big".to_vec(), Value::string(StringData::from_bytes(long.clone())));
        let mut out = Vec::new();
        encode_rdb(&[db0], UnixTime::ZERO, true, &mut out);
        let entries = decode_rdb(&out).unwrap();
        assert_eq!(entries[0].value.as_string().unwrap().as_bytes(), long);
    }
}
