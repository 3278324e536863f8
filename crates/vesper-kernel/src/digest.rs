//! `DEBUG DIGEST` dataset hashing (spec §4.13).
//!
//! Produces a single 160-bit digest over an entire dataset such that two
//! datasets that are logically identical — same keys, same values — hash
//! identically regardless of encoding or hash-table iteration order. Used
//! to assert RDB/AOF round-trip fidelity (spec §8, properties 6 and 7).

use vesper_crypto::{Mixed, feedback_mix};

use crate::database::Database;
use crate::object::{HashData, Value, ValueData};

/// Digests one value's payload. Unordered aggregates (SET, ZSET members,
/// HASH fields) XOR their children's digests; LIST uses an order-sensitive
/// feedback mix, since list order is semantically significant.
fn digest_value(value: &Value) -> Mixed {
    match &value.data {
        ValueData::Str(s) => Mixed::of(&s.as_bytes()),
        ValueData::List(items) => {
            let mut running = Mixed::ZERO;
            for item in items {
                running = feedback_mix(running, &item.as_bytes());
            }
            running
        }
        ValueData::Set(members) => {
            let mut acc = Mixed::ZERO;
            for member in members {
                acc.mix(Mixed::of(member));
            }
            acc
        }
        ValueData::ZSet(zset) => {
            let mut acc = Mixed::ZERO;
            for entry in zset.skiplist().iter() {
                let mut member_digest = Mixed::of(&entry.member);
                member_digest.mix(Mixed::of(entry.score.to_bits().to_le_bytes().as_slice()));
                acc.mix(member_digest);
            }
            acc
        }
        ValueData::Hash(hash) => digest_hash(hash),
    }
}

fn digest_hash(hash: &HashData) -> Mixed {
    let mut acc = Mixed::ZERO;
    for (field, value) in hash.iter() {
        let mut field_digest = Mixed::of(field);
        field_digest.mix(Mixed::of(value));
        acc.mix(field_digest);
    }
    acc
}

/// Digests one `(key, value)` pair: XOR-mix of `SHA1(key)`, `SHA1(type
/// name)`, and the value's own digest (spec §4.13).
fn digest_key(key: &[u8], value: &Value) -> Mixed {
    let mut digest = Mixed::of(key);
    digest.mix(Mixed::of(value.value_type().name().as_bytes()));
    digest.mix(digest_value(value));
    digest
}

/// Digests every live key in `db`, returning the per-database contribution
/// (already mixed with the DB id, per spec §4.13: "for each DB, mix in the
/// DB id").
pub fn digest_database(db: &Database, now: vesper_types::UnixTime) -> Mixed {
    let mut db_digest = Mixed::of(db.id.to_string().as_bytes());
    let mut snapshot = Vec::new();
    for key in db.keys() {
        snapshot.push(key.clone());
    }
    // `db` is not mutable here; expired-but-not-yet-swept keys are digested
    // as absent by checking expiry without mutating the keyspace.
    for key in &snapshot {
        if let Some(expire_at) = db.expire_at(key) {
            if expire_at.is_past(now) {
                continue;
            }
        }
        if let Some(value) = db.peek(key) {
            db_digest.mix(digest_key(key, value));
        }
    }
    db_digest
}

/// Digests an entire multi-database dataset, one call per DB, XORed
/// together into the final global digest (spec §4.13).
pub fn digest_all<'a>(dbs: impl Iterator<Item = &'a Database>, now: vesper_types::UnixTime) -> Mixed {
    let mut global = Mixed::ZERO;
    for db in dbs {
        global.mix(digest_database(db, now));
    }
    global
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{StringData, Value};
    use vesper_types::{DbIndex, UnixTime};

    #[test]
    fn digest_is_independent_of_set_insertion_order() {
        let mut a = Database::new(DbIndex::new(0));
        a.set(b"s".to_vec(), {
            let mut set = std::collections::HashSet::new();
            set.insert(b"x".to_vec());
            set.insert(b"y".to_vec());
            Value::set(set)
        });

        let mut b = Database::new(DbIndex::new(0));
        b.set(b"s".to_vec(), {
            let mut set = std::collections::HashSet::new();
            set.insert(b"y".to_vec());
            set.insert(b"x".to_vec());
            Value::set(set)
        });

        assert_eq!(
            digest_database(&a, UnixTime::ZERO).to_hex(),
            digest_database(&b, UnixTime::ZERO).to_hex()
        );
    }

    #[test]
    fn digest_is_sensitive_to_list_order() {
        let mut a = Database::new(DbIndex::new(0));
        a.set(
            b"l".to_vec(),
            Value::list(
                [b"a".to_vec(), b"b".to_vec()]
                    .into_iter()
                    .map(StringData::Raw)
                    .collect(),
            ),
        );
        let mut b = Database::new(DbIndex::new(0));
        b.set(
            b"l".to_vec(),
            Value::list(
                [b"b".to_vec(), b"a".to_vec()]
                    .into_iter()
                    .map(StringData::Raw)
                    .collect(),
            ),
        );
        assert_ne!(
            digest_database(&a, UnixTime::ZERO).to_hex(),
            digest_database(&b, UnixTime::ZERO).to_hex()
        );
    }

    #[test]
    fn expired_keys_do_not_contribute_to_digest() {
        let mut a = Database::new(DbIndex::new(0));
        a.set(b"k".to_vec(), Value::string(StringData::from_bytes(b"v".to_vec())));
        a.set_expire(b"k", UnixTime::from_secs(10));
        let empty = Database::new(DbIndex::new(0));
        assert_eq!(
            digest_database(&a, UnixTime::from_secs(20)).to_hex(),
            digest_database(&empty, UnixTime::from_secs(20)).to_hex()
        );
    }
}
