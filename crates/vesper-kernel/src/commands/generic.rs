//! Key-space-generic commands: DEL, EXISTS, TYPE, RENAME[NX], EXPIRE family,
//! TTL, PERSIST, KEYS, RANDOMKEY, FLUSHDB (spec §4.3).

use vesper_types::UnixTime;

use crate::command::{HandlerOutcome, Reply, ok, wrote};
use crate::database::Database;
use crate::error::KernelError;

use super::parse_i64;

pub fn del(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let mut removed = 0i64;
    for key in &argv[1..] {
        if db.lookup_write(key, now).value.is_some() {
            db.remove(key);
            removed += 1;
        }
    }
    if removed > 0 {
        Ok(crate::command::HandlerResult::wrote_n(
            Reply::Integer(removed),
            removed as u64,
        ))
    } else {
        ok(Reply::Integer(0))
    }
}

pub fn exists(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let mut count = 0i64;
    for key in &argv[1..] {
        if db.lookup_read(key, now).is_some() {
            count += 1;
        }
    }
    ok(Reply::Integer(count))
}

pub fn r#type(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    match db.lookup_read(&argv[1], now) {
        Some(value) => ok(Reply::Status(value.value_type().name().to_string())),
        None => ok(Reply::Status("none".to_string())),
    }
}

pub fn rename(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let (src, dst) = (&argv[1], &argv[2]);
    if db.lookup_write(src, now).value.is_none() {
        return Err(KernelError::NoSuchKey);
    }
    let value = db.remove(src).expect("checked above");
    db.set(dst.clone(), value);
    wrote(Reply::ok())
}

pub fn renamenx(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let (src, dst) = (&argv[1], &argv[2]);
    if db.lookup_write(src, now).value.is_none() {
        return Err(KernelError::NoSuchKey);
    }
    if db.lookup_read(dst, now).is_some() {
        return ok(Reply::Integer(0));
    }
    let value = db.remove(src).expect("checked above");
    db.set(dst.clone(), value);
    Ok(crate::command::HandlerResult::wrote(Reply::Integer(1)))
}

fn expire_generic(
    db: &mut Database,
    key: &[u8],
    when: UnixTime,
    now: UnixTime,
) -> HandlerOutcome {
    if db.lookup_write(key, now).value.is_none() {
        return ok(Reply::Integer(0));
    }
    db.set_expire(key, when);
    wrote(Reply::Integer(1))
}

pub fn expire(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let secs = parse_i64(&argv[2])?;
    expire_generic(db, &argv[1], now.saturating_add(secs), now)
}

pub fn expireat(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let at = parse_i64(&argv[2])?;
    expire_generic(db, &argv[1], UnixTime::from_secs(at), now)
}

pub fn ttl(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    if db.lookup_read(&argv[1], now).is_none() {
        return ok(Reply::Integer(-2));
    }
    match db.expire_at(&argv[1]) {
        Some(at) => ok(Reply::Integer((at.as_secs() - now.as_secs()).max(0))),
        None => ok(Reply::Integer(-1)),
    }
}

pub fn persist(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    if db.lookup_read(&argv[1], now).is_none() {
        return ok(Reply::Integer(0));
    }
    if db.persist(&argv[1]) {
        wrote(Reply::Integer(1))
    } else {
        ok(Reply::Integer(0))
    }
}

pub fn keys(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let pattern = &argv[1];
    let all_keys: Vec<Vec<u8>> = db.keys().cloned().collect();
    let mut out = Vec::new();
    for key in all_keys {
        if db.lookup_read(&key, now).is_none() {
            continue;
        }
        if crate::commands::sort::glob_match(pattern, &key) {
            out.push(Reply::bulk(key));
        }
    }
    ok(Reply::Multi(out))
}

pub fn flushdb(db: &mut Database) -> HandlerOutcome {
    db.flush();
    wrote(Reply::ok())
}

/// Draws one u64 of process entropy from a freshly seeded
/// [`std::collections::hash_map::RandomState`] (the same source `HashMap`
/// uses to resist DoS collisions), without pulling in a `rand` dependency.
fn random_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish()
}

pub fn randomkey(db: &mut Database, _argv: &[Vec<u8>], _now: UnixTime) -> HandlerOutcome {
    // Reservoir sampling (algorithm R) over the dict's bucket iterator so
    // repeated calls don't deterministically return the keyspace's first
    // entry.
    let mut chosen: Option<Vec<u8>> = None;
    let mut seen = 0u64;
    for key in db.keys() {
        seen += 1;
        if seen == 1 || random_u64() % seen == 0 {
            chosen = Some(key.clone());
        }
    }
    match chosen {
        Some(key) => ok(Reply::bulk(key)),
        None => ok(Reply::NilBulk),
    }
}

pub fn dbsize(db: &mut Database, _argv: &[Vec<u8>], _now: UnixTime) -> HandlerOutcome {
    ok(Reply::Integer(db.len() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{StringData, Value};
    use vesper_types::DbIndex;

    fn db() -> Database {
        Database::new(DbIndex::new(0))
    }

    #[test]
    fn del_counts_only_present_keys() {
        let mut d = db();
        d.set(b"a".to_vec(), Value::string(StringData::from_bytes(b"1".to_vec())));
        let result = del(&mut d, &[b"DEL".to_vec(), b"a".to_vec(), b"b".to_vec()], UnixTime::ZERO)
            .unwrap();
        assert_eq!(result.reply, Reply::Integer(1));
    }

    #[test]
    fn rename_moves_value_and_errors_on_missing_source() {
        let mut d = db();
        d.set(b"a".to_vec(), Value::string(StringData::from_bytes(b"1".to_vec())));
        rename(&mut d, &[b"RENAME".to_vec(), b"a".to_vec(), b"b".to_vec()], UnixTime::ZERO)
            .unwrap();
        assert!(d.lookup_read(b"b", UnixTime::ZERO).is_some());
        assert!(d.lookup_read(b"a", UnixTime::ZERO).is_none());
        assert!(matches!(
            rename(&mut d, &[b"RENAME".to_vec(), b"missing".to_vec(), b"x".to_vec()], UnixTime::ZERO),
            Err(KernelError::NoSuchKey)
        ));
    }

    #[test]
    fn expire_then_ttl_reports_remaining_seconds() {
        let mut d = db();
        d.set(b"k".to_vec(), Value::string(StringData::from_bytes(b"v".to_vec())));
        expire(&mut d, &[b"EXPIRE".to_vec(), b"k".to_vec(), b"10".to_vec()], UnixTime::from_secs(0))
            .unwrap();
        let result = ttl(&mut d, &[b"TTL".to_vec(), b"k".to_vec()], UnixTime::from_secs(3)).unwrap();
        assert_eq!(result.reply, Reply::Integer(7));
    }

    #[test]
    fn ttl_is_minus_two_for_missing_key() {
        let mut d = db();
        let result = ttl(&mut d, &[b"TTL".to_vec(), b"missing".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(result.reply, Reply::Integer(-2));
    }
}
