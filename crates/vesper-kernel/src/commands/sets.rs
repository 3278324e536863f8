//! SET commands (spec §3's SET payload: unordered, byte-unique members).

use std::collections::HashSet;

use vesper_types::UnixTime;

use crate::command::{HandlerOutcome, HandlerResult, Reply, ok, wrote};
use crate::database::Database;
use crate::error::KernelError;
use crate::object::Value;

fn get_set<'a>(
    db: &'a mut Database,
    key: &[u8],
    now: UnixTime,
) -> Result<Option<&'a mut HashSet<Vec<u8>>>, KernelError> {
    match db.lookup_write(key, now).value {
        Some(v) if v.as_set().is_some() => Ok(v.as_set_mut()),
        Some(_) => Err(KernelError::WrongType),
        None => Ok(None),
    }
}

fn read_set(db: &mut Database, key: &[u8], now: UnixTime) -> Result<HashSet<Vec<u8>>, KernelError> {
    match db.lookup_read(key, now) {
        Some(v) => v.as_set().cloned().ok_or(KernelError::WrongType),
        None => Ok(HashSet::new()),
    }
}

pub fn sadd(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let key = &argv[1];
    if db.lookup_write(key, now).value.is_some() {
        let set = get_set(db, key, now)?.expect("checked present");
        let mut added = 0i64;
        for member in &argv[2..] {
            if set.insert(member.clone()) {
                added += 1;
            }
        }
        return if added > 0 {
            Ok(HandlerResult::wrote_n(Reply::Integer(added), added as u64))
        } else {
            ok(Reply::Integer(0))
        };
    }
    let mut set = HashSet::new();
    for member in &argv[2..] {
        set.insert(member.clone());
    }
    let added = set.len() as i64;
    db.set(key.clone(), Value::set(set));
    wrote(Reply::Integer(added))
}

pub fn srem(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let key = argv[1].clone();
    let Some(set) = get_set(db, &key, now)? else {
        return ok(Reply::Integer(0));
    };
    let mut removed = 0i64;
    for member in &argv[2..] {
        if set.remove(member) {
            removed += 1;
        }
    }
    if set.is_empty() {
        db.remove(&key);
    }
    if removed > 0 {
        Ok(HandlerResult::wrote_n(Reply::Integer(removed), removed as u64))
    } else {
        ok(Reply::Integer(0))
    }
}

pub fn scard(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let len = get_set(db, &argv[1], now)?.map_or(0, |s| s.len());
    ok(Reply::Integer(len as i64))
}

pub fn sismember(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let is_member = get_set(db, &argv[1], now)?.is_some_and(|s| s.contains(&argv[2]));
    ok(Reply::from_bool(is_member))
}

pub fn smembers(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let members = get_set(db, &argv[1], now)?
        .map(|s| s.iter().map(|m| Reply::bulk(m.clone())).collect())
        .unwrap_or_default();
    ok(Reply::Multi(members))
}

pub fn smove(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let (src, dst, member) = (argv[1].clone(), argv[2].clone(), argv[3].clone());
    let Some(source) = get_set(db, &src, now)? else {
        return ok(Reply::Integer(0));
    };
    if !source.remove(&member) {
        return ok(Reply::Integer(0));
    }
    if source.is_empty() {
        db.remove(&src);
    }
    if db.lookup_write(&dst, now).value.is_some() {
        let dest = get_set(db, &dst, now)?.expect("checked present");
        dest.insert(member);
    } else {
        let mut set = HashSet::new();
        set.insert(member);
        db.set(dst, Value::set(set));
    }
    wrote(Reply::Integer(1))
}

pub fn spop(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let key = argv[1].clone();
    let Some(set) = get_set(db, &key, now)? else {
        return ok(Reply::NilBulk);
    };
    let Some(member) = set.iter().next().cloned() else {
        return ok(Reply::NilBulk);
    };
    set.remove(&member);
    if set.is_empty() {
        db.remove(&key);
    }
    wrote(Reply::bulk(member))
}

pub fn srandmember(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let member = get_set(db, &argv[1], now)?.and_then(|s| s.iter().next().cloned());
    match member {
        Some(m) => ok(Reply::bulk(m)),
        None => ok(Reply::NilBulk),
    }
}

fn set_op(
    db: &mut Database,
    keys: &[Vec<u8>],
    now: UnixTime,
    op: impl Fn(HashSet<Vec<u8>>, HashSet<Vec<u8>>) -> HashSet<Vec<u8>>,
) -> Result<HashSet<Vec<u8>>, KernelError> {
    let mut acc = read_set(db, &keys[0], now)?;
    for key in &keys[1..] {
        let next = read_set(db, key, now)?;
        acc = op(acc, next);
    }
    Ok(acc)
}

pub fn sinter(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let result = set_op(db, &argv[1..], now, |a, b| a.intersection(&b).cloned().collect())?;
    ok(Reply::Multi(result.into_iter().map(Reply::bulk).collect()))
}

pub fn sunion(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let result = set_op(db, &argv[1..], now, |a, b| a.union(&b).cloned().collect())?;
    ok(Reply::Multi(result.into_iter().map(Reply::bulk).collect()))
}

pub fn sdiff(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let result = set_op(db, &argv[1..], now, |a, b| a.difference(&b).cloned().collect())?;
    ok(Reply::Multi(result.into_iter().map(Reply::bulk).collect()))
}

fn store_op(
    db: &mut Database,
    dest: &[u8],
    argv: &[Vec<u8>],
    now: UnixTime,
    op: impl Fn(HashSet<Vec<u8>>, HashSet<Vec<u8>>) -> HashSet<Vec<u8>>,
) -> HandlerOutcome {
    let result = set_op(db, argv, now, op)?;
    let len = result.len() as i64;
    if result.is_empty() {
        db.remove(dest);
    } else {
        db.set(dest.to_vec(), Value::set(result));
    }
    wrote(Reply::Integer(len))
}

pub fn sinterstore(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    store_op(db, &argv[1], &argv[2..], now, |a, b| a.intersection(&b).cloned().collect())
}

pub fn sunionstore(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    store_op(db, &argv[1], &argv[2..], now, |a, b| a.union(&b).cloned().collect())
}

pub fn sdiffstore(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    store_op(db, &argv[1], &argv[2..], now, |a, b| a.difference(&b).cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::DbIndex;

    fn db() -> Database {
        Database::new(DbIndex::new(0))
    }

    #[test]
    fn sadd_is_idempotent_for_duplicate_members() {
        let mut d = db();
        let r1 = sadd(&mut d, &[b"SADD".to_vec(), b"s".to_vec(), b"a".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r1.reply, Reply::Integer(1));
        let r2 = sadd(&mut d, &[b"SADD".to_vec(), b"s".to_vec(), b"a".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r2.reply, Reply::Integer(0));
    }

    #[test]
    fn sinterstore_replaces_destination_and_deletes_on_empty() {
        let mut d = db();
        sadd(&mut d, &[b"SADD".to_vec(), b"a".to_vec(), b"x".to_vec(), b"y".to_vec()], UnixTime::ZERO).unwrap();
        sadd(&mut d, &[b"SADD".to_vec(), b"b".to_vec(), b"y".to_vec(), b"z".to_vec()], UnixTime::ZERO).unwrap();
        let r = sinterstore(&mut d, &[b"SINTERSTORE".to_vec(), b"dst".to_vec(), b"a".to_vec(), b"b".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r.reply, Reply::Integer(1));
        assert!(d.contains(b"dst"));

        sadd(&mut d, &[b"SADD".to_vec(), b"c".to_vec(), b"q".to_vec()], UnixTime::ZERO).unwrap();
        sinterstore(&mut d, &[b"SINTERSTORE".to_vec(), b"dst".to_vec(), b"a".to_vec(), b"c".to_vec()], UnixTime::ZERO).unwrap();
        assert!(!d.contains(b"dst"));
    }

    #[test]
    fn srem_deletes_empty_set_key() {
        let mut d = db();
        sadd(&mut d, &[b"SADD".to_vec(), b"s".to_vec(), b"a".to_vec()], UnixTime::ZERO).unwrap();
        srem(&mut d, &[b"SREM".to_vec(), b"s".to_vec(), b"a".to_vec()], UnixTime::ZERO).unwrap();
        assert!(!d.contains(b"s"));
    }
}
