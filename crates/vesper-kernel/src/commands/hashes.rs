//! HASH commands (spec §3's HASH payload, PACKEDMAP→HASHTABLE promotion).

use vesper_types::UnixTime;

use crate::command::{HandlerContext, HandlerOutcome, HandlerResult, Reply, ok, wrote};
use crate::database::Database;
use crate::error::KernelError;
use crate::object::{HashData, Value};

use super::parse_i64;

fn get_hash<'a>(
    db: &'a mut Database,
    key: &[u8],
    now: UnixTime,
) -> Result<Option<&'a mut HashData>, KernelError> {
    match db.lookup_write(key, now).value {
        Some(v) if v.as_hash().is_some() => Ok(v.as_hash_mut()),
        Some(_) => Err(KernelError::WrongType),
        None => Ok(None),
    }
}

pub fn hset(db: &mut Database, argv: &[Vec<u8>], ctx: &HandlerContext) -> HandlerOutcome {
    let key = &argv[1];
    let is_new_field = if db.lookup_write(key, ctx.now).value.is_some() {
        let hash = get_hash(db, key, ctx.now)?.expect("checked present");
        hash.insert(
            argv[2].clone(),
            argv[3].clone(),
            ctx.hash_max_zipmap_entries,
            ctx.hash_max_zipmap_value,
        )
        .is_none()
    } else {
        let mut hash = HashData::default();
        hash.insert(
            argv[2].clone(),
            argv[3].clone(),
            ctx.hash_max_zipmap_entries,
            ctx.hash_max_zipmap_value,
        );
        db.set(key.clone(), Value::hash(hash));
        true
    };
    wrote(Reply::from_bool(is_new_field))
}

pub fn hsetnx(db: &mut Database, argv: &[Vec<u8>], ctx: &HandlerContext) -> HandlerOutcome {
    let key = &argv[1];
    if db.lookup_write(key, ctx.now).value.is_some() {
        let hash = get_hash(db, key, ctx.now)?.expect("checked present");
        if hash.get(&argv[2]).is_some() {
            return ok(Reply::Integer(0));
        }
        hash.insert(
            argv[2].clone(),
            argv[3].clone(),
            ctx.hash_max_zipmap_entries,
            ctx.hash_max_zipmap_value,
        );
        return wrote(Reply::Integer(1));
    }
    let mut hash = HashData::default();
    hash.insert(
        argv[2].clone(),
        argv[3].clone(),
        ctx.hash_max_zipmap_entries,
        ctx.hash_max_zipmap_value,
    );
    db.set(key.clone(), Value::hash(hash));
    wrote(Reply::Integer(1))
}

pub fn hmset(db: &mut Database, argv: &[Vec<u8>], ctx: &HandlerContext) -> HandlerOutcome {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(KernelError::wrong_arity("HMSET"));
    }
    let key = &argv[1];
    let existing = db.lookup_write(key, ctx.now).value.is_some();
    let mut hash = if existing {
        None
    } else {
        Some(HashData::default())
    };
    let target: &mut HashData = if let Some(h) = hash.as_mut() {
        h
    } else {
        get_hash(db, key, ctx.now)?.expect("checked present")
    };
    let mut pairs = argv[2..].chunks_exact(2);
    for pair in &mut pairs {
        target.insert(
            pair[0].clone(),
            pair[1].clone(),
            ctx.hash_max_zipmap_entries,
            ctx.hash_max_zipmap_value,
        );
    }
    if let Some(h) = hash {
        db.set(key.clone(), Value::hash(h));
    }
    wrote(Reply::ok())
}

pub fn hget(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    match get_hash(db, &argv[1], now)?.and_then(|h| h.get(&argv[2]).cloned()) {
        Some(v) => ok(Reply::bulk(v)),
        None => ok(Reply::NilBulk),
    }
}

pub fn hmget(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let hash = get_hash(db, &argv[1], now)?;
    let out = argv[2..]
        .iter()
        .map(|field| match hash.as_deref().and_then(|h| h.get(field)) {
            Some(v) => Reply::bulk(v.clone()),
            None => Reply::NilBulk,
        })
        .collect();
    ok(Reply::Multi(out))
}

pub fn hdel(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let key = argv[1].clone();
    let Some(hash) = get_hash(db, &key, now)? else {
        return ok(Reply::Integer(0));
    };
    let mut removed = 0i64;
    for field in &argv[2..] {
        if hash.remove(field).is_some() {
            removed += 1;
        }
    }
    if hash.is_empty() {
        db.remove(&key);
    }
    if removed > 0 {
        Ok(HandlerResult::wrote_n(Reply::Integer(removed), removed as u64))
    } else {
        ok(Reply::Integer(0))
    }
}

pub fn hexists(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let exists = get_hash(db, &argv[1], now)?.is_some_and(|h| h.get(&argv[2]).is_some());
    ok(Reply::from_bool(exists))
}

pub fn hlen(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let len = get_hash(db, &argv[1], now)?.map_or(0, |h| h.len());
    ok(Reply::Integer(len as i64))
}

pub fn hkeys(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let out = get_hash(db, &argv[1], now)?
        .map(|h| h.iter().map(|(f, _)| Reply::bulk(f.to_vec())).collect())
        .unwrap_or_default();
    ok(Reply::Multi(out))
}

pub fn hvals(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let out = get_hash(db, &argv[1], now)?
        .map(|h| h.iter().map(|(_, v)| Reply::bulk(v.to_vec())).collect())
        .unwrap_or_default();
    ok(Reply::Multi(out))
}

pub fn hgetall(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let out = get_hash(db, &argv[1], now)?
        .map(|h| {
            h.iter()
                .flat_map(|(f, v)| [Reply::bulk(f.to_vec()), Reply::bulk(v.to_vec())])
                .collect()
        })
        .unwrap_or_default();
    ok(Reply::Multi(out))
}

pub fn hincrby(db: &mut Database, argv: &[Vec<u8>], ctx: &HandlerContext) -> HandlerOutcome {
    let delta = parse_i64(&argv[3])?;
    let key = &argv[1];
    let existing = db.lookup_write(key, ctx.now).value.is_some();
    let mut owned = if existing {
        None
    } else {
        Some(HashData::default())
    };
    let hash: &mut HashData = if let Some(h) = owned.as_mut() {
        h
    } else {
        get_hash(db, key, ctx.now)?.expect("checked present")
    };
    let current = hash
        .get(&argv[2])
        .map(|v| {
            std::str::from_utf8(v)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(KernelError::NotAnInteger)
        })
        .transpose()?
        .unwrap_or(0);
    let next = current.checked_add(delta).ok_or(KernelError::OutOfRange)?;
    hash.insert(
        argv[2].clone(),
        next.to_string().into_bytes(),
        ctx.hash_max_zipmap_entries,
        ctx.hash_max_zipmap_value,
    );
    if let Some(h) = owned {
        db.set(key.clone(), Value::hash(h));
    }
    wrote(Reply::Integer(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::DbIndex;

    fn db() -> Database {
        Database::new(DbIndex::new(0))
    }

    #[test]
    fn hset_reports_whether_field_was_new() {
        let mut d = db();
        let ctx = HandlerContext::default();
        let r1 = hset(&mut d, &[b"HSET".to_vec(), b"h".to_vec(), b"f".to_vec(), b"1".to_vec()], &ctx).unwrap();
        assert_eq!(r1.reply, Reply::Integer(1));
        let r2 = hset(&mut d, &[b"HSET".to_vec(), b"h".to_vec(), b"f".to_vec(), b"2".to_vec()], &ctx).unwrap();
        assert_eq!(r2.reply, Reply::Integer(0));
    }

    #[test]
    fn hincrby_creates_field_at_zero_and_errors_on_non_integer() {
        let mut d = db();
        let ctx = HandlerContext::default();
        let r = hincrby(&mut d, &[b"HINCRBY".to_vec(), b"h".to_vec(), b"c".to_vec(), b"5".to_vec()], &ctx).unwrap();
        assert_eq!(r.reply, Reply::Integer(5));
        hset(&mut d, &[b"HSET".to_vec(), b"h".to_vec(), b"s".to_vec(), b"abc".to_vec()], &ctx).unwrap();
        assert!(matches!(
            hincrby(&mut d, &[b"HINCRBY".to_vec(), b"h".to_vec(), b"s".to_vec(), b"1".to_vec()], &ctx),
            Err(KernelError::NotAnInteger)
        ));
    }

    #[test]
    fn hdel_removes_field_and_deletes_empty_hash() {
        let mut d = db();
        let ctx = HandlerContext::default();
        hset(&mut d, &[b"HSET".to_vec(), b"h".to_vec(), b"f".to_vec(), b"1".to_vec()], &ctx).unwrap();
        hdel(&mut d, &[b"HDEL".to_vec(), b"h".to_vec(), b"f".to_vec()], ctx.now).unwrap();
        assert!(!d.contains(b"h"));
    }

    #[test]
    fn hgetall_promotes_then_still_returns_all_pairs() {
        let mut d = db();
        let ctx = HandlerContext {
            hash_max_zipmap_entries: 2,
            ..HandlerContext::default()
        };
        for i in 0..5 {
            hset(
                &mut d,
                &[b"HSET".to_vec(), b"h".to_vec(), format!("f{i}").into_bytes(), b"v".to_vec()],
                &ctx,
            )
            .unwrap();
        }
        let r = hgetall(&mut d, &[b"HGETALL".to_vec(), b"h".to_vec()], ctx.now).unwrap();
        match r.reply {
            Reply::Multi(items) => assert_eq!(items.len(), 10),
            other => panic!("expected multi, got {other:?}"),
        }
    }
}
