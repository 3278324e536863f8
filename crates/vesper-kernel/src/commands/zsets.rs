//! ZSET commands (spec §3's ZSET payload, §4.4 skiplist-backed ordering).

use vesper_types::UnixTime;

use crate::command::{HandlerOutcome, HandlerResult, Reply, ok, wrote};
use crate::database::Database;
use crate::error::KernelError;
use crate::object::{Value, ZSetData};

use super::parse_f64;

fn get_zset<'a>(
    db: &'a mut Database,
    key: &[u8],
    now: UnixTime,
) -> Result<Option<&'a mut ZSetData>, KernelError> {
    match db.lookup_write(key, now).value {
        Some(v) if v.as_zset().is_some() => Ok(v.as_zset_mut()),
        Some(_) => Err(KernelError::WrongType),
        None => Ok(None),
    }
}

pub fn zadd(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(KernelError::wrong_arity("ZADD"));
    }
    let key = &argv[1];
    let existing = db.lookup_write(key, now).value.is_some();
    let mut owned = if existing { None } else { Some(ZSetData::new()) };
    let zset: &mut ZSetData = if let Some(z) = owned.as_mut() {
        z
    } else {
        get_zset(db, key, now)?.expect("checked present")
    };
    let mut added = 0i64;
    for pair in argv[2..].chunks_exact(2) {
        let score = parse_f64(&pair[0])?;
        if zset.insert(pair[1].clone(), score).is_none() {
            added += 1;
        }
    }
    if let Some(z) = owned {
        db.set(key.clone(), Value::zset(z));
    }
    if added > 0 {
        Ok(HandlerResult::wrote_n(Reply::Integer(added), added as u64))
    } else {
        wrote(Reply::Integer(0))
    }
}

pub fn zrem(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let key = argv[1].clone();
    let Some(zset) = get_zset(db, &key, now)? else {
        return ok(Reply::Integer(0));
    };
    let mut removed = 0i64;
    for member in &argv[2..] {
        if zset.remove(member).is_some() {
            removed += 1;
        }
    }
    if zset.is_empty() {
        db.remove(&key);
    }
    if removed > 0 {
        Ok(HandlerResult::wrote_n(Reply::Integer(removed), removed as u64))
    } else {
        ok(Reply::Integer(0))
    }
}

pub fn zscore(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    match get_zset(db, &argv[1], now)?.and_then(|z| z.score(&argv[2])) {
        Some(score) => ok(Reply::bulk(crate::commands::strings::format_f64(score).into_bytes())),
        None => ok(Reply::NilBulk),
    }
}

pub fn zcard(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let len = get_zset(db, &argv[1], now)?.map_or(0, |z| z.len());
    ok(Reply::Integer(len as i64))
}

pub fn zrank(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    match get_zset(db, &argv[1], now)?.and_then(|z| z.rank(&argv[2])) {
        Some(rank) => ok(Reply::Integer(rank as i64)),
        None => ok(Reply::NilBulk),
    }
}

pub fn zrevrank(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let Some(zset) = get_zset(db, &argv[1], now)? else {
        return ok(Reply::NilBulk);
    };
    match zset.rank(&argv[2]) {
        Some(rank) => ok(Reply::Integer((zset.len() as u64 - 1 - rank) as i64)),
        None => ok(Reply::NilBulk),
    }
}

fn resolve_range(start: i64, stop: i64, len: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let resolve = |i: i64| -> i64 { if i < 0 { (len + i).max(-1) } else { i } };
    let start = resolve(start).max(0);
    let stop = resolve(stop).min(len - 1);
    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

fn render_range(zset: &ZSetData, start: usize, stop: usize, rev: bool, with_scores: bool) -> Vec<Reply> {
    let entries = zset.skiplist().iter().collect::<Vec<_>>();
    let mut out = Vec::new();
    let slice = &entries[start..=stop];
    let iter: Box<dyn Iterator<Item = &&crate::skiplist::Entry>> =
        if rev { Box::new(slice.iter().rev()) } else { Box::new(slice.iter()) };
    for entry in iter {
        out.push(Reply::bulk(entry.member.clone()));
        if with_scores {
            out.push(Reply::bulk(crate::commands::strings::format_f64(entry.score).into_bytes()));
        }
    }
    out
}

pub fn zrange(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    range_impl(db, argv, now, false)
}

pub fn zrevrange(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    range_impl(db, argv, now, true)
}

fn range_impl(db: &mut Database, argv: &[Vec<u8>], now: UnixTime, rev: bool) -> HandlerOutcome {
    let start = super::parse_i64(&argv[2])?;
    let stop = super::parse_i64(&argv[3])?;
    let with_scores = argv.get(4).is_some_and(|a| a.eq_ignore_ascii_case(b"WITHSCORES"));
    let Some(zset) = get_zset(db, &argv[1], now)? else {
        return ok(Reply::Multi(Vec::new()));
    };
    let Some((start, stop)) = resolve_range(start, stop, zset.len() as i64) else {
        return ok(Reply::Multi(Vec::new()));
    };
    ok(Reply::Multi(render_range(zset, start, stop, rev, with_scores)))
}

fn parse_bound(raw: &[u8]) -> Result<(f64, bool), KernelError> {
    if let Some(rest) = raw.strip_prefix(b"(") {
        Ok((parse_f64(rest)?, true))
    } else {
        Ok((parse_f64(raw)?, false))
    }
}

pub fn zrangebyscore(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let (min, min_exclusive) = parse_bound(&argv[2])?;
    let (max, max_exclusive) = parse_bound(&argv[3])?;
    let with_scores = argv.get(4).is_some_and(|a| a.eq_ignore_ascii_case(b"WITHSCORES"));
    let Some(zset) = get_zset(db, &argv[1], now)? else {
        return ok(Reply::Multi(Vec::new()));
    };
    let entries = zset.skiplist().range_by_score(min, min_exclusive, max, max_exclusive);
    let mut out = Vec::new();
    for entry in entries {
        out.push(Reply::bulk(entry.member.clone()));
        if with_scores {
            out.push(Reply::bulk(crate::commands::strings::format_f64(entry.score).into_bytes()));
        }
    }
    ok(Reply::Multi(out))
}

pub fn zincrby(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let delta = parse_f64(&argv[2])?;
    let key = &argv[1];
    let existing = db.lookup_write(key, now).value.is_some();
    let mut owned = if existing { None } else { Some(ZSetData::new()) };
    let zset: &mut ZSetData = if let Some(z) = owned.as_mut() {
        z
    } else {
        get_zset(db, key, now)?.expect("checked present")
    };
    let next = zset.score(&argv[3]).unwrap_or(0.0) + delta;
    if !next.is_finite() {
        return Err(KernelError::NotADouble);
    }
    zset.insert(argv[3].clone(), next);
    if let Some(z) = owned {
        db.set(key.clone(), Value::zset(z));
    }
    wrote(Reply::bulk(crate::commands::strings::format_f64(next).into_bytes()))
}

pub fn zremrangebyrank(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let start = super::parse_i64(&argv[2])?;
    let stop = super::parse_i64(&argv[3])?;
    let key = argv[1].clone();
    let Some(zset) = get_zset(db, &key, now)? else {
        return ok(Reply::Integer(0));
    };
    let Some((start, stop)) = resolve_range(start, stop, zset.len() as i64) else {
        return ok(Reply::Integer(0));
    };
    let victims: Vec<Vec<u8>> = zset
        .skiplist()
        .iter()
        .skip(start)
        .take(stop - start + 1)
        .map(|e| e.member.clone())
        .collect();
    for member in &victims {
        zset.remove(member);
    }
    if zset.is_empty() {
        db.remove(&key);
    }
    let removed = victims.len() as i64;
    if removed > 0 {
        Ok(HandlerResult::wrote_n(Reply::Integer(removed), removed as u64))
    } else {
        ok(Reply::Integer(0))
    }
}

pub fn zremrangebyscore(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let (min, min_exclusive) = parse_bound(&argv[2])?;
    let (max, max_exclusive) = parse_bound(&argv[3])?;
    let key = argv[1].clone();
    let Some(zset) = get_zset(db, &key, now)? else {
        return ok(Reply::Integer(0));
    };
    let victims: Vec<Vec<u8>> = zset
        .skiplist()
        .range_by_score(min, min_exclusive, max, max_exclusive)
        .into_iter()
        .map(|e| e.member.clone())
        .collect();
    for member in &victims {
        zset.remove(member);
    }
    if zset.is_empty() {
        db.remove(&key);
    }
    let removed = victims.len() as i64;
    if removed > 0 {
        Ok(HandlerResult::wrote_n(Reply::Integer(removed), removed as u64))
    } else {
        ok(Reply::Integer(0))
    }
}

enum Aggregate {
    Sum,
    Min,
    Max,
}

fn combine(agg: &Aggregate, a: f64, b: f64) -> f64 {
    match agg {
        Aggregate::Sum => a + b,
        Aggregate::Min => a.min(b),
        Aggregate::Max => a.max(b),
    }
}

/// Parses the optional `WEIGHTS w1 .. wN` / `AGGREGATE SUM|MIN|MAX` tail
/// that follows the key list in ZUNIONSTORE/ZINTERSTORE.
fn parse_zsetop_modifiers(tail: &[Vec<u8>], numkeys: usize) -> Result<(Vec<f64>, Aggregate), KernelError> {
    let mut weights = vec![1.0; numkeys];
    let mut aggregate = Aggregate::Sum;
    let mut i = 0;
    while i < tail.len() {
        if tail[i].eq_ignore_ascii_case(b"WEIGHTS") {
            if tail.len() < i + 1 + numkeys {
                return Err(KernelError::syntax());
            }
            for (slot, raw) in weights.iter_mut().zip(&tail[i + 1..i + 1 + numkeys]) {
                *slot = parse_f64(raw)?;
            }
            i += 1 + numkeys;
        } else if tail[i].eq_ignore_ascii_case(b"AGGREGATE") {
            let Some(kind) = tail.get(i + 1) else {
                return Err(KernelError::syntax());
            };
            aggregate = if kind.eq_ignore_ascii_case(b"SUM") {
                Aggregate::Sum
            } else if kind.eq_ignore_ascii_case(b"MIN") {
                Aggregate::Min
            } else if kind.eq_ignore_ascii_case(b"MAX") {
                Aggregate::Max
            } else {
                return Err(KernelError::syntax());
            };
            i += 2;
        } else {
            return Err(KernelError::syntax());
        }
    }
    Ok((weights, aggregate))
}

/// Snapshots `key` as a zset for ZUNIONSTORE/ZINTERSTORE source material.
/// A set-typed value is treated as a zset with every member scored 1.0.
fn zsetop_source(db: &mut Database, key: &[u8], now: UnixTime) -> Result<ZSetData, KernelError> {
    match db.lookup_read(key, now) {
        Some(v) => {
            if let Some(zset) = v.as_zset() {
                Ok(zset.clone())
            } else if let Some(set) = v.as_set() {
                let mut zset = ZSetData::new();
                for member in set {
                    zset.insert(member.clone(), 1.0);
                }
                Ok(zset)
            } else {
                Err(KernelError::WrongType)
            }
        }
        None => Ok(ZSetData::new()),
    }
}

fn zsetop_store(
    db: &mut Database,
    keys: &[Vec<u8>],
    weights: &[f64],
    aggregate: &Aggregate,
    now: UnixTime,
    union: bool,
) -> Result<ZSetData, KernelError> {
    let mut sources = Vec::new();
    for key in keys {
        sources.push(zsetop_source(db, key, now)?);
    }
    let mut result = ZSetData::new();
    if union {
        for (source, &weight) in sources.iter().zip(weights) {
            for member in source.members() {
                let score = source.score(member).unwrap() * weight;
                let combined = match result.score(member) {
                    Some(existing) => combine(aggregate, existing, score),
                    None => score,
                };
                result.insert(member.clone(), combined);
            }
        }
    } else if let Some(first) = sources.first() {
        let first_weight = weights[0];
        'member: for member in first.members() {
            let mut score = first.score(member).unwrap() * first_weight;
            for (other, &weight) in sources[1..].iter().zip(&weights[1..]) {
                match other.score(member) {
                    Some(s) => score = combine(aggregate, score, s * weight),
                    None => continue 'member,
                }
            }
            result.insert(member.clone(), score);
        }
    }
    Ok(result)
}

pub fn zunionstore(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let numkeys = super::parse_i64(&argv[2])? as usize;
    if argv.len() < 3 + numkeys {
        return Err(KernelError::syntax());
    }
    let keys = &argv[3..3 + numkeys];
    let (weights, aggregate) = parse_zsetop_modifiers(&argv[3 + numkeys..], numkeys)?;
    let result = zsetop_store(db, keys, &weights, &aggregate, now, true)?;
    let len = result.len() as i64;
    if result.is_empty() {
        db.remove(&argv[1]);
    } else {
        db.set(argv[1].clone(), Value::zset(result));
    }
    wrote(Reply::Integer(len))
}

pub fn zinterstore(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let numkeys = super::parse_i64(&argv[2])? as usize;
    if argv.len() < 3 + numkeys {
        return Err(KernelError::syntax());
    }
    let keys = &argv[3..3 + numkeys];
    let (weights, aggregate) = parse_zsetop_modifiers(&argv[3 + numkeys..], numkeys)?;
    let result = zsetop_store(db, keys, &weights, &aggregate, now, false)?;
    let len = result.len() as i64;
    if result.is_empty() {
        db.remove(&argv[1]);
    } else {
        db.set(argv[1].clone(), Value::zset(result));
    }
    wrote(Reply::Integer(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::DbIndex;

    fn db() -> Database {
        Database::new(DbIndex::new(0))
    }

    #[test]
    fn zadd_then_zrange_is_score_ordered() {
        let mut d = db();
        zadd(&mut d, &[b"ZADD".to_vec(), b"z".to_vec(), b"3".to_vec(), b"c".to_vec()], UnixTime::ZERO).unwrap();
        zadd(&mut d, &[b"ZADD".to_vec(), b"z".to_vec(), b"1".to_vec(), b"a".to_vec()], UnixTime::ZERO).unwrap();
        zadd(&mut d, &[b"ZADD".to_vec(), b"z".to_vec(), b"2".to_vec(), b"b".to_vec()], UnixTime::ZERO).unwrap();
        let r = zrange(&mut d, &[b"ZRANGE".to_vec(), b"z".to_vec(), b"0".to_vec(), b"-1".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(
            r.reply,
            Reply::Multi(vec![Reply::bulk(*b"a"), Reply::bulk(*b"b"), Reply::bulk(*b"c")])
        );
    }

    #[test]
    fn zrangebyscore_respects_open_interval() {
        let mut d = db();
        for (score, member) in [(1.0, "a"), (2.0, "b"), (3.0, "c")] {
            zadd(
                &mut d,
                &[b"ZADD".to_vec(), b"z".to_vec(), score.to_string().into_bytes(), member.into()],
                UnixTime::ZERO,
            )
            .unwrap();
        }
        let r = zrangebyscore(
            &mut d,
            &[b"ZRANGEBYSCORE".to_vec(), b"z".to_vec(), b"(1".to_vec(), b"3".to_vec()],
            UnixTime::ZERO,
        )
        .unwrap();
        assert_eq!(r.reply, Reply::Multi(vec![Reply::bulk(*b"b"), Reply::bulk(*b"c")]));
    }

    #[test]
    fn zunionstore_sums_scores_across_sources() {
        let mut d = db();
        zadd(&mut d, &[b"ZADD".to_vec(), b"a".to_vec(), b"1".to_vec(), b"x".to_vec()], UnixTime::ZERO).unwrap();
        zadd(&mut d, &[b"ZADD".to_vec(), b"b".to_vec(), b"2".to_vec(), b"x".to_vec()], UnixTime::ZERO).unwrap();
        zunionstore(
            &mut d,
            &[b"ZUNIONSTORE".to_vec(), b"dst".to_vec(), b"2".to_vec(), b"a".to_vec(), b"b".to_vec()],
            UnixTime::ZERO,
        )
        .unwrap();
        let r = zscore(&mut d, &[b"ZSCORE".to_vec(), b"dst".to_vec(), b"x".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r.reply, Reply::bulk(b"3".to_vec()));
    }
}
