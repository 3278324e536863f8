//! LIST commands (spec §3's LIST payload).
//!
//! BLPOP/BRPOP's *blocking* is a server-level concern (suspending the
//! client, per spec §9's "blocking rendezvous" design note): these handlers
//! only implement the non-blocking pop attempt. `vesper-server` calls
//! [`lpop`]/[`rpop`] first and, on an empty reply, registers the client as
//! a blocking waiter via `Database::add_blocking_waiter`.

use std::collections::VecDeque;

use vesper_types::UnixTime;

use crate::command::{HandlerOutcome, Reply, ok, wrote};
use crate::database::Database;
use crate::error::KernelError;
use crate::object::{StringData, Value};

use super::parse_i64;

fn get_list<'a>(
    db: &'a mut Database,
    key: &[u8],
    now: UnixTime,
) -> Result<Option<&'a mut VecDeque<StringData>>, KernelError> {
    match db.lookup_write(key, now).value {
        Some(v) if v.as_list().is_some() => Ok(v.as_list_mut()),
        Some(_) => Err(KernelError::WrongType),
        None => Ok(None),
    }
}

fn push(db: &mut Database, argv: &[Vec<u8>], now: UnixTime, front: bool) -> HandlerOutcome {
    let key = &argv[1];
    if db.lookup_write(key, now).value.is_some() {
        let list = get_list(db, key, now)?.expect("checked present");
        for item in &argv[2..] {
            if front {
                list.push_front(StringData::from_bytes(item.clone()));
            } else {
                list.push_back(StringData::from_bytes(item.clone()));
            }
        }
        let len = list.len() as i64;
        return wrote(Reply::Integer(len));
    }
    let mut list = VecDeque::new();
    for item in &argv[2..] {
        if front {
            list.push_front(StringData::from_bytes(item.clone()));
        } else {
            list.push_back(StringData::from_bytes(item.clone()));
        }
    }
    let len = list.len() as i64;
    db.set(key.clone(), Value::list(list));
    wrote(Reply::Integer(len))
}

pub fn lpush(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    push(db, argv, now, true)
}

pub fn rpush(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    push(db, argv, now, false)
}

fn pop(db: &mut Database, argv: &[Vec<u8>], now: UnixTime, front: bool) -> HandlerOutcome {
    let key = &argv[1];
    let Some(list) = get_list(db, key, now)? else {
        return ok(Reply::NilBulk);
    };
    let popped = if front { list.pop_front() } else { list.pop_back() };
    let Some(popped) = popped else {
        return ok(Reply::NilBulk);
    };
    if list.is_empty() {
        db.remove(key);
    }
    wrote(Reply::bulk(popped.as_bytes()))
}

pub fn lpop(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    pop(db, argv, now, true)
}

pub fn rpop(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    pop(db, argv, now, false)
}

pub fn llen(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let len = get_list(db, &argv[1], now)?.map_or(0, |l| l.len());
    ok(Reply::Integer(len as i64))
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

pub fn lrange(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let start = parse_i64(&argv[2])?;
    let stop = parse_i64(&argv[3])?;
    let Some(list) = get_list(db, &argv[1], now)? else {
        return ok(Reply::Multi(Vec::new()));
    };
    let Some((start, stop)) = resolve_range(start, stop, list.len() as i64) else {
        return ok(Reply::Multi(Vec::new()));
    };
    let items = list
        .iter()
        .skip(start)
        .take(stop - start + 1)
        .map(|s| Reply::bulk(s.as_bytes()))
        .collect();
    ok(Reply::Multi(items))
}

pub fn lindex(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let idx = parse_i64(&argv[2])?;
    let Some(list) = get_list(db, &argv[1], now)? else {
        return ok(Reply::NilBulk);
    };
    let len = list.len() as i64;
    let resolved = if idx < 0 { len + idx } else { idx };
    if resolved < 0 || resolved >= len {
        return ok(Reply::NilBulk);
    }
    ok(Reply::bulk(list[resolved as usize].as_bytes()))
}

pub fn lset(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let idx = parse_i64(&argv[2])?;
    let Some(list) = get_list(db, &argv[1], now)? else {
        return Err(KernelError::NoSuchKey);
    };
    let len = list.len() as i64;
    let resolved = if idx < 0 { len + idx } else { idx };
    if resolved < 0 || resolved >= len {
        return Err(KernelError::IndexOutOfRange);
    }
    list[resolved as usize] = StringData::from_bytes(argv[3].clone());
    wrote(Reply::ok())
}

pub fn ltrim(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let start = parse_i64(&argv[2])?;
    let stop = parse_i64(&argv[3])?;
    let key = argv[1].clone();
    let Some(list) = get_list(db, &key, now)? else {
        return wrote(Reply::ok());
    };
    let len = list.len() as i64;
    match resolve_range(start, stop, len) {
        Some((s, e)) => {
            let kept: VecDeque<StringData> = list.iter().skip(s).take(e - s + 1).cloned().collect();
            *list = kept;
        }
        None => list.clear(),
    }
    if list.is_empty() {
        db.remove(&key);
    }
    wrote(Reply::ok())
}

pub fn lrem(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let count = parse_i64(&argv[2])?;
    let target = &argv[3];
    let key = argv[1].clone();
    let Some(list) = get_list(db, &key, now)? else {
        return ok(Reply::Integer(0));
    };
    let mut removed = 0i64;
    if count >= 0 {
        let limit = if count == 0 { i64::MAX } else { count };
        let mut kept = VecDeque::new();
        for item in list.drain(..) {
            if removed < limit && item.as_bytes() == *target {
                removed += 1;
            } else {
                kept.push_back(item);
            }
        }
        *list = kept;
    } else {
        let limit = -count;
        let mut kept: VecDeque<StringData> = VecDeque::new();
        for item in list.drain(..).rev() {
            if removed < limit && item.as_bytes() == *target {
                removed += 1;
            } else {
                kept.push_front(item);
            }
        }
        *list = kept;
    }
    if list.is_empty() {
        db.remove(&key);
    }
    if removed > 0 {
        Ok(crate::command::HandlerResult::wrote_n(Reply::Integer(removed), removed as u64))
    } else {
        ok(Reply::Integer(0))
    }
}

pub fn rpoplpush(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let (src, dst) = (argv[1].clone(), argv[2].clone());
    let Some(source) = get_list(db, &src, now)? else {
        return ok(Reply::NilBulk);
    };
    let Some(item) = source.pop_back() else {
        return ok(Reply::NilBulk);
    };
    if source.is_empty() {
        db.remove(&src);
    }
    if db.lookup_write(&dst, now).value.is_some() {
        let dest_list = get_list(db, &dst, now)?.expect("checked present");
        dest_list.push_front(item.clone());
    } else {
        let mut list = VecDeque::new();
        list.push_front(item.clone());
        db.set(dst, Value::list(list));
    }
    wrote(Reply::bulk(item.as_bytes()))
}

pub fn linsert(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let before = match argv[2].to_ascii_uppercase().as_slice() {
        b"BEFORE" => true,
        b"AFTER" => false,
        _ => return Err(KernelError::SyntaxError),
    };
    let pivot = &argv[3];
    let Some(list) = get_list(db, &argv[1], now)? else {
        return ok(Reply::Integer(0));
    };
    let Some(pos) = list.iter().position(|item| item.as_bytes() == *pivot) else {
        return ok(Reply::Integer(-1));
    };
    let insert_at = if before { pos } else { pos + 1 };
    list.insert(insert_at, StringData::from_bytes(argv[4].clone()));
    let len = list.len() as i64;
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
    fn push_and_range_preserve_order_per_spec_scenario_s2() {
        let mut d = db();
        assert_eq!(
            lpush(&mut d, &[b"LPUSH".to_vec(), b"L".to_vec(), b"a".to_vec()], UnixTime::ZERO).unwrap().reply,
            Reply::Integer(1)
        );
        assert_eq!(
            lpush(&mut d, &[b"LPUSH".to_vec(), b"L".to_vec(), b"b".to_vec()], UnixTime::ZERO).unwrap().reply,
            Reply::Integer(2)
        );
        assert_eq!(
            rpush(&mut d, &[b"RPUSH".to_vec(), b"L".to_vec(), b"c".to_vec()], UnixTime::ZERO).unwrap().reply,
            Reply::Integer(3)
        );
        let r = lrange(&mut d, &[b"LRANGE".to_vec(), b"L".to_vec(), b"0".to_vec(), b"-1".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(
            r.reply,
            Reply::Multi(vec![Reply::bulk(*b"b"), Reply::bulk(*b"a"), Reply::bulk(*b"c")])
        );
    }

    #[test]
    fn draining_pops_deletes_the_key() {
        let mut d = db();
        rpush(&mut d, &[b"RPUSH".to_vec(), b"L".to_vec(), b"x".to_vec()], UnixTime::ZERO).unwrap();
        let r = lpop(&mut d, &[b"LPOP".to_vec(), b"L".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r.reply, Reply::bulk(*b"x"));
        assert!(!d.contains(b"L"));
        let r = lpop(&mut d, &[b"LPOP".to_vec(), b"L".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r.reply, Reply::NilBulk);
    }

    #[test]
    fn lrem_negative_count_removes_from_tail() {
        let mut d = db();
        for item in ["a", "b", "a", "c", "a"] {
            rpush(&mut d, &[b"RPUSH".to_vec(), b"L".to_vec(), item.as_bytes().to_vec()], UnixTime::ZERO).unwrap();
        }
        let r = lrem(&mut d, &[b"LREM".to_vec(), b"L".to_vec(), b"-2".to_vec(), b"a".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r.reply, Reply::Integer(2));
        let remaining = lrange(&mut d, &[b"LRANGE".to_vec(), b"L".to_vec(), b"0".to_vec(), b"-1".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(
            remaining.reply,
            Reply::Multi(vec![Reply::bulk(*b"a"), Reply::bulk(*b"b"), Reply::bulk(*b"c")])
        );
    }
}
