//! STRING commands (spec §3's STRING payload, §4.2 encoding rules).

use vesper_types::UnixTime;

use crate::command::{HandlerOutcome, Reply, ok, wrote};
use crate::database::Database;
use crate::error::KernelError;
use crate::object::{StringData, Value};

use super::{parse_i64, parse_f64};

fn get_string<'a>(db: &'a mut Database, key: &[u8], now: UnixTime) -> Result<Option<&'a StringData>, KernelError> {
    match db.lookup_write(key, now).value {
        Some(v) if v.as_string().is_some() => Ok(v.as_string()),
        Some(_) => Err(KernelError::WrongType),
        None => Ok(None),
    }
}

pub fn get(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    match get_string(db, &argv[1], now)? {
        Some(s) => ok(Reply::bulk(s.as_bytes())),
        None => ok(Reply::NilBulk),
    }
}

pub fn set(db: &mut Database, argv: &[Vec<u8>], _now: UnixTime) -> HandlerOutcome {
    // SET always overwrites whatever was there, regardless of prior type.
    db.set(argv[1].clone(), Value::string(StringData::from_bytes(argv[2].clone())));
    wrote(Reply::ok())
}

pub fn setnx(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    if db.lookup_read(&argv[1], now).is_some() {
        return ok(Reply::Integer(0));
    }
    db.set(argv[1].clone(), Value::string(StringData::from_bytes(argv[2].clone())));
    wrote(Reply::Integer(1))
}

pub fn setex(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let secs = parse_i64(&argv[2])?;
    if secs <= 0 {
        return Err(KernelError::OutOfRange);
    }
    db.set(argv[1].clone(), Value::string(StringData::from_bytes(argv[3].clone())));
    db.set_expire(&argv[1], now.saturating_add(secs));
    wrote(Reply::ok())
}

pub fn getset(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let previous = get_string(db, &argv[1], now)?.map(StringData::as_bytes);
    db.set(argv[1].clone(), Value::string(StringData::from_bytes(argv[2].clone())));
    match previous {
        Some(bytes) => wrote(Reply::bulk(bytes)),
        None => wrote(Reply::NilBulk),
    }
}

pub fn append(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let mut bytes = get_string(db, &argv[1], now)?.map(StringData::as_bytes).unwrap_or_default();
    bytes.extend_from_slice(&argv[2]);
    let len = bytes.len() as i64;
    db.set(argv[1].clone(), Value::string(StringData::from_bytes(bytes)));
    wrote(Reply::Integer(len))
}

pub fn strlen(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let len = get_string(db, &argv[1], now)?.map_or(0, StringData::len);
    ok(Reply::Integer(len as i64))
}

fn incr_by(db: &mut Database, key: &[u8], delta: i64, now: UnixTime) -> HandlerOutcome {
    let current = get_string(db, key, now)?.and_then(StringData::as_i64).unwrap_or(0);
    let next = current.checked_add(delta).ok_or(KernelError::OutOfRange)?;
    db.set(key.to_vec(), Value::string(StringData::from_i64(next)));
    wrote(Reply::Integer(next))
}

pub fn incr(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    incr_by(db, &argv[1], 1, now)
}

pub fn decr(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    incr_by(db, &argv[1], -1, now)
}

pub fn incrby(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let delta = parse_i64(&argv[2])?;
    incr_by(db, &argv[1], delta, now)
}

pub fn decrby(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let delta = parse_i64(&argv[2])?;
    incr_by(db, &argv[1], delta.checked_neg().ok_or(KernelError::OutOfRange)?, now)
}

pub fn incrbyfloat(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let delta = parse_f64(&argv[2])?;
    let current = get_string(db, &argv[1], now)?.and_then(StringData::as_f64).unwrap_or(0.0);
    let next = current + delta;
    if !next.is_finite() {
        return Err(KernelError::NotADouble);
    }
    let rendered = format_f64(next);
    db.set(argv[1].clone(), Value::string(StringData::from_bytes(rendered.clone().into_bytes())));
    wrote(Reply::bulk(rendered.into_bytes()))
}

pub(crate) fn format_f64(value: f64) -> String {
    let s = format!("{value:.17}");
    let trimmed = s.trim_end_matches('0');
    let trimmed = trimmed.trim_end_matches('.');
    if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }
}

/// `GETRANGE`/legacy `SUBSTR`: negative indices count from the end;
/// start-beyond-length returns nil, end-beyond-length clamps (spec §9 Open
/// Question: this clamping behavior is preserved deliberately).
pub fn getrange(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let bytes = get_string(db, &argv[1], now)?.map(StringData::as_bytes).unwrap_or_default();
    let start = parse_i64(&argv[2])?;
    let end = parse_i64(&argv[3])?;
    let len = bytes.len() as i64;
    if len == 0 {
        return ok(Reply::bulk(Vec::new()));
    }
    let resolve = |i: i64| -> i64 { if i < 0 { (len + i).max(0) } else { i } };
    let start = resolve(start);
    let end = resolve(end).min(len - 1);
    if start > end || start >= len {
        return ok(Reply::bulk(Vec::new()));
    }
    ok(Reply::bulk(bytes[start as usize..=end as usize].to_vec()))
}

pub fn setrange(db: &mut Database, argv: &[Vec<u8>], now: UnixTime) -> HandlerOutcome {
    let offset = parse_i64(&argv[2])?;
    if offset < 0 {
        return Err(KernelError::OutOfRange);
    }
    let mut bytes = get_string(db, &argv[1], now)?.map(StringData::as_bytes).unwrap_or_default();
    let offset = offset as usize;
    let patch = &argv[3];
    if bytes.len() < offset + patch.len() {
        bytes.resize(offset + patch.len(), 0);
    }
    bytes[offset..offset + patch.len()].copy_from_slice(patch);
    let len = bytes.len() as i64;
    db.set(argv[1].clone(), Value::string(StringData::from_bytes(bytes)));
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
    fn set_then_get_round_trips() {
        let mut d = db();
        set(&mut d, &[b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()], UnixTime::ZERO).unwrap();
        let result = get(&mut d, &[b"GET".to_vec(), b"foo".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(result.reply, Reply::bulk(*b"bar"));
    }

    #[test]
    fn incr_on_missing_key_starts_at_zero() {
        let mut d = db();
        let result = incr(&mut d, &[b"INCR".to_vec(), b"counter".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(result.reply, Reply::Integer(1));
    }

    #[test]
    fn incr_on_non_integer_string_errors() {
        let mut d = db();
        set(&mut d, &[b"SET".to_vec(), b"k".to_vec(), b"abc".to_vec()], UnixTime::ZERO).unwrap();
        assert!(matches!(
            incr(&mut d, &[b"INCR".to_vec(), b"k".to_vec()], UnixTime::ZERO),
            Err(KernelError::NotAnInteger)
        ));
    }

    #[test]
    fn append_creates_key_if_missing_and_extends_otherwise() {
        let mut d = db();
        append(&mut d, &[b"APPEND".to_vec(), b"k".to_vec(), b"foo".to_vec()], UnixTime::ZERO).unwrap();
        let r = append(&mut d, &[b"APPEND".to_vec(), b"k".to_vec(), b"bar".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r.reply, Reply::Integer(6));
    }

    #[test]
    fn getrange_clamps_end_and_nils_on_start_past_length() {
        let mut d = db();
        set(&mut d, &[b"SET".to_vec(), b"k".to_vec(), b"hello".to_vec()], UnixTime::ZERO).unwrap();
        let r = getrange(&mut d, &[b"GETRANGE".to_vec(), b"k".to_vec(), b"0".to_vec(), b"100".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r.reply, Reply::bulk(*b"hello"));
        let r = getrange(&mut d, &[b"GETRANGE".to_vec(), b"k".to_vec(), b"10".to_vec(), b"20".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r.reply, Reply::bulk(Vec::new()));
    }

    #[test]
    fn setrange_pads_with_zero_bytes() {
        let mut d = db();
        setrange(&mut d, &[b"SETRANGE".to_vec(), b"k".to_vec(), b"5".to_vec(), b"hi".to_vec()], UnixTime::ZERO).unwrap();
        let r = get(&mut d, &[b"GET".to_vec(), b"k".to_vec()], UnixTime::ZERO).unwrap();
        assert_eq!(r.reply, Reply::bulk(vec![0, 0, 0, 0, 0, b'h', b'i']));
    }
}
