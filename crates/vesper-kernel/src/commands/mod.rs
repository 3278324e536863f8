//! Command handlers (spec §4.2–§4.4, §4.12). Grouped by the value type
//! they primarily operate on, following the source's own per-type command
//! modules.

pub mod generic;
pub mod hashes;
pub mod lists;
pub mod sets;
pub mod sort;
pub mod strings;
pub mod zsets;

use vesper_types::UnixTime;

use crate::database::Database;
use crate::error::KernelError;
use crate::object::Value;

pub(crate) fn parse_i64(bytes: &[u8]) -> Result<i64, KernelError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(KernelError::NotAnInteger)
}

pub(crate) fn parse_f64(bytes: &[u8]) -> Result<f64, KernelError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| match s {
            "+inf" | "inf" | "+infinity" => Some(f64::INFINITY),
            "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
            other => other.parse().ok(),
        })
        .ok_or(KernelError::NotADouble)
}

/// Looks up `key` for a write, returning `None` if absent and erroring if
/// present but the wrong type. `now` resolves lazy expiry first.
pub(crate) fn lookup_typed<'a>(
    db: &'a mut Database,
    key: &[u8],
    now: UnixTime,
    expected: vesper_types::ValueType,
) -> Result<Option<&'a mut Value>, KernelError> {
    let found = db.lookup_write(key, now).value.is_some();
    if !found {
        return Ok(None);
    }
    // Re-borrow: lookup_write above already resolved expiry.
    let value = db.lookup_write(key, now).value;
    match value {
        Some(v) if v.value_type() == expected => Ok(Some(v)),
        Some(_) => Err(KernelError::WrongType),
        None => Ok(None),
    }
}
