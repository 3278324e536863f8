//! Append-only file: append, replay, and background rewrite (spec §4.6).
//!
//! The AOF is a flat concatenation of the multi-bulk wire form of every
//! write command that changed data, prefixed by `SELECT <dbid>` whenever
//! the active database changes. [`AofWriter`] owns the open file handle
//! and the "last SELECTed db" tracking; [`rewrite`] produces the minimal
//! command stream that reconstructs a live dataset, used by BGREWRITEAOF.

use std::path::Path;
use std::sync::Arc;

use vesper_io::{FileHandle, IoBackend, OpenFlags};
use vesper_kernel::Database;
use vesper_kernel::object::ValueData;
use vesper_types::DbIndex;
use vesper_wire::encode_multibulk;

use crate::error::Result;

/// `fsync` policy for the AOF (spec §4.6's `appendfsync` directive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    No,
    #[default]
    EverySec,
    Always,
}

/// Transforms applied to a command before it is appended (spec §4.6):
/// `EXPIRE key N` becomes an absolute `EXPIREAT`, and `SETEX` becomes a
/// `SET` followed by an `EXPIREAT`. Returns one or more argvs to append in
/// order.
pub fn rewrite_for_aof(argv: &[Vec<u8>], now: vesper_types::UnixTime) -> Vec<Vec<Vec<u8>>> {
    let Some(name) = argv.first() else { return vec![argv.to_vec()] };
    let upper = String::from_utf8_lossy(name).to_ascii_uppercase();
    match upper.as_str() {
        "EXPIRE" if argv.len() == 3 => {
            let Ok(secs) = String::from_utf8_lossy(&argv[2]).parse::<i64>() else {
                return vec![argv.to_vec()];
            };
            let at = now.as_secs().saturating_add(secs);
            vec![vec![b"EXPIREAT".to_vec(), argv[1].clone(), at.to_string().into_bytes()]]
        }
        "SETEX" if argv.len() == 4 => {
            let Ok(secs) = String::from_utf8_lossy(&argv[2]).parse::<i64>() else {
                return vec![argv.to_vec()];
            };
            let at = now.as_secs().saturating_add(secs);
            vec![
                vec![b"SET".to_vec(), argv[1].clone(), argv[3].clone()],
                vec![b"EXPIREAT".to_vec(), argv[1].clone(), at.to_string().into_bytes()],
            ]
        }
        _ => vec![argv.to_vec()],
    }
}

/// Owns the live AOF file handle and the bookkeeping needed to emit
/// `SELECT` only when the active database changes (spec §4.6).
///
/// Holds the backend as an `Arc` rather than borrowing it, so a long-lived
/// owner (`vesper-server`'s event loop, which keeps its `IoBackend` and its
/// `AofWriter` side by side in the same struct) doesn't need a
/// self-referential lifetime to keep both alive.
pub struct AofWriter {
    backend: Arc<dyn IoBackend>,
    handle: FileHandle,
    last_selected_db: Option<DbIndex>,
    policy: FsyncPolicy,
    dirty_since_fsync: bool,
}

impl AofWriter {
    pub fn open(backend: Arc<dyn IoBackend>, path: &Path, policy: FsyncPolicy) -> Result<Self> {
        let handle = backend.open(path, OpenFlags::append_create())?;
        Ok(Self {
            backend,
            handle,
            last_selected_db: None,
            policy,
            dirty_since_fsync: false,
        })
    }

    /// Forces the next [`append`] to emit a `SELECT`, regardless of what
    /// was last written — used right after BGREWRITEAOF swaps the file
    /// descriptor (spec §4.6).
    pub fn force_select_on_next_write(&mut self) {
        self.last_selected_db = None;
    }

    /// Appends one already-applied write command, emitting the
    /// transformations of [`rewrite_for_aof`] and a leading `SELECT` if the
    /// database changed since the last append.
    pub fn append(&mut self, db: DbIndex, argv: &[Vec<u8>], now: vesper_types::UnixTime) -> Result<()> {
        let mut buf = Vec::new();
        if self.last_selected_db != Some(db) {
            buf.extend_from_slice(&encode_multibulk(&[b"SELECT".to_vec(), db.to_string().into_bytes()]));
            self.last_selected_db = Some(db);
        }
        for rewritten in rewrite_for_aof(argv, now) {
            buf.extend_from_slice(&encode_multibulk(&rewritten));
        }
        self.backend.write(&mut self.handle, &buf)?;
        self.dirty_since_fsync = true;
        if self.policy == FsyncPolicy::Always {
            self.fsync()?;
        }
        Ok(())
    }

    /// Wraps a MULTI/EXEC block as one atomic AOF unit (spec §4.6, §4.11):
    /// `MULTI`, each queued command, then `EXEC`.
    pub fn append_transaction(
        &mut self,
        db: DbIndex,
        commands: &[Vec<Vec<u8>>],
        now: vesper_types::UnixTime,
    ) -> Result<()> {
        self.append(db, &[b"MULTI".to_vec()], now)?;
        for cmd in commands {
            self.append(db, cmd, now)?;
        }
        self.append(db, &[b"EXEC".to_vec()], now)
    }

    /// Called from the main loop's `beforeSleep` hook once per iteration
    /// (spec §4.1): performs the fsync that `policy` calls for. The caller
    /// is responsible for rate-limiting `everysec` to once per wall-clock
    /// second; this just does the syscall unconditionally when asked.
    pub fn before_sleep_fsync(&mut self) -> Result<()> {
        if self.policy == FsyncPolicy::EverySec && self.dirty_since_fsync {
            self.fsync()?;
        }
        Ok(())
    }

    fn fsync(&mut self) -> Result<()> {
        self.backend.fsync(&self.handle)?;
        self.dirty_since_fsync = false;
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.backend.close(self.handle)?;
        Ok(())
    }
}

/// Produces the minimal command sequence that reconstructs `databases`
/// (spec §4.6's BGREWRITEAOF): one `SELECT` per non-empty db, then one
/// SET/RPUSH/SADD/ZADD/HSET per key, then one EXPIREAT per expiring key.
pub fn rewrite(databases: &[Database], now: vesper_types::UnixTime) -> Vec<u8> {
    let mut out = Vec::new();
    for db in databases {
        if db.is_empty() {
            continue;
        }
        out.extend_from_slice(&encode_multibulk(&[b"SELECT".to_vec(), db.id.to_string().into_bytes()]));
        let keys: Vec<Vec<u8>> = db.keys().cloned().collect();
        for key in keys {
            let Some(value) = db.peek(&key) else { continue };
            if let Some(expire_at) = db.expire_at(&key) {
                if expire_at.is_past(now) {
                    continue;
                }
            }
            match &value.data {
                ValueData::Str(s) => {
                    out.extend_from_slice(&encode_multibulk(&[b"SET".to_vec(), key.clone(), s.as_bytes()]));
                }
                ValueData::List(items) => {
                    let mut argv = vec![b"RPUSH".to_vec(), key.clone()];
                    argv.extend(items.iter().map(vesper_kernel::object::StringData::as_bytes));
                    out.extend_from_slice(&encode_multibulk(&argv));
                }
                ValueData::Set(members) => {
                    let mut argv = vec![b"SADD".to_vec(), key.clone()];
                    argv.extend(members.iter().cloned());
                    out.extend_from_slice(&encode_multibulk(&argv));
                }
                ValueData::ZSet(zset) => {
                    let mut argv = vec![b"ZADD".to_vec(), key.clone()];
                    for entry in zset.skiplist().iter() {
                        argv.push(format_score(entry.score));
                        argv.push(entry.member.clone());
                    }
                    out.extend_from_slice(&encode_multibulk(&argv));
                }
                ValueData::Hash(hash) => {
                    let mut argv = vec![b"HMSET".to_vec(), key.clone()];
                    for (field, value) in hash.iter() {
                        argv.push(field.to_vec());
                        argv.push(value.to_vec());
                    }
                    out.extend_from_slice(&encode_multibulk(&argv));
                }
            }
            if let Some(expire_at) = db.expire_at(&key) {
                out.extend_from_slice(&encode_multibulk(&[
                    b"EXPIREAT".to_vec(),
                    key,
                    expire_at.as_secs().to_string().into_bytes(),
                ]));
            }
        }
    }
    out
}

fn format_score(score: f64) -> Vec<u8> {
    score.to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::UnixTime;

    #[test]
    fn expire_is_rewritten_to_absolute_expireat() {
        let argv = vec![b"EXPIRE".to_vec(), b"k".to_vec(), b"10".to_vec()];
        let out = rewrite_for_aof(&argv, UnixTime::from_secs(1000));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0], b"EXPIREAT");
        assert_eq!(out[0][2], b"1010");
    }

    #[test]
    fn setex_splits_into_set_then_expireat() {
        let argv = vec![b"SETEX".to_vec(), b"k".to_vec(), b"5".to_vec(), b"v".to_vec()];
        let out = rewrite_for_aof(&argv, UnixTime::from_secs(1000));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        assert_eq!(out[1][0], b"EXPIREAT");
        assert_eq!(out[1][2], b"1005");
    }

    #[test]
    fn rewrite_emits_select_only_for_nonempty_dbs() {
        use vesper_kernel::object::{StringData, Value};
        let mut db0 = Database::new(DbIndex::new(0));
        db0.set(b"k".to_vec(), Value::string(StringData::from_bytes(b"v".to_vec())));
        let db1 = Database::new(DbIndex::new(1));
        let out = rewrite(&[db0, db1], UnixTime::ZERO);
        let text = String::from_utf8_lossy(&out);
        assert_eq!(text.matches("SELECT").count(), 1);
        assert!(text.contains("SET"));
    }
}
