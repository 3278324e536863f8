//! The command table and dispatcher (spec §4.5's execution sequence, steps
//! 2-4: arity check, lookup, invoke).
//!
//! `vesper-server` owns the rest of spec §4.5 (client buffering, ACL/auth
//! checks, OOM refusal, feeding AOF/replicas from the `dirty` delta); this
//! module only resolves a command name to its descriptor and runs the
//! matching handler against a [`Database`].

use vesper_types::UnixTime;

use crate::command::{HandlerContext, HandlerResult, Reply};
use crate::commands::{generic, hashes, lists, sets, sort, strings, zsets};
use crate::database::Database;
use crate::error::KernelError;

bitflags::bitflags! {
    /// Command flags (spec §4.5). `BULK`/`INLINE` describe which wire forms
    /// a command accepts; `vesper-wire` already normalizes both to the same
    /// argv, so these are metadata only, kept for `COMMAND`/`DEBUG` parity.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u8 {
        const BULK               = 0b0001;
        const INLINE              = 0b0010;
        const DENYOOM             = 0b0100;
        const FORCE_REPLICATION   = 0b1000;
    }
}

/// One row of the command table: name, arity, flags, and the key-range
/// triple `(first, last, step)` used by `COMMAND`/WATCH-key extraction
/// (spec §4.5). A negative arity means "at least `abs(arity)` including the
/// command name itself"; a positive arity means exact.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: i32,
    pub flags: CommandFlags,
    pub first_key: i32,
    pub last_key: i32,
    pub key_step: i32,
}

impl CommandSpec {
    const fn new(name: &'static str, arity: i32, flags: CommandFlags, first_key: i32, last_key: i32, key_step: i32) -> Self {
        Self { name, arity, flags, first_key, last_key, key_step }
    }

    fn arity_ok(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc as i32 == self.arity
        } else {
            argc as i32 >= -self.arity
        }
    }
}

const RW: CommandFlags = CommandFlags::BULK.union(CommandFlags::DENYOOM).union(CommandFlags::FORCE_REPLICATION);
const RO: CommandFlags = CommandFlags::BULK;

/// The static command table (spec §4.5). Held as a plain slice rather than
/// a `HashMap` since it's small, fixed, and linear scan is fast enough per
/// command dispatch.
pub static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec::new("DEL", -2, RW, 1, -1, 1),
    CommandSpec::new("EXISTS", -2, RO, 1, -1, 1),
    CommandSpec::new("TYPE", 2, RO, 1, 1, 1),
    CommandSpec::new("RENAME", 3, RW, 1, 2, 1),
    CommandSpec::new("RENAMENX", 3, RW, 1, 2, 1),
    CommandSpec::new("EXPIRE", 3, RW, 1, 1, 1),
    CommandSpec::new("EXPIREAT", 3, RW, 1, 1, 1),
    CommandSpec::new("TTL", 2, RO, 1, 1, 1),
    CommandSpec::new("PERSIST", 2, RW, 1, 1, 1),
    CommandSpec::new("KEYS", 2, RO, 0, 0, 0),
    CommandSpec::new("RANDOMKEY", 1, RO, 0, 0, 0),
    CommandSpec::new("DBSIZE", 1, RO, 0, 0, 0),
    CommandSpec::new("FLUSHDB", 1, CommandFlags::INLINE, 0, 0, 0),
    CommandSpec::new("GET", 2, RO, 1, 1, 1),
    CommandSpec::new("SET", 3, RW, 1, 1, 1),
    CommandSpec::new("SETNX", 3, RW, 1, 1, 1),
    CommandSpec::new("SETEX", 4, RW, 1, 1, 1),
    CommandSpec::new("GETSET", 3, RW, 1, 1, 1),
    CommandSpec::new("APPEND", 3, RW, 1, 1, 1),
    CommandSpec::new("STRLEN", 2, RO, 1, 1, 1),
    CommandSpec::new("INCR", 2, RW, 1, 1, 1),
    CommandSpec::new("DECR", 2, RW, 1, 1, 1),
    CommandSpec::new("INCRBY", 3, RW, 1, 1, 1),
    CommandSpec::new("DECRBY", 3, RW, 1, 1, 1),
    CommandSpec::new("INCRBYFLOAT", 3, RW, 1, 1, 1),
    CommandSpec::new("GETRANGE", 4, RO, 1, 1, 1),
    CommandSpec::new("SUBSTR", 4, RO, 1, 1, 1),
    CommandSpec::new("SETRANGE", 4, RW, 1, 1, 1),
    CommandSpec::new("LPUSH", -3, RW, 1, 1, 1),
    CommandSpec::new("RPUSH", -3, RW, 1, 1, 1),
    CommandSpec::new("LPOP", 2, RW, 1, 1, 1),
    CommandSpec::new("RPOP", 2, RW, 1, 1, 1),
    CommandSpec::new("LLEN", 2, RO, 1, 1, 1),
    CommandSpec::new("LRANGE", 4, RO, 1, 1, 1),
    CommandSpec::new("LINDEX", 3, RO, 1, 1, 1),
    CommandSpec::new("LSET", 4, RW, 1, 1, 1),
    CommandSpec::new("LTRIM", 4, RW, 1, 1, 1),
    CommandSpec::new("LREM", 4, RW, 1, 1, 1),
    CommandSpec::new("RPOPLPUSH", 3, RW, 1, 2, 1),
    CommandSpec::new("LINSERT", 5, RW, 1, 1, 1),
    CommandSpec::new("SADD", -3, RW, 1, 1, 1),
    CommandSpec::new("SREM", -3, RW, 1, 1, 1),
    CommandSpec::new("SCARD", 2, RO, 1, 1, 1),
    CommandSpec::new("SISMEMBER", 3, RO, 1, 1, 1),
    CommandSpec::new("SMEMBERS", 2, RO, 1, 1, 1),
    CommandSpec::new("SMOVE", 4, RW, 1, 2, 1),
    CommandSpec::new("SPOP", 2, RW, 1, 1, 1),
    CommandSpec::new("SRANDMEMBER", 2, RO, 1, 1, 1),
    CommandSpec::new("SINTER", -2, RO, 1, -1, 1),
    CommandSpec::new("SUNION", -2, RO, 1, -1, 1),
    CommandSpec::new("SDIFF", -2, RO, 1, -1, 1),
    CommandSpec::new("SINTERSTORE", -3, RW, 1, -1, 1),
    CommandSpec::new("SUNIONSTORE", -3, RW, 1, -1, 1),
    CommandSpec::new("SDIFFSTORE", -3, RW, 1, -1, 1),
    CommandSpec::new("ZADD", -4, RW, 1, 1, 1),
    CommandSpec::new("ZREM", -3, RW, 1, 1, 1),
    CommandSpec::new("ZSCORE", 3, RO, 1, 1, 1),
    CommandSpec::new("ZCARD", 2, RO, 1, 1, 1),
    CommandSpec::new("ZRANK", 3, RO, 1, 1, 1),
    CommandSpec::new("ZREVRANK", 3, RO, 1, 1, 1),
    CommandSpec::new("ZRANGE", -4, RO, 1, 1, 1),
    CommandSpec::new("ZREVRANGE", -4, RO, 1, 1, 1),
    CommandSpec::new("ZRANGEBYSCORE", -4, RO, 1, 1, 1),
    CommandSpec::new("ZINCRBY", 4, RW, 1, 1, 1),
    CommandSpec::new("ZREMRANGEBYRANK", 4, RW, 1, 1, 1),
    CommandSpec::new("ZREMRANGEBYSCORE", 4, RW, 1, 1, 1),
    CommandSpec::new("ZUNIONSTORE", -4, RW, 1, 1, 1),
    CommandSpec::new("ZINTERSTORE", -4, RW, 1, 1, 1),
    CommandSpec::new("HSET", 4, RW, 1, 1, 1),
    CommandSpec::new("HSETNX", 4, RW, 1, 1, 1),
    CommandSpec::new("HMSET", -4, RW, 1, 1, 1),
    CommandSpec::new("HGET", 3, RO, 1, 1, 1),
    CommandSpec::new("HMGET", -3, RO, 1, 1, 1),
    CommandSpec::new("HDEL", -3, RW, 1, 1, 1),
    CommandSpec::new("HEXISTS", 3, RO, 1, 1, 1),
    CommandSpec::new("HLEN", 2, RO, 1, 1, 1),
    CommandSpec::new("HKEYS", 2, RO, 1, 1, 1),
    CommandSpec::new("HVALS", 2, RO, 1, 1, 1),
    CommandSpec::new("HGETALL", 2, RO, 1, 1, 1),
    CommandSpec::new("HINCRBY", 4, RW, 1, 1, 1),
    CommandSpec::new("SORT", -2, RW, 1, 1, 1),
];

/// The command table, as exposed to callers needing to look up arity/flags
/// without going through a full dispatch (e.g. `COMMAND`, WATCH key
/// extraction in `vesper-server`).
pub struct CommandTable;

impl CommandTable {
    pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
        let upper = name.to_ascii_uppercase();
        COMMAND_TABLE.iter().find(|spec| spec.name == upper)
    }

    pub fn all() -> &'static [CommandSpec] {
        COMMAND_TABLE
    }
}

/// The result of running one command through the dispatcher: its reply,
/// how much the dataset's dirty counter advanced, and whether the command
/// is flagged to force replication even with `dirty == 0` (spec §4.5 step
/// 11, e.g. `SPOP` removing the last member).
pub struct ExecOutcome {
    pub reply: Reply,
    pub dirty: u64,
    pub force_replication: bool,
}

impl ExecOutcome {
    fn from_result(spec: &CommandSpec, result: HandlerResult) -> Self {
        Self {
            reply: result.reply,
            dirty: result.dirty,
            force_replication: spec.flags.contains(CommandFlags::FORCE_REPLICATION) && result.dirty > 0,
        }
    }
}

/// Resolves a command name to its handler and runs it (spec §4.5 steps
/// 2-4). The caller is responsible for everything before (parsing, auth)
/// and after (feeding AOF/replicas from `dirty`, sending `reply`).
pub struct Dispatcher;

impl Dispatcher {
    pub fn execute(argv: &[Vec<u8>], db: &mut Database, ctx: &HandlerContext) -> Result<ExecOutcome, KernelError> {
        let Some(name) = argv.first() else {
            return Err(KernelError::SyntaxError);
        };
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();
        let Some(spec) = CommandTable::lookup(&name) else {
            return Err(KernelError::UnknownCommand(name));
        };
        if !spec.arity_ok(argv.len()) {
            return Err(KernelError::wrong_arity(spec.name));
        }
        let now = ctx.now;
        let result = dispatch_one(spec.name, argv, db, now, ctx)?;
        Ok(ExecOutcome::from_result(spec, result))
    }
}

fn dispatch_one(
    name: &str,
    argv: &[Vec<u8>],
    db: &mut Database,
    now: UnixTime,
    ctx: &HandlerContext,
) -> Result<HandlerResult, KernelError> {
    match name {
        "DEL" => generic::del(db, argv, now),
        "EXISTS" => generic::exists(db, argv, now),
        "TYPE" => generic::r#type(db, argv, now),
        "RENAME" => generic::rename(db, argv, now),
        "RENAMENX" => generic::renamenx(db, argv, now),
        "EXPIRE" => generic::expire(db, argv, now),
        "EXPIREAT" => generic::expireat(db, argv, now),
        "TTL" => generic::ttl(db, argv, now),
        "PERSIST" => generic::persist(db, argv, now),
        "KEYS" => generic::keys(db, argv, now),
        "RANDOMKEY" => generic::randomkey(db, argv, now),
        "DBSIZE" => generic::dbsize(db, argv, now),
        "FLUSHDB" => generic::flushdb(db),
        "GET" => strings::get(db, argv, now),
        "SET" => strings::set(db, argv, now),
        "SETNX" => strings::setnx(db, argv, now),
        "SETEX" => strings::setex(db, argv, now),
        "GETSET" => strings::getset(db, argv, now),
        "APPEND" => strings::append(db, argv, now),
        "STRLEN" => strings::strlen(db, argv, now),
        "INCR" => strings::incr(db, argv, now),
        "DECR" => strings::decr(db, argv, now),
        "INCRBY" => strings::incrby(db, argv, now),
        "DECRBY" => strings::decrby(db, argv, now),
        "INCRBYFLOAT" => strings::incrbyfloat(db, argv, now),
        "GETRANGE" => strings::getrange(db, argv, now),
        "SUBSTR" => strings::getrange(db, argv, now),
        "SETRANGE" => strings::setrange(db, argv, now),
        "LPUSH" => lists::lpush(db, argv, now),
        "RPUSH" => lists::rpush(db, argv, now),
        "LPOP" => lists::lpop(db, argv, now),
        "RPOP" => lists::rpop(db, argv, now),
        "LLEN" => lists::llen(db, argv, now),
        "LRANGE" => lists::lrange(db, argv, now),
        "LINDEX" => lists::lindex(db, argv, now),
        "LSET" => lists::lset(db, argv, now),
        "LTRIM" => lists::ltrim(db, argv, now),
        "LREM" => lists::lrem(db, argv, now),
        "RPOPLPUSH" => lists::rpoplpush(db, argv, now),
        "LINSERT" => lists::linsert(db, argv, now),
        "SADD" => sets::sadd(db, argv, now),
        "SREM" => sets::srem(db, argv, now),
        "SCARD" => sets::scard(db, argv, now),
        "SISMEMBER" => sets::sismember(db, argv, now),
        "SMEMBERS" => sets::smembers(db, argv, now),
        "SMOVE" => sets::smove(db, argv, now),
        "SPOP" => sets::spop(db, argv, now),
        "SRANDMEMBER" => sets::srandmember(db, argv, now),
        "SINTER" => sets::sinter(db, argv, now),
        "SUNION" => sets::sunion(db, argv, now),
        "SDIFF" => sets::sdiff(db, argv, now),
        "SINTERSTORE" => sets::sinterstore(db, argv, now),
        "SUNIONSTORE" => sets::sunionstore(db, argv, now),
        "SDIFFSTORE" => sets::sdiffstore(db, argv, now),
        "ZADD" => zsets::zadd(db, argv, now),
        "ZREM" => zsets::zrem(db, argv, now),
        "ZSCORE" => zsets::zscore(db, argv, now),
        "ZCARD" => zsets::zcard(db, argv, now),
        "ZRANK" => zsets::zrank(db, argv, now),
        "ZREVRANK" => zsets::zrevrank(db, argv, now),
        "ZRANGE" => zsets::zrange(db, argv, now),
        "ZREVRANGE" => zsets::zrevrange(db, argv, now),
        "ZRANGEBYSCORE" => zsets::zrangebyscore(db, argv, now),
        "ZINCRBY" => zsets::zincrby(db, argv, now),
        "ZREMRANGEBYRANK" => zsets::zremrangebyrank(db, argv, now),
        "ZREMRANGEBYSCORE" => zsets::zremrangebyscore(db, argv, now),
        "ZUNIONSTORE" => zsets::zunionstore(db, argv, now),
        "ZINTERSTORE" => zsets::zinterstore(db, argv, now),
        "HSET" => hashes::hset(db, argv, ctx),
        "HSETNX" => hashes::hsetnx(db, argv, ctx),
        "HMSET" => hashes::hmset(db, argv, ctx),
        "HGET" => hashes::hget(db, argv, now),
        "HMGET" => hashes::hmget(db, argv, now),
        "HDEL" => hashes::hdel(db, argv, now),
        "HEXISTS" => hashes::hexists(db, argv, now),
        "HLEN" => hashes::hlen(db, argv, now),
        "HKEYS" => hashes::hkeys(db, argv, now),
        "HVALS" => hashes::hvals(db, argv, now),
        "HGETALL" => hashes::hgetall(db, argv, now),
        "HINCRBY" => hashes::hincrby(db, argv, ctx),
        "SORT" => sort::sort(db, argv, now),
        _ => Err(KernelError::UnknownCommand(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_types::DbIndex;

    fn db() -> Database {
        Database::new(DbIndex::new(0))
    }

    #[test]
    fn unknown_command_errors() {
        let mut d = db();
        let ctx = HandlerContext::default();
        let result = Dispatcher::execute(&[b"NOPE".to_vec()], &mut d, &ctx);
        assert!(matches!(result, Err(KernelError::UnknownCommand(_))));
    }

    #[test]
    fn wrong_arity_is_rejected_before_dispatch() {
        let mut d = db();
        let ctx = HandlerContext::default();
        let result = Dispatcher::execute(&[b"GET".to_vec()], &mut d, &ctx);
        assert!(matches!(result, Err(KernelError::WrongArity(_))));
    }

    #[test]
    fn set_then_get_round_trips_through_dispatch() {
        let mut d = db();
        let ctx = HandlerContext::default();
        Dispatcher::execute(&[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()], &mut d, &ctx).unwrap();
        let result = Dispatcher::execute(&[b"GET".to_vec(), b"k".to_vec()], &mut d, &ctx).unwrap();
        assert_eq!(result.reply, Reply::bulk(*b"v"));
        assert_eq!(result.dirty, 0);
    }
}
