//! Connection- and session-level command handling (spec §4.5's dispatch
//! pipeline, plus every command `vesper-kernel`'s `COMMAND_TABLE` doesn't
//! cover because it needs a socket, a client list, or cross-database
//! state): PING/ECHO/QUIT/AUTH/SELECT, MULTI/EXEC/DISCARD/WATCH/UNWATCH,
//! the pub/sub family, BLPOP/BRPOP, CONFIG/INFO/DEBUG, SLAVEOF/SYNC,
//! MONITOR, and FLUSHALL.
//!
//! `vesper-kernel` never sees a [`Token`] or a [`ClientSession`] — this
//! module is the only place those two worlds meet.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::Token;

use vesper_kernel::command::HandlerContext;
use vesper_kernel::dispatch::{CommandFlags, CommandSpec, CommandTable};
use vesper_kernel::{Database, Dispatcher, KernelError};
use vesper_persistence::{AofWriter, FsyncPolicy};
use vesper_replication::SyncAction;
use vesper_types::{ClientId, DbIndex, UnixTime};
use vesper_vm::VmEvent;
use vesper_wire::Reply;

use crate::connection::{BlockedOn, ClientFlags};
use crate::server::Server;

/// Entry point for every parsed request (spec §4.5). Arity/lookup/invoke
/// for data commands is [`vesper_kernel::Dispatcher::execute`]'s job;
/// everything around that — auth, MULTI queueing, pub/sub restriction,
/// AOF/replica/MONITOR feed, WATCH dirtying, blocked-client wakeup — is
/// this function's.
pub fn dispatch(server: &mut Server, token: Token, argv: Vec<Vec<u8>>) {
    let Some(name_bytes) = argv.first() else { return };
    let name = String::from_utf8_lossy(name_bytes).to_ascii_uppercase();
    let now = UnixTime::now();

    let Some(client_id) = server.clients.get(&token).map(|c| c.id) else { return };
    server.stat_total_commands += 1;

    if !server.monitors.is_empty() && name != "AUTH" {
        feed_monitors(server, server.clients.get(&token).map_or(DbIndex::new(0), |c| c.db), client_id, &argv);
    }

    // QUIT is allowed in every mode (spec §4.5 step 3).
    if name == "QUIT" {
        if let Some(client) = server.clients.get_mut(&token) {
            client.queue_wire_reply(&Reply::ok());
            client.flags.insert(ClientFlags::CLOSE_AFTER_REPLY);
        }
        return;
    }

    let (authenticated, in_pubsub_mode, in_multi) = {
        let Some(client) = server.clients.get(&token) else { return };
        (client.flags.contains(ClientFlags::AUTHENTICATED), client.is_subscribed(), client.flags.contains(ClientFlags::IN_MULTI))
    };

    if name == "AUTH" {
        handle_auth(server, token, &argv);
        return;
    }
    if !authenticated {
        reply_error(server, token, "NOAUTH Authentication required.");
        return;
    }

    if in_pubsub_mode && !matches!(name.as_str(), "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" | "PING") {
        reply_error(server, token, &format!("ERR {name} is not allowed in subscriber context"));
        return;
    }

    if in_multi && !matches!(name.as_str(), "EXEC" | "DISCARD" | "MULTI" | "WATCH") {
        if !known_command(&name, argv.len()) {
            if let Some(client) = server.clients.get_mut(&token) {
                client.flags.insert(ClientFlags::MULTI_DIRTY);
            }
            reply_error(server, token, &unknown_or_arity_message(&name, argv.len()));
            return;
        }
        if let Some(client) = server.clients.get_mut(&token) {
            client.multi_queue.push(argv);
            client.queue_wire_reply(&Reply::Status("QUEUED".to_string()));
        }
        return;
    }

    match name.as_str() {
        "MULTI" => handle_multi(server, token),
        "EXEC" => handle_exec(server, token, now),
        "DISCARD" => handle_discard(server, token),
        "WATCH" => handle_watch(server, token, &argv),
        "UNWATCH" => handle_unwatch(server, token),
        "PING" => handle_ping(server, token, &argv),
        "ECHO" => handle_echo(server, token, &argv),
        "SELECT" => handle_select(server, token, &argv),
        "SUBSCRIBE" => handle_subscribe(server, token, &argv),
        "UNSUBSCRIBE" => handle_unsubscribe(server, token, &argv),
        "PSUBSCRIBE" => handle_psubscribe(server, token, &argv),
        "PUNSUBSCRIBE" => handle_punsubscribe(server, token, &argv),
        "PUBLISH" => handle_publish(server, token, &argv, now),
        "PUBSUB" => handle_pubsub(server, token, &argv),
        "BLPOP" => handle_blocking_pop(server, token, &argv, false, now),
        "BRPOP" => handle_blocking_pop(server, token, &argv, true, now),
        "CONFIG" => handle_config(server, token, &argv),
        "INFO" => handle_info(server, token),
        "DEBUG" => handle_debug(server, token, &argv, now),
        "SLAVEOF" | "REPLICAOF" => handle_slaveof(server, token, &argv),
        "SYNC" => handle_sync(server, token),
        "MONITOR" => handle_monitor(server, token),
        "COMMAND" => handle_command_list(server, token),
        "FLUSHALL" => handle_flushall(server, token, now),
        "FLUSHDB" => handle_flushdb(server, token, now),
        _ => dispatch_table_command(server, token, &argv, now),
    }
}

// ---------------------------------------------------------------------
// Table-command path (everything in `vesper_kernel::dispatch::COMMAND_TABLE`)
// ---------------------------------------------------------------------

fn dispatch_table_command(server: &mut Server, token: Token, argv: &[Vec<u8>], now: UnixTime) {
    let db_idx = server.clients.get(&token).map_or(DbIndex::new(0), |c| c.db);

    if oom_gate(server, argv, now) {
        reply_error(server, token, &KernelError::OomRefusal.to_string());
        return;
    }

    if let Some(first_key) = preload_key_if_needed(server, token, db_idx, argv, now) {
        let _ = first_key;
        return; // client suspended on a VM swap-in; argv saved as pending_command
    }

    match execute_kernel(server, db_idx, argv, now) {
        Ok((reply, dirty, force_replication)) => {
            feed_write(server, db_idx, argv, dirty, force_replication, now);
            if dirty > 0 {
                wake_push_waiters(server, db_idx, argv, now);
            }
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&reply);
            }
        }
        Err(e) => reply_error(server, token, &e.to_string()),
    }
}

/// Checks whether the command's first key is currently swapped out (spec
/// §4.5 step 10, §4.9): if so, asks the VM engine to start loading it and,
/// if that means waiting on a worker thread, suspends the client. Returns
/// `Some(())` when the caller suspended and must not run the command now.
fn preload_key_if_needed(server: &mut Server, token: Token, db_idx: DbIndex, argv: &[Vec<u8>], now: UnixTime) -> Option<()> {
    let name = argv.first().map(|b| String::from_utf8_lossy(b).to_ascii_uppercase())?;
    let spec = CommandTable::lookup(&name)?;
    if spec.first_key == 0 {
        return None;
    }
    let key = argv.get(spec.first_key as usize)?;
    let vm = server.vm.as_ref()?;
    if !vm.is_swapped(db_idx, key) {
        vm.touch(db_idx, key, now);
        return None;
    }
    let idx = db_idx.as_u32() as usize;
    let db = server.databases.get_mut(idx)?;
    match vm.preload(db, db_idx, key, now) {
        Ok(true) => {
            db.add_io_waiter(key.clone(), server.clients.get(&token)?.id);
            if let Some(client) = server.clients.get_mut(&token) {
                client.flags.insert(ClientFlags::IO_WAIT);
                client.pending_command = Some(argv.to_vec());
            }
            Some(())
        }
        Ok(false) => {
            server.stat_vm_swap_ins += 1;
            None
        }
        Err(e) => {
            reply_error(server, token, &format!("ERR swap-in failed: {e}"));
            Some(())
        }
    }
}

/// Runs the maxmemory eviction cycle and reports whether `argv`'s command
/// must be refused for OOM (spec §4.5 step 7, §4.7). Shared by the direct
/// dispatch path and `handle_exec`'s per-command replay so no command run
/// inside MULTI/EXEC skips the DENYOOM gate.
fn oom_gate(server: &mut Server, argv: &[Vec<u8>], now: UnixTime) -> bool {
    free_memory_if_needed(server, now);
    if server.config.maxmemory == 0 || server.approx_memory <= server.config.maxmemory {
        return false;
    }
    let name = argv.first().map(|b| String::from_utf8_lossy(b).to_ascii_uppercase());
    name.as_deref().and_then(CommandTable::lookup).is_some_and(|spec| spec.flags.contains(CommandFlags::DENYOOM))
}

/// Runs one table command against the client's selected database and
/// marks any watchers of the keys it touched dirty-CAS (spec §4.11).
fn execute_kernel(server: &mut Server, db_idx: DbIndex, argv: &[Vec<u8>], now: UnixTime) -> Result<(Reply, u64, bool), KernelError> {
    let idx = db_idx.as_u32() as usize;
    let ctx = HandlerContext { now, hash_max_zipmap_entries: server.config.hash_max_zipmap_entries, hash_max_zipmap_value: server.config.hash_max_zipmap_value };
    let Some(db) = server.databases.get_mut(idx) else {
        return Err(KernelError::Other("DB index is out of range".to_string()));
    };
    let outcome = Dispatcher::execute(argv, db, &ctx)?;
    if outcome.dirty > 0 {
        mark_watchers_dirty(server, db_idx, argv);
    }
    Ok((to_wire(outcome.reply), outcome.dirty, outcome.force_replication))
}

fn to_wire(reply: vesper_kernel::command::Reply) -> Reply {
    match reply {
        vesper_kernel::command::Reply::Status(s) => Reply::Status(s),
        vesper_kernel::command::Reply::Integer(n) => Reply::Integer(n),
        vesper_kernel::command::Reply::Bulk(b) => Reply::Bulk(b),
        vesper_kernel::command::Reply::NilBulk => Reply::NilBulk,
        vesper_kernel::command::Reply::Multi(items) => Reply::Multi(items.into_iter().map(to_wire).collect()),
        vesper_kernel::command::Reply::NilMulti => Reply::NilMulti,
    }
}

/// Dirties every client WATCHing a key this command's static key range
/// (spec §4.5's `CommandSpec`) touched (spec §4.11).
fn mark_watchers_dirty(server: &mut Server, db_idx: DbIndex, argv: &[Vec<u8>]) {
    let Some(name) = argv.first() else { return };
    let upper = String::from_utf8_lossy(name).to_ascii_uppercase();
    let Some(spec) = CommandTable::lookup(&upper) else { return };
    for key in keys_touched(spec, argv) {
        let idx = db_idx.as_u32() as usize;
        let Some(db) = server.databases.get(idx) else { continue };
        for id in db.watchers_of(key) {
            if let Some(&tok) = server.tokens.get(&id) {
                if let Some(client) = server.clients.get_mut(&tok) {
                    client.flags.insert(ClientFlags::DIRTY_CAS);
                }
            }
        }
    }
}

fn keys_touched<'a>(spec: &CommandSpec, argv: &'a [Vec<u8>]) -> Vec<&'a [u8]> {
    if spec.first_key == 0 {
        return Vec::new();
    }
    let argc = argv.len() as i32;
    let last = if spec.last_key < 0 { argc + spec.last_key } else { spec.last_key };
    let step = spec.key_step.max(1);
    let mut out = Vec::new();
    let mut i = spec.first_key;
    while i <= last {
        if let Some(key) = argv.get(i as usize) {
            out.push(key.as_slice());
        }
        i += step;
    }
    out
}

/// `freeMemoryIfNeeded` (spec §4.7): while `used > max`, evict the
/// earliest-expiring key among a 3-key sample per database, propagating
/// the eviction as a `DEL` the same way an expiry would be. Gives up once
/// a round finds nothing left to sample — the DENYOOM gate in
/// [`dispatch_table_command`] is what ultimately refuses the command if
/// memory is still over budget afterwards.
fn free_memory_if_needed(server: &mut Server, now: UnixTime) {
    if server.config.maxmemory == 0 {
        return;
    }
    const MAX_ATTEMPTS: usize = 64;
    for _ in 0..MAX_ATTEMPTS {
        if server.approx_memory <= server.config.maxmemory {
            return;
        }
        let mut candidate: Option<(usize, Vec<u8>, UnixTime, u64)> = None;
        for (idx, db) in server.databases.iter().enumerate() {
            for (key, expire) in db.sample_volatile(3) {
                let size = db.peek(&key).map_or(0, |v| (vesper_vm::approx_size(v) + key.len()) as u64);
                let better = candidate.as_ref().is_none_or(|(_, _, best_expire, _)| expire < *best_expire);
                if better {
                    candidate = Some((idx, key, expire, size));
                }
            }
        }
        let Some((idx, key, _, size)) = candidate else {
            return; // nothing evictable left; command proceeds per spec §4.7
        };
        if let Some(db) = server.databases.get_mut(idx) {
            db.remove(&key);
        }
        server.approx_memory = server.approx_memory.saturating_sub(size);
        server.stat_evicted_keys += 1;
        let db_idx = DbIndex::new(idx as u32);
        feed_write(server, db_idx, &[b"DEL".to_vec(), key], 1, false, now);
    }
}

/// Feeds the AOF, replica set, and MONITORs from one already-applied
/// command (spec §4.5 step 11): only when it actually changed the dataset
/// or carries `FORCE_REPLICATION` (PUBLISH, for instance, replicates even
/// though it never touches a key).
fn feed_write(server: &mut Server, db_idx: DbIndex, argv: &[Vec<u8>], dirty: u64, force_replication: bool, now: UnixTime) {
    if dirty == 0 && !force_replication {
        return;
    }
    if let Some(aof) = &mut server.aof {
        let _ = aof.append(db_idx, argv, now);
    }
    let fed = server.replication.feed(db_idx, argv);
    for (id, bytes) in fed {
        if let Some(&tok) = server.tokens.get(&id) {
            if let Some(client) = server.clients.get_mut(&tok) {
                client.output.extend_from_slice(&bytes);
            }
        }
    }
    server.dirty_since_save += dirty;
}

fn feed_monitors(server: &mut Server, db_idx: DbIndex, source: ClientId, argv: &[Vec<u8>]) {
    if server.monitors.is_empty() {
        return;
    }
    let rendered: String = argv.iter().map(|a| format!(" \"{}\"", String::from_utf8_lossy(a))).collect();
    let line = format!("+{}.{:06} [{} {}]{}\r\n", UnixTime::now().as_secs(), 0, db_idx.as_u32(), source, rendered);
    let monitors: Vec<ClientId> = server.monitors.iter().copied().collect();
    for id in monitors {
        if let Some(&tok) = server.tokens.get(&id) {
            if let Some(client) = server.clients.get_mut(&tok) {
                client.queue_reply(line.as_bytes());
            }
        }
    }
}

/// Pops one waiting BLPOP/BRPOP client after a push grew the list at `key`
/// (spec §4.10): each push wakes at most one waiter, FIFO by arrival.
fn wake_push_waiters(server: &mut Server, db_idx: DbIndex, argv: &[Vec<u8>], now: UnixTime) {
    let Some(name) = argv.first() else { return };
    let upper = String::from_utf8_lossy(name).to_ascii_uppercase();
    if !matches!(upper.as_str(), "LPUSH" | "RPUSH" | "LPUSHX" | "RPUSHX" | "RPOPLPUSH" | "LINSERT") {
        return;
    }
    let Some(key) = argv.get(1) else { return };
    loop {
        let idx = db_idx.as_u32() as usize;
        let Some(db) = server.databases.get_mut(idx) else { return };
        let Some(waiter) = db.pop_blocking_waiter(key) else { return };
        let Some(&tok) = server.tokens.get(&waiter) else { continue };
        let from_right = server.clients.get(&tok).and_then(|c| c.blocked_on.as_ref()).is_some_and(|b| b.from_right);
        let pop_cmd = if from_right { b"RPOP".to_vec() } else { b"LPOP".to_vec() };
        match execute_kernel(server, db_idx, &[pop_cmd.clone(), key.clone()], now) {
            Ok((Reply::Bulk(value), dirty, force_replication)) => {
                feed_write(server, db_idx, &[pop_cmd, key.clone()], dirty, force_replication, now);
                if let Some(client) = server.clients.get_mut(&tok) {
                    client.blocked_on = None;
                    client.flags.remove(ClientFlags::BLOCKED);
                    client.queue_wire_reply(&Reply::Multi(vec![Reply::bulk(key.clone()), Reply::bulk(value)]));
                }
                return;
            }
            _ => continue, // list emptied again by a racing pop; try the next waiter
        }
    }
}

fn known_command(name: &str, argc: usize) -> bool {
    if let Some(spec) = CommandTable::lookup(name) {
        return spec.arity >= 0 && argc as i32 == spec.arity || spec.arity < 0 && argc as i32 >= -spec.arity;
    }
    connection_command_arity(name).is_some_and(|arity| if arity >= 0 { argc as i32 == arity } else { argc as i32 >= -arity })
}

fn unknown_or_arity_message(name: &str, argc: usize) -> String {
    if CommandTable::lookup(name).is_some() || connection_command_arity(name).is_some() {
        let _ = argc;
        format!("ERR wrong number of arguments for '{}' command", name.to_ascii_lowercase())
    } else {
        format!("ERR unknown command '{}'", name.to_ascii_lowercase())
    }
}

fn connection_command_arity(name: &str) -> Option<i32> {
    Some(match name {
        "PING" => -1,
        "ECHO" => 2,
        "QUIT" => 1,
        "AUTH" => 2,
        "SELECT" => 2,
        "MULTI" => 1,
        "EXEC" => 1,
        "DISCARD" => 1,
        "WATCH" => -2,
        "UNWATCH" => 1,
        "SUBSCRIBE" => -2,
        "UNSUBSCRIBE" => -1,
        "PSUBSCRIBE" => -2,
        "PUNSUBSCRIBE" => -1,
        "PUBLISH" => 3,
        "PUBSUB" => -2,
        "BLPOP" | "BRPOP" => -3,
        "CONFIG" => -2,
        "INFO" => -1,
        "DEBUG" => -2,
        "SLAVEOF" | "REPLICAOF" => 3,
        "SYNC" => 1,
        "MONITOR" => 1,
        "COMMAND" => -1,
        "FLUSHALL" => -1,
        _ => return None,
    })
}

fn reply_error(server: &mut Server, token: Token, message: &str) {
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::error(message));
    }
}

// ---------------------------------------------------------------------
// Connection-level commands
// ---------------------------------------------------------------------

fn handle_auth(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    if argv.len() != 2 {
        reply_error(server, token, "ERR wrong number of arguments for 'auth' command");
        return;
    }
    let Some(expected) = &server.config.requirepass else {
        reply_error(server, token, "ERR Client sent AUTH, but no password is set.");
        return;
    };
    if argv[1] == expected.as_bytes() {
        if let Some(client) = server.clients.get_mut(&token) {
            client.flags.insert(ClientFlags::AUTHENTICATED);
            client.queue_wire_reply(&Reply::ok());
        }
    } else {
        reply_error(server, token, "ERR invalid password");
    }
}

fn handle_ping(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    let reply = match argv.len() {
        1 => Reply::Status("PONG".to_string()),
        2 => Reply::bulk(argv[1].clone()),
        _ => Reply::error("ERR wrong number of arguments for 'ping' command"),
    };
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&reply);
    }
}

fn handle_echo(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    if argv.len() != 2 {
        reply_error(server, token, "ERR wrong number of arguments for 'echo' command");
        return;
    }
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::bulk(argv[1].clone()));
    }
}

fn handle_select(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    if argv.len() != 2 {
        reply_error(server, token, "ERR wrong number of arguments for 'select' command");
        return;
    }
    let Some(n) = std::str::from_utf8(&argv[1]).ok().and_then(|s| s.parse::<u32>().ok()) else {
        reply_error(server, token, "ERR value is not an integer or out of range");
        return;
    };
    if n as usize >= server.databases.len() {
        reply_error(server, token, "ERR DB index is out of range");
        return;
    }
    if let Some(client) = server.clients.get_mut(&token) {
        client.db = DbIndex::new(n);
        client.queue_wire_reply(&Reply::ok());
    }
}

fn handle_command_list(server: &mut Server, token: Token) {
    let items: Vec<Reply> = CommandTable::all().iter().map(|spec| Reply::Multi(vec![Reply::bulk(spec.name.to_ascii_lowercase()), Reply::Integer(i64::from(spec.arity))])).collect();
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::Multi(items));
    }
}

// ---------------------------------------------------------------------
// MULTI / EXEC / WATCH (spec §4.11)
// ---------------------------------------------------------------------

fn handle_multi(server: &mut Server, token: Token) {
    let Some(client) = server.clients.get_mut(&token) else { return };
    if client.flags.contains(ClientFlags::IN_MULTI) {
        client.queue_wire_reply(&Reply::error("ERR MULTI calls can not be nested"));
        return;
    }
    client.flags.insert(ClientFlags::IN_MULTI);
    client.multi_queue.clear();
    client.queue_wire_reply(&Reply::ok());
}

fn handle_discard(server: &mut Server, token: Token) {
    let Some(client) = server.clients.get_mut(&token) else { return };
    if !client.flags.contains(ClientFlags::IN_MULTI) {
        client.queue_wire_reply(&Reply::error("ERR DISCARD without MULTI"));
        return;
    }
    client.flags.remove(ClientFlags::IN_MULTI | ClientFlags::MULTI_DIRTY | ClientFlags::DIRTY_CAS);
    client.multi_queue.clear();
    let watched = std::mem::take(&mut client.watched);
    let id = client.id;
    unwatch_all(server, id, watched);
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::ok());
    }
}

fn handle_watch(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    if argv.len() < 2 {
        reply_error(server, token, "ERR wrong number of arguments for 'watch' command");
        return;
    }
    let Some(client) = server.clients.get_mut(&token) else { return };
    if client.flags.contains(ClientFlags::IN_MULTI) {
        client.queue_wire_reply(&Reply::error("ERR WATCH inside MULTI is not allowed"));
        return;
    }
    let db_idx = client.db;
    let id = client.id;
    for key in &argv[1..] {
        client.watched.push((db_idx, key.clone()));
    }
    let idx = db_idx.as_u32() as usize;
    if let Some(db) = server.databases.get_mut(idx) {
        for key in &argv[1..] {
            db.watch(key.clone(), id);
        }
    }
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::ok());
    }
}

fn handle_unwatch(server: &mut Server, token: Token) {
    let Some(client) = server.clients.get_mut(&token) else { return };
    let watched = std::mem::take(&mut client.watched);
    let id = client.id;
    client.flags.remove(ClientFlags::DIRTY_CAS);
    unwatch_all(server, id, watched);
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::ok());
    }
}

fn unwatch_all(server: &mut Server, id: ClientId, watched: Vec<(DbIndex, Vec<u8>)>) {
    for (db_idx, key) in watched {
        let idx = db_idx.as_u32() as usize;
        if let Some(db) = server.databases.get_mut(idx) {
            db.unwatch_all(id, std::slice::from_ref(&key));
        }
    }
}

fn handle_exec(server: &mut Server, token: Token, now: UnixTime) {
    let Some(client) = server.clients.get_mut(&token) else { return };
    if !client.flags.contains(ClientFlags::IN_MULTI) {
        client.queue_wire_reply(&Reply::error("ERR EXEC without MULTI"));
        return;
    }
    let multi_dirty = client.flags.contains(ClientFlags::MULTI_DIRTY);
    let dirty_cas = client.flags.contains(ClientFlags::DIRTY_CAS);
    let queue = std::mem::take(&mut client.multi_queue);
    let watched = std::mem::take(&mut client.watched);
    let db_idx = client.db;
    let id = client.id;
    client.flags.remove(ClientFlags::IN_MULTI | ClientFlags::MULTI_DIRTY | ClientFlags::DIRTY_CAS);
    unwatch_all(server, id, watched);

    if multi_dirty {
        reply_error(server, token, "EXECABORT Transaction discarded because of previous errors.");
        return;
    }
    if dirty_cas {
        if let Some(client) = server.clients.get_mut(&token) {
            client.queue_wire_reply(&Reply::NilMulti);
        }
        return;
    }

    let mut replies = Vec::with_capacity(queue.len());
    let mut total_dirty = 0u64;
    for argv in &queue {
        // FLUSHDB/FLUSHALL aren't in the kernel's command table (spec
        // §4.3/§4.11's watcher-dirtying needs the server's client list,
        // which the kernel crate never sees) — queuing one inside a
        // transaction must still flush and dirty watchers correctly at
        // EXEC time, not just on the direct-dispatch path.
        let name = argv.first().map(|b| String::from_utf8_lossy(b).to_ascii_uppercase());
        let outcome = match name.as_deref() {
            Some("FLUSHDB") => {
                let idx = db_idx.as_u32() as usize;
                let watchers = server.databases.get_mut(idx).map(Database::flush).unwrap_or_default();
                Ok((Reply::ok(), 1u64, watchers))
            }
            Some("FLUSHALL") => {
                let mut watchers = Vec::new();
                for db in &mut server.databases {
                    watchers.extend(db.flush());
                }
                Ok((Reply::ok(), 1u64, watchers))
            }
            _ if oom_gate(server, argv, now) => Err(KernelError::OomRefusal),
            _ => execute_kernel(server, db_idx, argv, now).map(|(r, d, _)| (r, d, Vec::new())),
        };
        match outcome {
            Ok((reply, dirty, extra_watchers)) => {
                total_dirty += dirty;
                if dirty > 0 {
                    wake_push_waiters(server, db_idx, argv, now);
                }
                for watcher in extra_watchers {
                    if let Some(&tok) = server.tokens.get(&watcher) {
                        if let Some(client) = server.clients.get_mut(&tok) {
                            client.flags.insert(ClientFlags::DIRTY_CAS);
                        }
                    }
                }
                replies.push(reply);
            }
            Err(e) => replies.push(Reply::error(e.to_string())),
        }
    }

    if !queue.is_empty() {
        if let Some(aof) = &mut server.aof {
            let _ = aof.append_transaction(db_idx, &queue, now);
        }
        if total_dirty > 0 {
            let _ = server.replication.feed(db_idx, &[b"MULTI".to_vec()]);
            for argv in &queue {
                let fed = server.replication.feed(db_idx, argv);
                for (rid, bytes) in fed {
                    if let Some(&tok) = server.tokens.get(&rid) {
                        if let Some(client) = server.clients.get_mut(&tok) {
                            client.output.extend_from_slice(&bytes);
                        }
                    }
                }
            }
            let fed = server.replication.feed(db_idx, &[b"EXEC".to_vec()]);
            for (rid, bytes) in fed {
                if let Some(&tok) = server.tokens.get(&rid) {
                    if let Some(client) = server.clients.get_mut(&tok) {
                        client.output.extend_from_slice(&bytes);
                    }
                }
            }
            server.dirty_since_save += total_dirty;
        }
    }

    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::Multi(replies));
    }
}

// ---------------------------------------------------------------------
// Pub/Sub (spec §4.10)
// ---------------------------------------------------------------------

fn handle_subscribe(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    if argv.len() < 2 {
        reply_error(server, token, "ERR wrong number of arguments for 'subscribe' command");
        return;
    }
    let Some(id) = server.clients.get(&token).map(|c| c.id) else { return };
    for channel in &argv[1..] {
        server.pubsub.subscribe(channel.clone(), id);
        let count = {
            let Some(client) = server.clients.get_mut(&token) else { return };
            client.channels.insert(channel.clone());
            client.subscription_count()
        };
        if let Some(client) = server.clients.get_mut(&token) {
            client.queue_wire_reply(&Reply::Multi(vec![Reply::bulk(b"subscribe".to_vec()), Reply::bulk(channel.clone()), Reply::Integer(count as i64)]));
        }
    }
}

fn handle_unsubscribe(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    let Some(id) = server.clients.get(&token).map(|c| c.id) else { return };
    let channels: Vec<Vec<u8>> =
        if argv.len() > 1 { argv[1..].to_vec() } else { server.clients.get(&token).map(|c| c.channels.iter().cloned().collect()).unwrap_or_default() };
    if channels.is_empty() {
        let count = server.clients.get(&token).map_or(0, ClientSessionExt::subscription_count_ref);
        if let Some(client) = server.clients.get_mut(&token) {
            client.queue_wire_reply(&Reply::Multi(vec![Reply::bulk(b"unsubscribe".to_vec()), Reply::NilBulk, Reply::Integer(count as i64)]));
        }
        return;
    }
    for channel in channels {
        server.pubsub.unsubscribe(&channel, id);
        let count = {
            let Some(client) = server.clients.get_mut(&token) else { return };
            client.channels.remove(&channel);
            client.subscription_count()
        };
        if let Some(client) = server.clients.get_mut(&token) {
            client.queue_wire_reply(&Reply::Multi(vec![Reply::bulk(b"unsubscribe".to_vec()), Reply::bulk(channel), Reply::Integer(count as i64)]));
        }
    }
}

fn handle_psubscribe(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    if argv.len() < 2 {
        reply_error(server, token, "ERR wrong number of arguments for 'psubscribe' command");
        return;
    }
    let Some(id) = server.clients.get(&token).map(|c| c.id) else { return };
    for pattern in &argv[1..] {
        server.pubsub.psubscribe(pattern.clone(), id);
        let count = {
            let Some(client) = server.clients.get_mut(&token) else { return };
            client.patterns.insert(pattern.clone());
            client.subscription_count()
        };
        if let Some(client) = server.clients.get_mut(&token) {
            client.queue_wire_reply(&Reply::Multi(vec![Reply::bulk(b"psubscribe".to_vec()), Reply::bulk(pattern.clone()), Reply::Integer(count as i64)]));
        }
    }
}

fn handle_punsubscribe(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    let Some(id) = server.clients.get(&token).map(|c| c.id) else { return };
    let patterns: Vec<Vec<u8>> =
        if argv.len() > 1 { argv[1..].to_vec() } else { server.clients.get(&token).map(|c| c.patterns.iter().cloned().collect()).unwrap_or_default() };
    if patterns.is_empty() {
        let count = server.clients.get(&token).map_or(0, ClientSessionExt::subscription_count_ref);
        if let Some(client) = server.clients.get_mut(&token) {
            client.queue_wire_reply(&Reply::Multi(vec![Reply::bulk(b"punsubscribe".to_vec()), Reply::NilBulk, Reply::Integer(count as i64)]));
        }
        return;
    }
    for pattern in patterns {
        server.pubsub.punsubscribe(&pattern, id);
        let count = {
            let Some(client) = server.clients.get_mut(&token) else { return };
            client.patterns.remove(&pattern);
            client.subscription_count()
        };
        if let Some(client) = server.clients.get_mut(&token) {
            client.queue_wire_reply(&Reply::Multi(vec![Reply::bulk(b"punsubscribe".to_vec()), Reply::bulk(pattern), Reply::Integer(count as i64)]));
        }
    }
}

/// Trivial accessor shim so the no-channels branch above can read
/// `subscription_count` through an `Option::map_or` without borrowing
/// `server.clients` twice.
trait ClientSessionExt {
    fn subscription_count_ref(&self) -> usize;
}
impl ClientSessionExt for crate::connection::ClientSession {
    fn subscription_count_ref(&self) -> usize {
        self.subscription_count()
    }
}

fn handle_publish(server: &mut Server, token: Token, argv: &[Vec<u8>], now: UnixTime) {
    if argv.len() != 3 {
        reply_error(server, token, "ERR wrong number of arguments for 'publish' command");
        return;
    }
    let channel = &argv[1];
    let payload = &argv[2];
    let receivers = server.pubsub.receivers(channel);
    for (id, pattern) in &receivers {
        let Some(&tok) = server.tokens.get(id) else { continue };
        let reply = match pattern {
            Some(p) => Reply::Multi(vec![Reply::bulk(b"pmessage".to_vec()), Reply::bulk(p.clone()), Reply::bulk(channel.clone()), Reply::bulk(payload.clone())]),
            None => Reply::Multi(vec![Reply::bulk(b"message".to_vec()), Reply::bulk(channel.clone()), Reply::bulk(payload.clone())]),
        };
        if let Some(client) = server.clients.get_mut(&tok) {
            client.queue_wire_reply(&reply);
        }
    }
    let db_idx = server.clients.get(&token).map_or(DbIndex::new(0), |c| c.db);
    feed_write(server, db_idx, argv, 0, true, now);
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::Integer(receivers.len() as i64));
    }
}

fn handle_pubsub(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    let Some(sub) = argv.get(1).map(|b| String::from_utf8_lossy(b).to_ascii_uppercase()) else {
        reply_error(server, token, "ERR wrong number of arguments for 'pubsub' command");
        return;
    };
    let reply = match sub.as_str() {
        "CHANNELS" => {
            let pattern = argv.get(2).map(Vec::as_slice);
            Reply::Multi(server.pubsub.channels_matching(pattern).into_iter().map(Reply::bulk).collect())
        }
        "NUMSUB" => {
            let mut items = Vec::new();
            for channel in &argv[2..] {
                items.push(Reply::bulk(channel.clone()));
                items.push(Reply::Integer(server.pubsub.subscriber_count(channel) as i64));
            }
            Reply::Multi(items)
        }
        "NUMPAT" => Reply::Integer(server.pubsub.pattern_count() as i64),
        _ => Reply::error("ERR unknown PUBSUB subcommand"),
    };
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&reply);
    }
}

// ---------------------------------------------------------------------
// BLPOP / BRPOP (spec §4.10)
// ---------------------------------------------------------------------

fn handle_blocking_pop(server: &mut Server, token: Token, argv: &[Vec<u8>], from_right: bool, now: UnixTime) {
    if argv.len() < 3 {
        reply_error(server, token, &format!("ERR wrong number of arguments for '{}' command", if from_right { "brpop" } else { "blpop" }));
        return;
    }
    let Some(timeout_secs) = std::str::from_utf8(&argv[argv.len() - 1]).ok().and_then(|s| s.parse::<f64>().ok()).filter(|t| *t >= 0.0) else {
        reply_error(server, token, "ERR timeout is not a float or out of range");
        return;
    };
    let keys = &argv[1..argv.len() - 1];
    let db_idx = server.clients.get(&token).map_or(DbIndex::new(0), |c| c.db);
    let pop_name = if from_right { b"RPOP".to_vec() } else { b"LPOP".to_vec() };

    for key in keys {
        match execute_kernel(server, db_idx, &[pop_name.clone(), key.clone()], now) {
            Ok((Reply::Bulk(value), dirty, force_replication)) => {
                feed_write(server, db_idx, &[pop_name, key.clone()], dirty, force_replication, now);
                if let Some(client) = server.clients.get_mut(&token) {
                    client.queue_wire_reply(&Reply::Multi(vec![Reply::bulk(key.clone()), Reply::bulk(value)]));
                }
                return;
            }
            Ok(_) => continue,
            Err(_) => continue,
        }
    }

    let id = server.clients.get(&token).map_or(return, |c| c.id);
    let idx = db_idx.as_u32() as usize;
    for key in keys {
        if let Some(db) = server.databases.get_mut(idx) {
            db.add_blocking_waiter(key.clone(), id);
        }
    }
    let deadline = (timeout_secs > 0.0).then(|| Instant::now() + Duration::from_secs_f64(timeout_secs));
    if let Some(client) = server.clients.get_mut(&token) {
        client.flags.insert(ClientFlags::BLOCKED);
        client.blocked_on = Some(BlockedOn { keys: keys.to_vec(), deadline, from_right });
    }
}

/// Called from [`crate::server::Server::cron`] for every client whose
/// BLPOP/BRPOP deadline has passed (spec §5's cancellation rules).
pub fn timeout_blocked_client(server: &mut Server, token: Token) {
    let Some(client) = server.clients.get_mut(&token) else { return };
    let Some(blocked) = client.blocked_on.take() else { return };
    client.flags.remove(ClientFlags::BLOCKED);
    let id = client.id;
    let db_idx = client.db;
    let idx = db_idx.as_u32() as usize;
    if let Some(db) = server.databases.get_mut(idx) {
        for key in &blocked.keys {
            db.remove_blocking_waiter(key, id);
        }
    }
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::NilMulti);
    }
}

// ---------------------------------------------------------------------
// VM swap-in completion (spec §4.9)
// ---------------------------------------------------------------------

/// Applies every [`VmEvent`] drained this tick: installs loaded values back
/// into their database and replays any client command that was suspended
/// waiting on one (spec §4.9's swap-in path).
pub fn apply_vm_events(server: &mut Server, events: Vec<VmEvent>) {
    for event in events {
        match event {
            VmEvent::ValueLoaded { db, key, value } => {
                server.stat_vm_swap_ins += 1;
                let idx = db.as_u32() as usize;
                let waiters = if let Some(database) = server.databases.get_mut(idx) {
                    database.set(key.clone(), value);
                    database.take_io_waiters(&key)
                } else {
                    Vec::new()
                };
                let now = UnixTime::now();
                for waiter in waiters {
                    let Some(&tok) = server.tokens.get(&waiter) else { continue };
                    let pending = server.clients.get_mut(&tok).and_then(|c| {
                        c.flags.remove(ClientFlags::IO_WAIT);
                        c.pending_command.take()
                    });
                    if let Some(argv) = pending {
                        dispatch_table_command(server, tok, &argv, now);
                    }
                }
            }
            VmEvent::SwapOutCompleted { .. } => {}
            VmEvent::SwapOutFailed { key, reason, .. } | VmEvent::SwapInFailed { key, reason, .. } => {
                tracing::warn!(key = %String::from_utf8_lossy(&key), %reason, "VM operation failed");
            }
            VmEvent::SwapCanceled { .. } => {}
        }
    }
}

// ---------------------------------------------------------------------
// BGSAVE completion (spec §4.6/§4.8)
// ---------------------------------------------------------------------

/// Applies the result of a background save (spec §4.6's BGSAVE, §4.8's
/// full-resync path): updates `last_save`/`dirty_since_save` on success,
/// then ships the just-written RDB file plus any buffered writes to every
/// replica that was waiting on this snapshot.
pub fn apply_bgsave_result(server: &mut Server, outcome: Result<(), String>) {
    match outcome {
        Ok(()) => {
            server.last_save = UnixTime::now();
            server.dirty_since_save = 0;
            tracing::info!("background save finished");
        }
        Err(e) => {
            tracing::warn!(error = %e, "background save failed");
        }
    }

    let ready = server.replication.on_bgsave_complete();
    if ready.is_empty() {
        return;
    }
    let path = server.config.dir.join(&server.config.dbfilename);
    let bytes = match server.io_backend.read_all(&path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read RDB snapshot for replica sync");
            return;
        }
    };
    for id in ready {
        let buffered = server.replication.take_buffered(id);
        if let Some(&tok) = server.tokens.get(&id) {
            if let Some(client) = server.clients.get_mut(&tok) {
                client.output.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
                client.output.extend_from_slice(&bytes);
                client.output.extend_from_slice(&buffered);
                client.flags.insert(ClientFlags::SLAVE);
            }
        }
        server.replication.mark_online(id);
    }
}

// ---------------------------------------------------------------------
// Replication (spec §4.8)
// ---------------------------------------------------------------------

fn handle_sync(server: &mut Server, token: Token) {
    let Some(id) = server.clients.get(&token).map(|c| c.id) else { return };
    if let Some(client) = server.clients.get_mut(&token) {
        client.flags.insert(ClientFlags::SLAVE);
    }
    match server.replication.on_sync(id) {
        SyncAction::StartBgsave => {
            server.replication.mark_bgsave_in_progress();
            server.spawn_bgsave();
        }
        SyncAction::JoinInFlightBgsave => {}
    }
}

fn handle_slaveof(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    if argv.len() != 3 {
        reply_error(server, token, "ERR wrong number of arguments for 'slaveof' command");
        return;
    }
    let host = String::from_utf8_lossy(&argv[1]).to_string();
    let port_arg = String::from_utf8_lossy(&argv[2]).to_string();
    if host.eq_ignore_ascii_case("no") && port_arg.eq_ignore_ascii_case("one") {
        server.config.slaveof = None;
        server.replica_link = None;
        server.replica_socket_token = None;
        if let Some(client) = server.clients.get_mut(&token) {
            client.queue_wire_reply(&Reply::ok());
        }
        return;
    }
    let Ok(port) = port_arg.parse::<u16>() else {
        reply_error(server, token, "ERR invalid master port");
        return;
    };
    server.config.slaveof = Some((host.clone(), port));
    match server.start_replica_link(host, port) {
        Ok(()) => {
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&Reply::ok());
            }
        }
        Err(e) => reply_error(server, token, &format!("ERR {e}")),
    }
}

fn handle_monitor(server: &mut Server, token: Token) {
    let Some(client) = server.clients.get_mut(&token) else { return };
    client.flags.insert(ClientFlags::MONITOR);
    let id = client.id;
    server.monitors.insert(id);
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::ok());
    }
}

// ---------------------------------------------------------------------
// FLUSHALL (spec §4.11's watcher-dirtying rule applies here too)
// ---------------------------------------------------------------------

fn handle_flushall(server: &mut Server, token: Token, now: UnixTime) {
    let mut watchers = Vec::new();
    for db in &mut server.databases {
        watchers.extend(db.flush());
    }
    for id in watchers {
        if let Some(&tok) = server.tokens.get(&id) {
            if let Some(client) = server.clients.get_mut(&tok) {
                client.flags.insert(ClientFlags::DIRTY_CAS);
            }
        }
    }
    feed_write(server, DbIndex::new(0), &[b"FLUSHALL".to_vec()], 1, false, now);
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::ok());
    }
}

/// `FLUSHDB` (spec §4.3/§4.11): clears only the caller's selected
/// database, but — like `FLUSHALL` — dirties every client watching any
/// key that database held, not just the ones the table-dispatch path's
/// static key-range would catch (`FLUSHDB` has no key arguments).
fn handle_flushdb(server: &mut Server, token: Token, now: UnixTime) {
    let db_idx = server.clients.get(&token).map_or(DbIndex::new(0), |c| c.db);
    let idx = db_idx.as_u32() as usize;
    let watchers = server.databases.get_mut(idx).map(Database::flush).unwrap_or_default();
    for id in watchers {
        if let Some(&tok) = server.tokens.get(&id) {
            if let Some(client) = server.clients.get_mut(&tok) {
                client.flags.insert(ClientFlags::DIRTY_CAS);
            }
        }
    }
    feed_write(server, db_idx, &[b"FLUSHDB".to_vec()], 1, false, now);
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::ok());
    }
}

// ---------------------------------------------------------------------
// CONFIG / INFO / DEBUG (spec §4.13)
// ---------------------------------------------------------------------

fn handle_config(server: &mut Server, token: Token, argv: &[Vec<u8>]) {
    let Some(sub) = argv.get(1).map(|b| String::from_utf8_lossy(b).to_ascii_uppercase()) else {
        reply_error(server, token, "ERR wrong number of arguments for 'config' command");
        return;
    };
    match sub.as_str() {
        "GET" if argv.len() == 3 => {
            let pattern = String::from_utf8_lossy(&argv[2]).to_string();
            let entries = server.config.get(&pattern);
            let mut items = Vec::with_capacity(entries.len() * 2);
            for (name, value) in entries {
                items.push(Reply::bulk(name.into_bytes()));
                items.push(Reply::bulk(value.into_bytes()));
            }
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&Reply::Multi(items));
            }
        }
        "SET" if argv.len() == 4 => {
            let name = String::from_utf8_lossy(&argv[2]).to_ascii_lowercase();
            let value = String::from_utf8_lossy(&argv[3]).to_string();
            match server.config.set(&name, &value) {
                Ok(()) => {
                    if name == "appendonly" {
                        apply_appendonly_toggle(server);
                    }
                    if let Some(client) = server.clients.get_mut(&token) {
                        client.queue_wire_reply(&Reply::ok());
                    }
                }
                Err(e) => reply_error(server, token, &format!("ERR {e}")),
            }
        }
        _ => reply_error(server, token, "ERR syntax error"),
    }
}

/// `CONFIG SET appendonly yes/no` (spec §4.13, §4.6): turning the AOF on
/// writes a fresh rewrite-minimal file and opens it immediately (the
/// `BGREWRITEAOF` a real toggle would trigger); turning it off drains and
/// closes the current writer.
fn apply_appendonly_toggle(server: &mut Server) {
    if server.config.appendonly {
        if server.aof.is_none() {
            let path = server.config.dir.join(&server.config.appendfilename);
            let bytes = vesper_persistence::rewrite(&server.databases, UnixTime::now());
            if server.io_backend.write_all(&path, &bytes).is_ok() {
                if let Ok(writer) = AofWriter::open(Arc::clone(&server.io_backend), &path, fsync_policy(server.config.appendfsync)) {
                    server.aof = Some(writer);
                }
            }
        }
    } else if let Some(aof) = server.aof.take() {
        let _ = aof.close();
    }
}

fn fsync_policy(policy: vesper_config::AppendFsync) -> FsyncPolicy {
    match policy {
        vesper_config::AppendFsync::No => FsyncPolicy::No,
        vesper_config::AppendFsync::EverySec => FsyncPolicy::EverySec,
        vesper_config::AppendFsync::Always => FsyncPolicy::Always,
    }
}

fn handle_info(server: &mut Server, token: Token) {
    let info = build_info(server);
    if let Some(client) = server.clients.get_mut(&token) {
        client.queue_wire_reply(&Reply::bulk(info.into_bytes()));
    }
}

fn build_info(server: &Server) -> String {
    let now = UnixTime::now();
    let uptime = (now.as_secs() - server.start_time.as_secs()).max(0);
    let mut s = String::new();
    s.push_str("# Server\r\n");
    s.push_str(&format!("vesper_version:{}\r\n", env!("CARGO_PKG_VERSION")));
    s.push_str("arch_bits:64\r\n");
    s.push_str(&format!("process_id:{}\r\n", std::process::id()));
    s.push_str(&format!("uptime_in_seconds:{uptime}\r\n"));
    s.push_str(&format!("tcp_port:{}\r\n", server.config.port));
    s.push_str("\r\n# Clients\r\n");
    s.push_str(&format!("connected_clients:{}\r\n", server.clients.len()));
    s.push_str(&format!("blocked_clients:{}\r\n", server.clients.values().filter(|c| c.blocked_on.is_some()).count()));
    s.push_str("\r\n# Memory\r\n");
    s.push_str(&format!("used_memory:{}\r\n", server.approx_memory));
    s.push_str(&format!("used_memory_human:{:.2}K\r\n", server.approx_memory as f64 / 1024.0));
    s.push_str(&format!("maxmemory:{}\r\n", server.config.maxmemory));
    s.push_str("\r\n# Stats\r\n");
    s.push_str(&format!("total_connections_received:{}\r\n", server.stat_total_connections));
    s.push_str(&format!("total_commands_processed:{}\r\n", server.stat_total_commands));
    s.push_str(&format!("expired_keys:{}\r\n", server.stat_expired_keys));
    s.push_str(&format!("evicted_keys:{}\r\n", server.stat_evicted_keys));
    s.push_str("\r\n# Persistence\r\n");
    s.push_str(&format!("rdb_changes_since_last_save:{}\r\n", server.dirty_since_save));
    s.push_str(&format!("rdb_bgsave_in_progress:{}\r\n", u8::from(server.bgsave_in_progress.load(Ordering::SeqCst))));
    s.push_str(&format!("rdb_last_save_time:{}\r\n", server.last_save.as_secs()));
    s.push_str(&format!("aof_enabled:{}\r\n", u8::from(server.aof.is_some())));
    s.push_str("\r\n# Replication\r\n");
    s.push_str(&format!("role:{}\r\n", if server.replica_link.is_some() { "slave" } else { "master" }));
    s.push_str(&format!("connected_slaves:{}\r\n", server.replication.online_count()));
    s.push_str("\r\n# VM\r\n");
    s.push_str(&format!("vm_enabled:{}\r\n", u8::from(server.vm.as_ref().is_some_and(vesper_vm::VmEngine::is_enabled))));
    s.push_str(&format!("vm_stats_swapped_objects:{}\r\n", server.stat_vm_swap_outs.saturating_sub(server.stat_vm_swap_ins)));
    s.push_str(&format!("vm_stats_swap_in_count:{}\r\n", server.stat_vm_swap_ins));
    s.push_str(&format!("vm_stats_swap_out_count:{}\r\n", server.stat_vm_swap_outs));
    s.push_str("\r\n# Keyspace\r\n");
    for (i, db) in server.databases.iter().enumerate() {
        if db.len() > 0 {
            s.push_str(&format!("db{i}:keys={},expires={}\r\n", db.len(), db.expires_len()));
        }
    }
    s
}

fn handle_debug(server: &mut Server, token: Token, argv: &[Vec<u8>], now: UnixTime) {
    let Some(sub) = argv.get(1).map(|b| String::from_utf8_lossy(b).to_ascii_uppercase()) else {
        reply_error(server, token, "ERR wrong number of arguments for 'debug' command");
        return;
    };
    match sub.as_str() {
        "DIGEST" => {
            let digest = vesper_kernel::digest::digest_all(server.databases.iter(), now);
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&Reply::Status(digest.to_hex()));
            }
        }
        "OBJECT" if argv.len() == 3 => {
            let db_idx = server.clients.get(&token).map_or(DbIndex::new(0), |c| c.db);
            let idx = db_idx.as_u32() as usize;
            let key = &argv[2];
            let found = server.databases.get_mut(idx).and_then(|db| db.lookup_read(key, now));
            let reply = match found {
                Some(value) => {
                    let mut bytes = Vec::new();
                    vesper_persistence::rdb::encode_value_body(value, server.config.rdbcompression, &mut bytes);
                    Reply::Status(format!(
                        "Value at:0x0 refcount:{} encoding:{} serializedlength:{} type:{}",
                        value.refcount,
                        value.encoding(),
                        bytes.len(),
                        value.value_type(),
                    ))
                }
                None => Reply::error("ERR no such key"),
            };
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&reply);
            }
        }
        "SWAPOUT" if argv.len() == 3 => {
            let db_idx = server.clients.get(&token).map_or(DbIndex::new(0), |c| c.db);
            let idx = db_idx.as_u32() as usize;
            let key = &argv[2];
            let reply = match (&server.vm, server.databases.get_mut(idx)) {
                (Some(vm), Some(db)) => match vm.swap_out_blocking(db, db_idx, now) {
                    Ok(Some(evicted)) if &evicted == key => Reply::ok(),
                    Ok(_) => Reply::error("ERR key not swapped out"),
                    Err(e) => Reply::error(format!("ERR {e}")),
                },
                _ => Reply::error("ERR virtual memory is not enabled"),
            };
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&reply);
            }
        }
        "SWAPIN" if argv.len() == 3 => {
            let db_idx = server.clients.get(&token).map_or(DbIndex::new(0), |c| c.db);
            let idx = db_idx.as_u32() as usize;
            let key = argv[2].clone();
            let reply = match (&server.vm, server.databases.get_mut(idx)) {
                (Some(vm), Some(db)) => match vm.preload(db, db_idx, &key, now) {
                    Ok(_) => Reply::ok(),
                    Err(e) => Reply::error(format!("ERR {e}")),
                },
                _ => Reply::error("ERR virtual memory is not enabled"),
            };
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&reply);
            }
        }
        "RELOAD" => {
            let reply = match server.save_rdb() {
                Ok(()) => {
                    for db in &mut server.databases {
                        db.flush();
                    }
                    match server.load_dataset() {
                        Ok(()) => Reply::ok(),
                        Err(e) => Reply::error(format!("ERR {e}")),
                    }
                }
                Err(e) => Reply::error(format!("ERR {e}")),
            };
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&reply);
            }
        }
        "LOADAOF" => {
            for db in &mut server.databases {
                db.flush();
            }
            let reply = match server.load_dataset() {
                Ok(()) => Reply::ok(),
                Err(e) => Reply::error(format!("ERR {e}")),
            };
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&reply);
            }
        }
        "POPULATE" if argv.len() >= 3 => {
            let db_idx = server.clients.get(&token).map_or(DbIndex::new(0), |c| c.db);
            let idx = db_idx.as_u32() as usize;
            let Ok(count) = String::from_utf8_lossy(&argv[2]).parse::<u64>() else {
                reply_error(server, token, "ERR value is not an integer or out of range");
                return;
            };
            if let Some(db) = server.databases.get_mut(idx) {
                for n in 0..count {
                    let key = format!("key:{n}").into_bytes();
                    let value = format!("value:{n}").into_bytes();
                    db.set(key, vesper_kernel::Value::string(vesper_kernel::object::StringData::from_bytes(value)));
                }
            }
            if let Some(client) = server.clients.get_mut(&token) {
                client.queue_wire_reply(&Reply::ok());
            }
        }
        "SEGFAULT" => std::process::abort(),
        _ => reply_error(server, token, "ERR unknown DEBUG subcommand"),
    }
}
