//! The mio-based single-threaded event loop (spec §4.1).
//!
//! One `Poll` drives the listening socket, every client connection, the
//! outbound replica link (when `slaveof` is configured), and a periodic
//! tick that plays the role of redis-server's `serverCron`: active-expire
//! sweeps, incremental rehashing, AOF fsync, save-rule checks, and VM
//! event draining. No async runtime, no worker threads for command
//! execution — only the VM subsystem's background swap jobs and the
//! persistence thread (spec §4.6/§4.9) run off this thread.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use vesper_config::ServerConfig;
use vesper_io::{IoBackend, SyncBackend};
use vesper_kernel::Database;
use vesper_persistence::{AofWriter, FsyncPolicy};
use vesper_replication::PrimaryReplicationSet;
use vesper_types::{ClientId, ClientIdAllocator, DbIndex, UnixTime};
use vesper_vm::{VmConfig, VmEngine};

use crate::connection::ClientSession;
use crate::error::{ServerError, ServerResult};
use crate::pubsub::PubSub;
use crate::replica::ReplicaLink;

const LISTENER: Token = Token(0);
const REPLICA_LINK: Token = Token(1);
const SIGNAL: Token = Token(2);
const FIRST_CLIENT_TOKEN: usize = 3;

/// A handle a caller can use to ask the event loop to stop at its next
/// iteration (spec §6's SIGTERM handling: "stop accepting new connections,
/// finish in-flight replies, exit at the next tick").
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything the event loop owns across one process lifetime.
pub struct Server {
    pub(crate) poll: Poll,
    listener: TcpListener,
    next_token: usize,
    pub(crate) clients: HashMap<Token, ClientSession>,
    pub(crate) tokens: HashMap<ClientId, Token>,
    id_alloc: ClientIdAllocator,

    pub(crate) config: ServerConfig,
    pub(crate) databases: Vec<Database>,
    pub(crate) io_backend: Arc<dyn IoBackend>,
    pub(crate) aof: Option<AofWriter>,
    pub(crate) vm: Option<VmEngine>,
    pub(crate) replication: PrimaryReplicationSet,
    pub(crate) pubsub: PubSub,
    pub(crate) monitors: std::collections::HashSet<ClientId>,

    pub(crate) dirty_since_save: u64,
    pub(crate) last_save: UnixTime,
    pub(crate) start_time: UnixTime,
    /// Rough `used_memory` estimate, refreshed once per [`Self::cron`] tick
    /// rather than recomputed on every command (spec §4.5 step 1's OOM
    /// check only needs to be approximately current).
    pub(crate) approx_memory: u64,

    /// Global counters surfaced by `INFO` (spec §3/§4.13): connections
    /// accepted, commands dispatched, keys reaped by the active-expire
    /// cycle, and keys dropped by `maxmemory` eviction.
    pub(crate) stat_total_connections: u64,
    pub(crate) stat_total_commands: u64,
    pub(crate) stat_expired_keys: u64,
    pub(crate) stat_evicted_keys: u64,
    pub(crate) stat_vm_swap_ins: u64,
    pub(crate) stat_vm_swap_outs: u64,

    last_cron: Instant,
    last_everysec_fsync: Instant,

    pub(crate) replica_link: Option<ReplicaLink>,
    pub(crate) replica_socket_token: Option<Token>,

    /// Set while a BGSAVE thread is running (spec §4.6/§10.2: background
    /// save clones the dataset onto a dedicated OS thread rather than
    /// `fork()`, since this workspace denies `unsafe_code`).
    pub(crate) bgsave_in_progress: Arc<AtomicBool>,
    pub(crate) bgsave_result: Arc<Mutex<Option<Result<(), String>>>>,

    shutdown: ShutdownHandle,

    #[cfg(unix)]
    signals: Option<signal_hook_mio::v1_0::Signals>,
}

impl Server {
    pub fn bind(config: ServerConfig) -> ServerResult<Self> {
        let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
            .parse()
            .map_err(|_| ServerError::Fatal(format!("invalid bind address {}:{}", config.bind, config.port)))?;
        let mut listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr: addr.to_string(), source })?;

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

        #[cfg(unix)]
        let signals = {
            use signal_hook::consts::{SIGHUP, SIGPIPE, SIGTERM};
            let mut signals = signal_hook_mio::v1_0::Signals::new([SIGTERM, SIGHUP, SIGPIPE])
                .map_err(|e| ServerError::Fatal(format!("failed to install signal handlers: {e}")))?;
            poll.registry().register(&mut signals, SIGNAL, Interest::READABLE)?;
            Some(signals)
        };

        let databases = (0..config.databases).map(DbIndex::new).map(Database::new).collect();
        let io_backend: Arc<dyn IoBackend> = Arc::new(SyncBackend::new());

        let vm = if config.vm_enabled {
            Some(VmEngine::open(
                VmConfig {
                    enabled: true,
                    swap_path: config.vm_swap_file.clone(),
                    page_size: config.vm_page_size,
                    page_count: config.vm_pages,
                    max_memory: config.vm_max_memory,
                    max_threads: config.vm_max_threads as usize,
                    blocking: false,
                },
                Arc::clone(&io_backend),
            )?)
        } else {
            None
        };

        let aof = if config.appendonly {
            let path = config.dir.join(&config.appendfilename);
            Some(AofWriter::open(Arc::clone(&io_backend), &path, fsync_policy(config.appendfsync))?)
        } else {
            None
        };

        Ok(Self {
            poll,
            listener,
            next_token: FIRST_CLIENT_TOKEN,
            clients: HashMap::new(),
            tokens: HashMap::new(),
            id_alloc: ClientIdAllocator::new(),
            databases,
            io_backend,
            aof,
            vm,
            replication: PrimaryReplicationSet::new(),
            pubsub: PubSub::new(),
            monitors: std::collections::HashSet::new(),
            dirty_since_save: 0,
            last_save: UnixTime::ZERO,
            start_time: UnixTime::now(),
            approx_memory: 0,
            stat_total_connections: 0,
            stat_total_commands: 0,
            stat_expired_keys: 0,
            stat_evicted_keys: 0,
            stat_vm_swap_ins: 0,
            stat_vm_swap_outs: 0,
            last_cron: Instant::now(),
            last_everysec_fsync: Instant::now(),
            replica_link: None,
            replica_socket_token: None,
            bgsave_in_progress: Arc::new(AtomicBool::new(false)),
            bgsave_result: Arc::new(Mutex::new(None)),
            shutdown: ShutdownHandle { flag: Arc::new(AtomicBool::new(false)) },
            #[cfg(unix)]
            signals,
            config,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// The address actually bound, including the OS-assigned port when
    /// `config.port == 0`. Used by `vesper-dev`'s in-process test harness
    /// to discover an ephemeral port after [`Self::bind`].
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Loads the configured RDB file (if present) before serving traffic,
    /// then replays the AOF on top of it if `appendonly` is set (spec §9's
    /// startup sequencing: RDB first, AOF supersedes it when both exist).
    pub fn load_dataset(&mut self) -> ServerResult<()> {
        if self.config.appendonly {
            let path = self.config.dir.join(&self.config.appendfilename);
            if path.exists() {
                self.replay_aof(&path)?;
            }
            return Ok(());
        }
        let path = self.config.dir.join(&self.config.dbfilename);
        if !path.exists() {
            return Ok(());
        }
        let bytes = self.io_backend.read_all(&path)?;
        let entries = vesper_persistence::decode_rdb(&bytes)?;
        let now = UnixTime::now();
        for entry in entries {
            let idx = entry.db.as_u32() as usize;
            if idx >= self.databases.len() {
                continue;
            }
            let value = self.reencode_hash_thresholds(entry.value);
            self.databases[idx].set(entry.key.clone(), value);
            if let Some(expire_at) = entry.expire_at {
                if expire_at.is_past(now) {
                    self.databases[idx].remove(&entry.key);
                } else {
                    self.databases[idx].set_expire(&entry.key, expire_at);
                }
            }
        }
        tracing::info!(path = %path.display(), "loaded RDB snapshot");
        Ok(())
    }

    /// RDB loading always produces PACKEDMAP hashes (spec §4.6's loader
    /// has no access to the configured thresholds); re-insert through
    /// [`vesper_kernel::object::HashData::insert`] with this server's
    /// actual `hash-max-zipmap-*` settings so a reload doesn't silently
    /// drop a hash's HASHTABLE encoding.
    fn reencode_hash_thresholds(&self, value: vesper_kernel::Value) -> vesper_kernel::Value {
        let vesper_kernel::ValueData::Hash(hash) = &value.data else { return value };
        let mut rebuilt = vesper_kernel::object::HashData::default();
        for (field, val) in hash.iter() {
            rebuilt.insert(field.to_vec(), val.to_vec(), self.config.hash_max_zipmap_entries, self.config.hash_max_zipmap_value);
        }
        vesper_kernel::Value::hash(rebuilt)
    }

    fn replay_aof(&mut self, path: &PathBuf) -> ServerResult<()> {
        let bytes = self.io_backend.read_all(path)?;
        let mut buf = bytes::BytesMut::from(&bytes[..]);
        let mut parser = vesper_wire::RequestParser::new();
        let now = UnixTime::now();
        let ctx_hash_entries = self.config.hash_max_zipmap_entries;
        let ctx_hash_value = self.config.hash_max_zipmap_value;
        let mut db_index = DbIndex::new(0);
        loop {
            match parser.parse(&mut buf).map_err(|e| ServerError::Fatal(format!("corrupt AOF: {e}")))? {
                vesper_wire::ParseOutcome::Incomplete => break,
                vesper_wire::ParseOutcome::Complete(request) => {
                    let Some(name) = request.command_name() else { continue };
                    let upper = String::from_utf8_lossy(name).to_ascii_uppercase();
                    if upper == "SELECT" {
                        if let Some(n) = request.argv.get(1).and_then(|b| std::str::from_utf8(b).ok()).and_then(|s| s.parse().ok()) {
                            db_index = DbIndex::new(n);
                        }
                        continue;
                    }
                    let idx = db_index.as_u32() as usize;
                    if idx >= self.databases.len() {
                        continue;
                    }
                    let ctx = vesper_kernel::command::HandlerContext {
                        now,
                        hash_max_zipmap_entries: ctx_hash_entries,
                        hash_max_zipmap_value: ctx_hash_value,
                    };
                    let _ = vesper_kernel::Dispatcher::execute(&request.argv, &mut self.databases[idx], &ctx);
                }
            }
        }
        tracing::info!(path = %path.display(), "replayed append-only file");
        Ok(())
    }

    /// Runs the event loop until [`ShutdownHandle::request`] is called (or
    /// a fatal I/O error occurs). Matches spec §9's `init_server -> run_loop
    /// -> shutdown` sequencing.
    pub fn run(&mut self) -> ServerResult<()> {
        if let Some((host, port)) = self.config.slaveof.clone() {
            self.start_replica_link(host, port)?;
        }

        let mut events = Events::with_capacity(1024);
        loop {
            if self.shutdown.requested() {
                break;
            }
            self.poll.poll(&mut events, Some(Duration::from_millis(100)))?;
            for event in &events {
                match event.token() {
                    LISTENER => self.accept_loop()?,
                    SIGNAL => self.handle_signals(),
                    token if Some(token) == self.replica_socket_token => self.poll_replica_link()?,
                    token => self.service_client(token, event.is_readable(), event.is_writable()),
                }
            }
            self.cron();
        }
        self.shutdown_sequence()
    }

    fn shutdown_sequence(&mut self) -> ServerResult<()> {
        tracing::info!("shutting down");
        if self.config.save_rules.is_empty().then_some(()).is_none() && self.dirty_since_save > 0 {
            let _ = self.save_rdb();
        }
        if let Some(aof) = self.aof.take() {
            let _ = aof.close();
        }
        Ok(())
    }

    fn handle_signals(&mut self) {
        #[cfg(unix)]
        if let Some(signals) = &mut self.signals {
            use signal_hook::consts::{SIGHUP, SIGPIPE, SIGTERM};
            for signal in signals.pending() {
                match signal {
                    SIGTERM => {
                        tracing::info!("received SIGTERM, shutting down at next tick");
                        self.shutdown.request();
                    }
                    SIGHUP | SIGPIPE => {
                        // Ignored per spec §6.
                    }
                    _ => {}
                }
            }
        }
    }

    fn accept_loop(&mut self) -> ServerResult<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.register_client(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn register_client(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        if self.config.maxclients > 0 && self.clients.len() as u32 >= self.config.maxclients {
            let _ = stream.write_all(b"-ERR max number of clients reached\r\n");
            return;
        }
        let token = Token(self.next_token);
        self.next_token += 1;
        if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
            tracing::warn!(%addr, error = %e, "failed to register new client");
            return;
        }
        let id = self.id_alloc.next();
        let requires_auth = self.config.requirepass.is_some();
        let session = ClientSession::new(id, stream, requires_auth);
        tracing::debug!(%addr, client = %id, "accepted connection");
        self.tokens.insert(id, token);
        self.clients.insert(token, session);
        self.stat_total_connections += 1;
    }

    fn service_client(&mut self, token: Token, readable: bool, writable: bool) {
        if writable {
            self.flush_client(token);
        }
        if readable {
            self.read_client(token);
        }
    }

    fn read_client(&mut self, token: Token) {
        let mut buf = [0u8; 16 * 1024];
        loop {
            let Some(client) = self.clients.get_mut(&token) else { return };
            match client.stream.read(&mut buf) {
                Ok(0) => {
                    self.disconnect_client(token);
                    return;
                }
                Ok(n) => {
                    client.input.extend_from_slice(&buf[..n]);
                    client.last_interaction = Instant::now();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(error = %e, "client read error");
                    self.disconnect_client(token);
                    return;
                }
            }
        }
        self.drain_requests(token);
        self.flush_client(token);
    }

    fn drain_requests(&mut self, token: Token) {
        loop {
            let Some(client) = self.clients.get_mut(&token) else { return };
            let mut buf = std::mem::take(&mut client.input);
            let outcome = client.parser.parse(&mut buf);
            let Some(client) = self.clients.get_mut(&token) else { return };
            client.input = buf;
            match outcome {
                Ok(vesper_wire::ParseOutcome::Incomplete) => break,
                Ok(vesper_wire::ParseOutcome::Complete(request)) => {
                    if request.argv.is_empty() {
                        continue;
                    }
                    crate::handler::dispatch(self, token, request.argv);
                    if !self.clients.contains_key(&token) {
                        return;
                    }
                }
                Err(e) => {
                    if let Some(client) = self.clients.get_mut(&token) {
                        client.queue_reply(format!("-ERR Protocol error: {e}\r\n").as_bytes());
                        client.flags.insert(crate::connection::ClientFlags::CLOSE_AFTER_REPLY);
                    }
                    break;
                }
            }
        }
    }

    pub(crate) fn flush_client(&mut self, token: Token) {
        let Some(client) = self.clients.get_mut(&token) else { return };
        while !client.output.is_empty() {
            match client.stream.write(&client.output) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = client.output.split_to(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let _ = self.poll.registry().reregister(&mut client.stream, token, Interest::READABLE | Interest::WRITABLE);
                    return;
                }
                Err(_) => {
                    self.disconnect_client(token);
                    return;
                }
            }
        }
        if client.flags.contains(crate::connection::ClientFlags::CLOSE_AFTER_REPLY) {
            self.disconnect_client(token);
            return;
        }
        let _ = self.poll.registry().reregister(&mut client.stream, token, Interest::READABLE);
    }

    pub(crate) fn disconnect_client(&mut self, token: Token) {
        let Some(mut client) = self.clients.remove(&token) else { return };
        let _ = self.poll.registry().deregister(&mut client.stream);
        self.tokens.remove(&client.id);
        self.pubsub.remove_client(client.id);
        self.monitors.remove(&client.id);
        self.replication.remove(client.id);
        for (db, key) in client.watched.drain(..) {
            let idx = db.as_u32() as usize;
            if let Some(db) = self.databases.get_mut(idx) {
                db.unwatch_all(client.id, std::slice::from_ref(&key));
            }
        }
        if let Some(blocked) = &client.blocked_on {
            let idx = client.db.as_u32() as usize;
            if let Some(db) = self.databases.get_mut(idx) {
                for key in &blocked.keys {
                    db.remove_blocking_waiter(key, client.id);
                }
            }
        }
        tracing::debug!(client = %client.id, "disconnected");
    }

    pub(crate) fn start_replica_link(&mut self, host: String, port: u16) -> ServerResult<()> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ServerError::Fatal(format!("invalid slaveof address {host}:{port}")))?;
        let mut link = ReplicaLink::connect(addr, self.config.masterauth.clone())?;
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(&mut link.stream, token, Interest::READABLE | Interest::WRITABLE)?;
        self.replica_socket_token = Some(token);
        self.replica_link = Some(link);
        Ok(())
    }

    fn poll_replica_link(&mut self) -> ServerResult<()> {
        let Some(link) = &mut self.replica_link else { return Ok(()) };
        let events = link.poll_io()?;
        for command in events.applied_commands {
            let idx = command.db.as_u32() as usize;
            if idx >= self.databases.len() {
                continue;
            }
            let ctx = vesper_kernel::command::HandlerContext {
                now: UnixTime::now(),
                hash_max_zipmap_entries: self.config.hash_max_zipmap_entries,
                hash_max_zipmap_value: self.config.hash_max_zipmap_value,
            };
            let _ = vesper_kernel::Dispatcher::execute(&command.argv, &mut self.databases[idx], &ctx);
        }
        if let Some(snapshot) = events.full_resync_rdb {
            let entries = vesper_persistence::decode_rdb(&snapshot)?;
            for db in &mut self.databases {
                db.flush();
            }
            for entry in entries {
                let idx = entry.db.as_u32() as usize;
                if idx < self.databases.len() {
                    self.databases[idx].set(entry.key, entry.value);
                }
            }
            tracing::info!("applied full resync snapshot from primary");
        }
        Ok(())
    }

    /// Writes a full RDB snapshot synchronously (spec §4.6's `SAVE`). A
    /// real BGSAVE clones the dataset onto a background thread first (spec
    /// §10.2's resolved design); `vesper-server`'s BGSAVE handler in
    /// `handler.rs` does that cloning, then calls this same encoder off-thread.
    pub(crate) fn save_rdb(&mut self) -> ServerResult<()> {
        let mut bytes = Vec::new();
        vesper_persistence::encode_rdb(&self.databases, UnixTime::now(), self.config.rdbcompression, &mut bytes);
        let path = self.config.dir.join(&self.config.dbfilename);
        self.io_backend.write_all(&path, &bytes)?;
        self.last_save = UnixTime::now();
        self.dirty_since_save = 0;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "wrote RDB snapshot");
        Ok(())
    }

    /// Starts a background save if one isn't already running: clones the
    /// dataset onto a dedicated thread, which encodes and writes the RDB
    /// file independently of the event loop (spec §4.6's BGSAVE, §10.2's
    /// resolved no-`fork()` design). Returns `false` without spawning if a
    /// save is already in flight, matching `-ERR Background save already in
    /// progress`.
    pub(crate) fn spawn_bgsave(&mut self) -> bool {
        if self.bgsave_in_progress.swap(true, Ordering::SeqCst) {
            return false;
        }
        let databases = self.databases.clone();
        let compression = self.config.rdbcompression;
        let path = self.config.dir.join(&self.config.dbfilename);
        let backend = Arc::clone(&self.io_backend);
        let in_progress = Arc::clone(&self.bgsave_in_progress);
        let result = Arc::clone(&self.bgsave_result);
        std::thread::spawn(move || {
            let mut bytes = Vec::new();
            vesper_persistence::encode_rdb(&databases, UnixTime::now(), compression, &mut bytes);
            let outcome = backend.write_all(&path, &bytes).map_err(|e| e.to_string());
            *result.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(outcome);
            in_progress.store(false, Ordering::SeqCst);
        });
        true
    }

    /// The periodic housekeeping tick (spec §4.1's `beforeSleep`/cron):
    /// active-expire sweep, incremental rehash, AOF `everysec` fsync, VM
    /// event draining, and the `save` rule check.
    fn cron(&mut self) {
        if self.last_cron.elapsed() < Duration::from_millis(100) {
            return;
        }
        self.last_cron = Instant::now();
        let now = UnixTime::now();

        for db in &mut self.databases {
            self.stat_expired_keys += db.active_expire_cycle(now) as u64;
            db.rehash_step(1);
        }

        self.approx_memory = self
            .databases
            .iter()
            .flat_map(|db| db.keys().filter_map(|key| db.peek(key).map(|value| (vesper_vm::approx_size(value) + key.len()) as u64)))
            .sum();

        if let Some(vm) = &self.vm {
            // Swap-out trigger (spec §4.9): once resident memory exceeds
            // `vm-max-memory`, push one candidate per database out to the
            // swap file per tick rather than draining the whole overage at
            // once, so a single cron tick never blocks on a large sample.
            if vm.is_enabled() && vm.max_memory() > 0 && self.approx_memory > vm.max_memory() {
                for idx in 0..self.databases.len() {
                    let db_idx = DbIndex::new(idx as u32);
                    let Some(db) = self.databases.get_mut(idx) else { continue };
                    match vm.swap_out_blocking(db, db_idx, now) {
                        Ok(Some(_)) => self.stat_vm_swap_outs += 1,
                        Ok(None) => {
                            if vm.begin_swap_out(db, db_idx, now).is_some() {
                                self.stat_vm_swap_outs += 1;
                            }
                        }
                        Err(e) => tracing::warn!(db = idx, error = %e, "VM swap-out failed"),
                    }
                }
            }
            let events = vm.drain_events();
            crate::handler::apply_vm_events(self, events);
        }

        if let Some(aof) = &mut self.aof {
            if self.last_everysec_fsync.elapsed() >= Duration::from_secs(1) {
                let _ = aof.before_sleep_fsync();
                self.last_everysec_fsync = Instant::now();
            }
        }

        if self.dirty_since_save > 0 {
            for rule in self.config.save_rules.clone() {
                if self.dirty_since_save >= rule.changes
                    && self.last_save.as_secs() + rule.seconds as i64 <= now.as_secs()
                {
                    tracing::info!(changes = self.dirty_since_save, seconds = rule.seconds, "save rule triggered, starting background save");
                    self.spawn_bgsave();
                    break;
                }
            }
        }

        if let Some(outcome) = self.bgsave_result.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            crate::handler::apply_bgsave_result(self, outcome);
        }

        let timed_out: Vec<Token> = self
            .clients
            .iter()
            .filter(|(_, c)| c.blocked_on.as_ref().and_then(|b| b.deadline).is_some_and(|d| d <= Instant::now()))
            .map(|(t, _)| *t)
            .collect();
        for token in timed_out {
            crate::handler::timeout_blocked_client(self, token);
        }
    }
}

fn fsync_policy(policy: vesper_config::AppendFsync) -> FsyncPolicy {
    match policy {
        vesper_config::AppendFsync::No => FsyncPolicy::No,
        vesper_config::AppendFsync::EverySec => FsyncPolicy::EverySec,
        vesper_config::AppendFsync::Always => FsyncPolicy::Always,
    }
}

