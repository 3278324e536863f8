//! Per-client connection state (spec §3's Client object).
//!
//! A [`ClientSession`] is the server-side half of one socket: its read/parse
//! state, its reply queue, and every piece of session state a command
//! handler in this crate (not `vesper-kernel`, which never sees a socket)
//! needs to implement MULTI/WATCH/pub-sub/replica bookkeeping.

use std::collections::HashSet;
use std::time::Instant;

use bytes::BytesMut;
use mio::net::TcpStream;
use vesper_types::{ClientId, DbIndex};
use vesper_wire::RequestParser;

bitflags::bitflags! {
    /// Per-connection mode bits (spec §3's Client `flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClientFlags: u16 {
        /// This connection is a replica receiving the write stream.
        const SLAVE          = 0b0000_0001;
        /// This connection is this process's link to its primary.
        const MASTER          = 0b0000_0010;
        /// Subscribed to the MONITOR firehose.
        const MONITOR         = 0b0000_0100;
        /// Between MULTI and EXEC/DISCARD: commands are queued, not run.
        const IN_MULTI        = 0b0000_1000;
        /// A previous command inside a MULTI block failed to queue (bad
        /// arity/unknown command); EXEC must abort without running any of it.
        const MULTI_DIRTY      = 0b0001_0000;
        /// At least one watched key changed since WATCH; EXEC must abort.
        const DIRTY_CAS        = 0b0010_0000;
        /// Blocked inside BLPOP/BRPOP waiting on a key to gain an element.
        const BLOCKED          = 0b0100_0000;
        /// Blocked waiting on a VM swap-in to complete.
        const IO_WAIT          = 0b1000_0000;
        /// Close the socket once the current output buffer drains.
        const CLOSE_AFTER_REPLY = 0b0001_0000_0000;
        /// Has passed AUTH (always true when `requirepass` is unset).
        const AUTHENTICATED    = 0b0010_0000_0000;
    }
}

/// Why a client is currently blocked (spec §4.10).
#[derive(Debug, Clone)]
pub struct BlockedOn {
    pub keys: Vec<Vec<u8>>,
    pub deadline: Option<Instant>,
    /// `true` for BRPOP, `false` for BLPOP — which end to pop once a key
    /// gains an element.
    pub from_right: bool,
}

/// One connected client (spec §3). Owns its socket, its incremental parser,
/// and every piece of session-local state the dispatch pipeline in
/// [`crate::handler`] reads or mutates.
pub struct ClientSession {
    pub id: ClientId,
    pub stream: TcpStream,
    pub db: DbIndex,
    pub input: BytesMut,
    pub parser: RequestParser,
    pub output: BytesMut,
    pub flags: ClientFlags,
    pub name: Option<Vec<u8>>,

    /// Queued commands between MULTI and EXEC (spec §4.11).
    pub multi_queue: Vec<Vec<Vec<u8>>>,
    /// Keys this client has WATCHed, so UNWATCH/EXEC/disconnect can clear
    /// them from every database's watch table.
    pub watched: Vec<(DbIndex, Vec<u8>)>,

    /// Channels/patterns this client is subscribed to (spec §4.12).
    pub channels: HashSet<Vec<u8>>,
    pub patterns: HashSet<Vec<u8>>,

    /// Set while blocked in BLPOP/BRPOP (spec §4.10).
    pub blocked_on: Option<BlockedOn>,

    /// The argv of a command suspended on a VM swap-in (`IO_WAIT`), replayed
    /// once the value finishes loading.
    pub pending_command: Option<Vec<Vec<u8>>>,

    pub last_interaction: Instant,
}

impl ClientSession {
    pub fn new(id: ClientId, stream: TcpStream, requires_auth: bool) -> Self {
        let mut flags = ClientFlags::empty();
        if !requires_auth {
            flags.insert(ClientFlags::AUTHENTICATED);
        }
        Self {
            id,
            stream,
            db: DbIndex::new(0),
            input: BytesMut::with_capacity(16 * 1024),
            parser: RequestParser::new(),
            output: BytesMut::new(),
            flags,
            name: None,
            multi_queue: Vec::new(),
            watched: Vec::new(),
            channels: HashSet::new(),
            patterns: HashSet::new(),
            blocked_on: None,
            pending_command: None,
            last_interaction: Instant::now(),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        !self.channels.is_empty() || !self.patterns.is_empty()
    }

    pub fn subscription_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }

    pub fn queue_reply(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    pub fn queue_wire_reply(&mut self, reply: &vesper_wire::Reply) {
        reply.encode(&mut self.output);
    }
}
