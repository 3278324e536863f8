//! The replica side of primary/replica replication (spec §4.8): connects
//! out to a configured `slaveof HOST PORT`, performs the `SYNC` handshake,
//! and turns the bytes that follow into applyable work for [`crate::server::Server`].
//!
//! The primary side ([`vesper_replication::PrimaryReplicationSet`]) already
//! models its half of the protocol; this module is this crate's
//! counterpart, since nothing else in the workspace owns a live socket to
//! a remote primary.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;

use vesper_types::DbIndex;
use vesper_wire::{ParseOutcome, RequestParser};

use crate::error::{ServerError, ServerResult};

/// One applied write command streamed from the primary, already routed to
/// the right database by the last `SELECT` seen on the link.
pub struct AppliedCommand {
    pub db: DbIndex,
    pub argv: Vec<Vec<u8>>,
}

/// What a round of I/O on the link produced, for the caller to apply.
#[derive(Default)]
pub struct ReplicaLinkEvents {
    /// Set once, the first time the full RDB bulk transfer completes.
    pub full_resync_rdb: Option<Vec<u8>>,
    pub applied_commands: Vec<AppliedCommand>,
}

enum Phase {
    /// Waiting for `+PONG` in reply to the handshake `PING`.
    AwaitPong { auth_sent: bool },
    /// Waiting for `+OK` in reply to `AUTH`, only reachable when `masterauth` is set.
    AwaitAuthOk,
    /// Waiting for the `$<len>\r\n` bulk header that precedes the RDB payload.
    AwaitBulkHeader,
    /// Reading `remaining` more bytes of the RDB payload.
    ReadingBulk { remaining: usize, body: Vec<u8> },
    /// Past the bulk transfer: everything from here on is a multi-bulk
    /// command to apply, exactly like a normal client request.
    Streaming,
}

/// A live (or reconnecting) connection to this server's configured primary.
pub struct ReplicaLink {
    pub stream: TcpStream,
    phase: Phase,
    read_buf: BytesMut,
    write_buf: BytesMut,
    parser: RequestParser,
    selected_db: DbIndex,
}

impl ReplicaLink {
    /// Opens the socket and queues the handshake bytes (spec §4.8: `PING`,
    /// then `AUTH` if configured, then `SYNC`). The handshake replies are
    /// consumed incrementally by [`Self::poll_io`] as the socket becomes
    /// readable; this constructor never blocks on the network.
    pub fn connect(addr: SocketAddr, masterauth: Option<String>) -> ServerResult<Self> {
        let std_stream = StdTcpStream::connect_timeout(&addr, Duration::from_secs(5))
            .map_err(|source| ServerError::Bind { addr: addr.to_string(), source })?;
        std_stream.set_nonblocking(true)?;
        let stream = TcpStream::from_std(std_stream);

        let mut write_buf = BytesMut::new();
        write_buf.extend_from_slice(b"PING\r\n");
        let auth_sent = masterauth.is_some();
        if let Some(pass) = masterauth {
            write_buf.extend_from_slice(vesper_wire::encode_multibulk(&[b"AUTH".to_vec(), pass.into_bytes()]).as_slice());
        }
        let phase = Phase::AwaitPong { auth_sent };

        Ok(Self {
            stream,
            phase,
            read_buf: BytesMut::with_capacity(64 * 1024),
            write_buf,
            parser: RequestParser::new(),
            selected_db: DbIndex::new(0),
        })
    }

    /// Drives the handshake and/or the streaming phase as far as the
    /// currently available bytes allow. Call whenever mio reports the
    /// link's token as readable or writable.
    pub fn poll_io(&mut self) -> ServerResult<ReplicaLinkEvents> {
        self.drain_writes()?;
        self.fill_read_buf()?;
        let mut events = ReplicaLinkEvents::default();
        loop {
            match &mut self.phase {
                Phase::AwaitPong { auth_sent } => {
                    let Some(line) = take_line(&mut self.read_buf) else { break };
                    tracing::debug!(reply = %line, "replica handshake: PING reply");
                    if *auth_sent {
                        self.phase = Phase::AwaitAuthOk;
                    } else {
                        self.write_buf.extend_from_slice(b"SYNC\r\n");
                        self.phase = Phase::AwaitBulkHeader;
                        self.drain_writes()?;
                    }
                }
                Phase::AwaitAuthOk => {
                    let Some(line) = take_line(&mut self.read_buf) else { break };
                    if line.starts_with('-') {
                        return Err(ServerError::Fatal(format!("primary rejected AUTH: {line}")));
                    }
                    self.write_buf.extend_from_slice(b"SYNC\r\n");
                    self.phase = Phase::AwaitBulkHeader;
                    self.drain_writes()?;
                }
                Phase::AwaitBulkHeader => {
                    let Some(line) = take_line(&mut self.read_buf) else { break };
                    let Some(len_str) = line.strip_prefix('$') else {
                        return Err(ServerError::Fatal("malformed SYNC bulk header from primary".into()));
                    };
                    let len: usize = len_str.trim().parse().map_err(|_| ServerError::Fatal("malformed SYNC bulk length".into()))?;
                    self.phase = Phase::ReadingBulk { remaining: len, body: Vec::with_capacity(len) };
                }
                Phase::ReadingBulk { remaining, body } => {
                    if *remaining == 0 {
                        let body = std::mem::take(body);
                        events.full_resync_rdb = Some(body);
                        self.phase = Phase::Streaming;
                        continue;
                    }
                    if self.read_buf.is_empty() {
                        break;
                    }
                    let take = (*remaining).min(self.read_buf.len());
                    body.extend_from_slice(&self.read_buf[..take]);
                    self.read_buf.advance(take);
                    *remaining -= take;
                    if *remaining > 0 {
                        break;
                    }
                }
                Phase::Streaming => match self.parser.parse(&mut self.read_buf) {
                    Ok(ParseOutcome::Complete(request)) => {
                        if let Some(applied) = self.apply_streamed(request.argv) {
                            events.applied_commands.push(applied);
                        }
                    }
                    Ok(ParseOutcome::Incomplete) => break,
                    Err(e) => return Err(ServerError::Fatal(format!("protocol error from primary: {e}"))),
                },
            }
        }
        Ok(events)
    }

    fn apply_streamed(&mut self, argv: Vec<Vec<u8>>) -> Option<AppliedCommand> {
        let name = argv.first()?;
        if name.eq_ignore_ascii_case(b"SELECT") {
            if let Some(n) = argv.get(1).and_then(|b| std::str::from_utf8(b).ok()).and_then(|s| s.parse().ok()) {
                self.selected_db = DbIndex::new(n);
            }
            return None;
        }
        Some(AppliedCommand { db: self.selected_db, argv })
    }

    fn drain_writes(&mut self) -> ServerResult<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buf.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn fill_read_buf(&mut self) -> ServerResult<()> {
        let mut chunk = [0u8; 16 * 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(ServerError::Fatal("primary closed the replication link".into())),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Pulls one `\r\n`- or `\n`-terminated line out of `buf` as a `String`,
/// advancing past it. Used only for the handshake's status-line replies
/// (`+PONG`, `+OK`), which never need the incremental multi-bulk parser.
fn take_line(buf: &mut BytesMut) -> Option<String> {
    let nl = buf.iter().position(|&b| b == b'\n')?;
    let end = if nl > 0 && buf[nl - 1] == b'\r' { nl - 1 } else { nl };
    let line = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.advance(nl + 1);
    Some(line)
}
