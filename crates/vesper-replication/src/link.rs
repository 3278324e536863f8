//! Per-connection replication state (spec §4.8): the replica's view of its
//! own link to the primary, and the primary's view of each connected
//! replica. Kept as two small state machines rather than one shared enum,
//! matching the asymmetry of the roles themselves.

use vesper_types::DbIndex;

/// A replica's view of its link to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaLinkState {
    /// Not replicating; no primary configured (or `SLAVEOF NO ONE` issued).
    None,
    /// A primary is configured but the socket isn't connected (or isn't
    /// past the SYNC handshake) yet; the event loop should retry connecting.
    Connect,
    /// Past the SYNC handshake: the RDB has loaded and subsequent bytes on
    /// this connection are commands to execute in replica context.
    Connected,
}

/// The primary's bookkeeping for one connected replica (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryReplicaState {
    /// Replica sent `SYNC`; waiting for a BGSAVE to start (or piggybacking
    /// on one already in flight).
    WaitBgsaveStart,
    /// A BGSAVE is in progress; write commands are buffered for this
    /// replica but not yet sent.
    WaitBgsaveEnd,
    /// The RDB snapshot is being streamed to the replica.
    SendBulk,
    /// RDB transfer complete; this replica receives the live command feed.
    Online,
}

/// One replica's record on the primary side: its state, the buffered reply
/// bytes accumulated while a BGSAVE was in flight, and the last `SELECT`ed
/// DB sent to it (so the feed only re-sends `SELECT` on a change, exactly
/// like `vesper_persistence::AofWriter`).
#[derive(Debug)]
pub struct PrimaryReplicaLink {
    pub state: PrimaryReplicaState,
    pub buffered: Vec<u8>,
    pub last_selected_db: Option<DbIndex>,
}

impl PrimaryReplicaLink {
    pub fn new() -> Self {
        Self {
            state: PrimaryReplicaState::WaitBgsaveStart,
            buffered: Vec::new(),
            last_selected_db: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.state == PrimaryReplicaState::Online
    }

    /// Buffers a write command while this replica is still waiting on its
    /// initial snapshot (spec §4.8: "while waiting, write commands are
    /// buffered per replica").
    pub fn buffer(&mut self, bytes: &[u8]) {
        self.buffered.extend_from_slice(bytes);
    }

    pub fn take_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffered)
    }

    pub fn begin_send_bulk(&mut self) {
        tracing::debug!(from = ?self.state, "replica transitioning to SEND_BULK");
        self.state = PrimaryReplicaState::SendBulk;
    }

    pub fn mark_online(&mut self) {
        tracing::info!("replica is now ONLINE");
        self.state = PrimaryReplicaState::Online;
    }
}

impl Default for PrimaryReplicaLink {
    fn default() -> Self {
        Self::new()
    }
}
