//! Primary-side replica bookkeeping: one [`PrimaryReplicaLink`] per
//! connected replica, plus the BGSAVE-coalescing rule from spec §4.8 ("if
//! another replica is already in `WAIT_BGSAVE_END`, copy that replica's
//! reply buffer into this one; otherwise, if no BGSAVE is active, start
//! one").
//!
//! `vesper-server` owns the actual BGSAVE thread/RDB bytes; this module
//! only tracks which replicas are waiting on one and how to route a
//! completed snapshot and the live command feed to each.

use std::collections::HashMap;

use vesper_types::{ClientId, DbIndex};

use crate::link::{PrimaryReplicaLink, PrimaryReplicaState};

/// What the caller should do in response to a `SYNC` from `replica`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// No BGSAVE is running; the caller must start one for this replica.
    StartBgsave,
    /// A BGSAVE already targets another waiting replica; this replica's
    /// buffered writes piggyback on it and it'll get the same snapshot.
    JoinInFlightBgsave,
}

/// All replicas currently attached to this primary.
#[derive(Default)]
pub struct PrimaryReplicationSet {
    links: HashMap<ClientId, PrimaryReplicaLink>,
}

impl PrimaryReplicationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a replica that just sent `SYNC` and decides whether a new
    /// BGSAVE is needed (spec §4.8's coalescing rule).
    pub fn on_sync(&mut self, replica: ClientId) -> SyncAction {
        let already_waiting = self
            .links
            .values()
            .any(|link| link.state == PrimaryReplicaState::WaitBgsaveEnd);
        self.links.insert(replica, PrimaryReplicaLink::new());
        if already_waiting {
            if let Some(link) = self.links.get_mut(&replica) {
                link.state = PrimaryReplicaState::WaitBgsaveEnd;
            }
            SyncAction::JoinInFlightBgsave
        } else {
            SyncAction::StartBgsave
        }
    }

    /// Marks every replica still waiting on the snapshot as `WAIT_BGSAVE_END`
    /// (called once the caller has kicked off the BGSAVE).
    pub fn mark_bgsave_in_progress(&mut self) {
        for link in self.links.values_mut() {
            if link.state == PrimaryReplicaState::WaitBgsaveStart {
                link.state = PrimaryReplicaState::WaitBgsaveEnd;
            }
        }
    }

    /// The BGSAVE finished: every replica waiting on it transitions to
    /// `SEND_BULK`. The caller streams the produced RDB bytes followed by
    /// each replica's buffered writes, then calls [`Self::mark_online`].
    pub fn on_bgsave_complete(&mut self) -> Vec<ClientId> {
        let mut ready = Vec::new();
        for (id, link) in &mut self.links {
            if link.state == PrimaryReplicaState::WaitBgsaveEnd {
                link.begin_send_bulk();
                ready.push(*id);
            }
        }
        ready
    }

    pub fn mark_online(&mut self, replica: ClientId) {
        if let Some(link) = self.links.get_mut(&replica) {
            link.mark_online();
        }
    }

    pub fn remove(&mut self, replica: ClientId) {
        self.links.remove(&replica);
    }

    /// Buffers or streams a just-applied write command to every replica,
    /// returning the bytes the caller must write to each `ONLINE`
    /// replica's socket (replicas still waiting on a snapshot have the
    /// same bytes appended to their buffer instead, per spec §4.8).
    pub fn feed(&mut self, db: DbIndex, argv: &[Vec<u8>]) -> Vec<(ClientId, Vec<u8>)> {
        let mut out = Vec::new();
        for (id, link) in &mut self.links {
            match link.state {
                PrimaryReplicaState::Online => {
                    let mut bytes = Vec::new();
                    crate::feed::encode_feed_command(db, argv, &mut link.last_selected_db, &mut bytes);
                    out.push((*id, bytes));
                }
                PrimaryReplicaState::WaitBgsaveStart | PrimaryReplicaState::WaitBgsaveEnd => {
                    let mut bytes = Vec::new();
                    crate::feed::encode_feed_command(db, argv, &mut link.last_selected_db, &mut bytes);
                    link.buffer(&bytes);
                }
                PrimaryReplicaState::SendBulk => {}
            }
        }
        out
    }

    /// Drains a replica's buffered writes (called once its RDB transfer
    /// finishes, right before it's marked online).
    pub fn take_buffered(&mut self, replica: ClientId) -> Vec<u8> {
        self.links.get_mut(&replica).map(PrimaryReplicaLink::take_buffered).unwrap_or_default()
    }

    pub fn online_count(&self) -> usize {
        self.links.values().filter(|link| link.is_online()).count()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sync_starts_a_bgsave_second_joins_it() {
        let mut set = PrimaryReplicationSet::new();
        assert_eq!(set.on_sync(ClientId::new(1)), SyncAction::StartBgsave);
        set.mark_bgsave_in_progress();
        assert_eq!(set.on_sync(ClientId::new(2)), SyncAction::JoinInFlightBgsave);
    }

    #[test]
    fn writes_buffer_until_online_then_stream_directly() {
        let mut set = PrimaryReplicationSet::new();
        set.on_sync(ClientId::new(1));
        let fed = set.feed(DbIndex::new(0), &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        assert!(fed.is_empty(), "not yet online: command should be buffered, not streamed");

        set.mark_bgsave_in_progress();
        set.on_bgsave_complete();
        let buffered = set.take_buffered(ClientId::new(1));
        assert!(!buffered.is_empty());
        set.mark_online(ClientId::new(1));

        let fed = set.feed(DbIndex::new(0), &[b"SET".to_vec(), b"k2".to_vec(), b"v".to_vec()]);
        assert_eq!(fed.len(), 1);
    }
}
