//! Primary/replica asynchronous replication (spec §4.8), simplified from
//! the teacher's Viewstamped Replication protocol down to the classic
//! `SYNC` handshake and a per-replica state machine (see DESIGN.md for the
//! grounding of this simplification).

mod error;
mod feed;
mod link;
mod primary;

pub use error::{ReplicationError, Result};
pub use feed::encode_feed_command;
pub use link::{PrimaryReplicaLink, PrimaryReplicaState, ReplicaLinkState};
pub use primary::{PrimaryReplicationSet, SyncAction};
