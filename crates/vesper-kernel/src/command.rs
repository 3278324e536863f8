//! Shared types for describing and invoking command handlers.
//!
//! `vesper-kernel` has no dependency on `vesper-wire`: [`Reply`] here is a
//! small, crate-local mirror of `wire::Reply` that `vesper-server`
//! translates to wire bytes. Keeping the two decoupled means the kernel's
//! command handlers are testable without ever constructing a socket or a
//! RESP buffer.

use vesper_types::UnixTime;

use crate::error::KernelError;

/// One reply value a handler produces. Structurally mirrors the RESP reply
/// shapes of spec §4.1; `vesper-server` encodes these to wire bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Status(String),
    Integer(i64),
    Bulk(Vec<u8>),
    NilBulk,
    Multi(Vec<Reply>),
    NilMulti,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(data.into())
    }

    pub fn from_bool(b: bool) -> Self {
        Reply::Integer(i64::from(b))
    }
}

/// Tunable thresholds and other context a handler needs beyond the
/// database and argv: the hash packing thresholds of spec §6, and the
/// current time (the kernel never reads the clock itself).
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext {
    pub now: UnixTime,
    pub hash_max_zipmap_entries: usize,
    pub hash_max_zipmap_value: usize,
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self {
            now: UnixTime::ZERO,
            hash_max_zipmap_entries: 64,
            hash_max_zipmap_value: 512,
        }
    }
}

/// The result of running one command handler: its reply, plus how much the
/// dataset's `dirty` counter should increase (spec §4.5 step 11 uses this
/// delta to decide whether to feed AOF/replicas).
pub struct HandlerResult {
    pub reply: Reply,
    pub dirty: u64,
}

impl HandlerResult {
    pub fn read_only(reply: Reply) -> Self {
        Self { reply, dirty: 0 }
    }

    pub fn wrote(reply: Reply) -> Self {
        Self { reply, dirty: 1 }
    }

    pub fn wrote_n(reply: Reply, dirty: u64) -> Self {
        Self { reply, dirty }
    }
}

pub type HandlerOutcome = Result<HandlerResult, KernelError>;

pub fn ok(reply: Reply) -> HandlerOutcome {
    Ok(HandlerResult::read_only(reply))
}

pub fn wrote(reply: Reply) -> HandlerOutcome {
    Ok(HandlerResult::wrote(reply))
}
