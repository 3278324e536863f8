//! Command-visible error taxonomy (spec §7).
//!
//! Every variant here corresponds to one row of spec §7's error table and
//! carries the exact `-ERR`/`-WRONGTYPE`-prefixed text a client sees. This
//! is deliberately a small, closed enum: internal errors from other crates
//! (I/O failures, corrupt RDB records) are translated to `KernelError::Io`
//! or similar at the boundary rather than having their `Display` text leak
//! through verbatim, per SPEC_FULL §0.2.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR value is out of range")]
    OutOfRange,

    #[error("ERR index out of range")]
    IndexOutOfRange,

    #[error("ERR value is not a double")]
    NotADouble,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR command not allowed when used memory > 'maxmemory'")]
    OomRefusal,

    #[error("ERR operation not permitted")]
    AuthRequired,

    #[error("ERR {0}")]
    BackgroundBusy(String),

    #[error("ERR {0}")]
    Other(String),
}

impl KernelError {
    pub fn syntax() -> Self {
        KernelError::SyntaxError
    }

    pub fn wrong_arity(name: impl Into<String>) -> Self {
        KernelError::WrongArity(name.into())
    }
}
