//! Wire-level protocol errors. These always mean "close the connection" per
//! spec §7's "Protocol error" row.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Protocol error: invalid multibulk length")]
    InvalidMultibulkLength,

    #[error("Protocol error: expected '$', got '{0}'")]
    ExpectedBulkMarker(char),

    #[error("Protocol error: invalid bulk length")]
    InvalidBulkLength,

    #[error("Protocol error: unbalanced quotes in request")]
    UnbalancedQuotes,

    #[error("Protocol error: too big inline request")]
    InlineRequestTooBig,

    #[error("invalid bulk write count")]
    BulkBodyTooBig,
}
