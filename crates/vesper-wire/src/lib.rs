//! # vesper-wire: RESP request/reply framing for Vesper
//!
//! Implements the two request formats and the reply types of spec §4.1:
//!
//! - **Inline**: a single line terminated by `\r\n` (or bare `\n`), split on
//!   spaces into an argument vector.
//! - **Multi-bulk**: `*N\r\n` followed by N `$LEN\r\n<LEN bytes>\r\n` pairs.
//!
//! The parser ([`RequestParser`]) is incremental: it consumes as much of an
//! input buffer as forms complete requests and reports how much input it
//! needs before it can make more progress, so callers can keep reading from
//! a socket without re-parsing from scratch.

mod error;
mod parser;
mod reply;

pub use error::WireError;
pub use parser::{ParseOutcome, RequestParser};
pub use reply::Reply;

/// Hard limits from spec §4.1.
pub const MAX_INLINE_LINE: usize = 256 * 1024 * 1024;
pub const MAX_BULK_COUNT: i64 = 256 * 1024 * 1024;
pub const MAX_BULK_BODY: i64 = 1024 * 1024 * 1024;

/// A fully parsed request: the argument vector, with argv[0] conventionally
/// the command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub argv: Vec<Vec<u8>>,
}

impl Request {
    pub fn new(argv: Vec<Vec<u8>>) -> Self {
        Self { argv }
    }

    pub fn command_name(&self) -> Option<&[u8]> {
        self.argv.first().map(Vec::as_slice)
    }

    /// Encodes this request's argv as a multi-bulk request
    /// (`*N\r\n($LEN\r\n<bytes>\r\n)*`). Used by the AOF writer (spec §4.6)
    /// and the replica command feed (spec §4.8), both of which transmit
    /// commands in the same wire form clients send them in.
    pub fn encode_multibulk(&self) -> Vec<u8> {
        encode_multibulk(&self.argv)
    }
}

/// Encodes an argument vector as a multi-bulk request, independent of any
/// [`Request`] wrapper — used wherever a command needs re-serializing
/// (AOF append, replica feed) without round-tripping through the parser.
pub fn encode_multibulk(argv: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("*{}\r\n", argv.len()).as_bytes());
    for arg in argv {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}
