//! Incremental inline/multi-bulk request parser (spec §4.1).

use bytes::{Buf, BytesMut};

use crate::error::WireError;
use crate::{MAX_BULK_BODY, MAX_BULK_COUNT, MAX_INLINE_LINE, Request};

/// Result of one parse attempt.
#[derive(Debug)]
pub enum ParseOutcome {
    /// A full request was assembled; `buf` has been advanced past it.
    Complete(Request),
    /// Not enough data yet; try again once more bytes have arrived.
    Incomplete,
}

#[derive(Debug)]
enum State {
    /// No partial multi-bulk request in progress; next line determines the
    /// framing (inline, or `*N` starting a multi-bulk request).
    Idle,
    /// Saw `*N`; now collecting N bulk arguments.
    CollectingBulks {
        argv: Vec<Vec<u8>>,
        remaining: i64,
    },
    /// Mid-argument: saw `$LEN`, waiting for `LEN` bytes plus the trailing
    /// `\r\n` (spec §4.5 step 5: "suspend parsing until it arrives").
    ReadingBulkBody {
        argv: Vec<Vec<u8>>,
        remaining: i64,
        expected_len: usize,
    },
}

/// Per-connection parser state. One instance per client; `parse` is called
/// every time new bytes are appended to the connection's read buffer.
#[derive(Debug)]
pub struct RequestParser {
    state: State,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    /// Attempts to parse one request out of `buf`, advancing it past
    /// whatever was consumed. Call again after the caller reads more bytes
    /// into `buf` if this returns `Incomplete`.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<ParseOutcome, WireError> {
        loop {
            match &mut self.state {
                State::Idle => {
                    let Some(line_end) = find_line_end(buf) else {
                        if buf.len() as i64 > MAX_INLINE_LINE as i64 {
                            return Err(WireError::InlineRequestTooBig);
                        }
                        return Ok(ParseOutcome::Incomplete);
                    };
                    if buf.first() == Some(&b'*') {
                        let count = parse_signed_line(&buf[1..line_end])?;
                        consume_line(buf, line_end);
                        if count <= 0 {
                            // Empty multi-bulk request: ignore and keep reading.
                            continue;
                        }
                        if count > MAX_BULK_COUNT {
                            return Err(WireError::InvalidMultibulkLength);
                        }
                        self.state = State::CollectingBulks {
                            argv: Vec::with_capacity(count as usize),
                            remaining: count,
                        };
                    } else {
                        let line = &buf[..line_end];
                        let argv = split_inline(line)?;
                        consume_line(buf, line_end);
                        if argv.is_empty() {
                            // Blank line: keep reading, matches redis-server behavior.
                            continue;
                        }
                        return Ok(ParseOutcome::Complete(Request::new(argv)));
                    }
                }
                State::CollectingBulks { remaining, .. } if *remaining == 0 => {
                    let State::CollectingBulks { argv, .. } =
                        std::mem::replace(&mut self.state, State::Idle)
                    else {
                        unreachable!()
                    };
                    return Ok(ParseOutcome::Complete(Request::new(argv)));
                }
                State::CollectingBulks { .. } => {
                    let Some(line_end) = find_line_end(buf) else {
                        return Ok(ParseOutcome::Incomplete);
                    };
                    if buf.first() != Some(&b'$') {
                        return Err(WireError::ExpectedBulkMarker(
                            buf.first().copied().unwrap_or(b'?') as char,
                        ));
                    }
                    let len = parse_signed_line(&buf[1..line_end])?;
                    if len > MAX_BULK_BODY {
                        return Err(WireError::BulkBodyTooBig);
                    }
                    if len < 0 {
                        return Err(WireError::InvalidBulkLength);
                    }
                    consume_line(buf, line_end);

                    let State::CollectingBulks { argv, remaining } =
                        std::mem::replace(&mut self.state, State::Idle)
                    else {
                        unreachable!()
                    };
                    self.state = State::ReadingBulkBody {
                        argv,
                        remaining,
                        expected_len: len as usize,
                    };
                }
                State::ReadingBulkBody { expected_len, .. } => {
                    let need = *expected_len + 2; // body + trailing CRLF
                    if buf.len() < need {
                        return Ok(ParseOutcome::Incomplete);
                    }
                    let State::ReadingBulkBody {
                        mut argv,
                        remaining,
                        expected_len,
                    } = std::mem::replace(&mut self.state, State::Idle)
                    else {
                        unreachable!()
                    };
                    let body = buf[..expected_len].to_vec();
                    buf.advance(expected_len + 2);
                    argv.push(body);
                    self.state = State::CollectingBulks {
                        argv,
                        remaining: remaining - 1,
                    };
                }
            }
        }
    }
}

/// Finds the index of `\n` in `buf`, returning the index *excluding* the
/// trailing `\r\n` or bare `\n` (spec §4.1 accepts bare `\n` for inline).
fn find_line_end(buf: &[u8]) -> Option<usize> {
    let nl = buf.iter().position(|&b| b == b'\n')?;
    if nl > 0 && buf[nl - 1] == b'\r' {
        Some(nl - 1)
    } else {
        Some(nl)
    }
}

/// Advances `buf` past a line ending at `line_end` (exclusive of any
/// trailing `\r`), including the terminator itself.
fn consume_line(buf: &mut BytesMut, line_end: usize) {
    let terminator_len = if buf.get(line_end) == Some(&b'\r') { 2 } else { 1 };
    buf.advance(line_end + terminator_len);
}

fn parse_signed_line(line: &[u8]) -> Result<i64, WireError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or(WireError::InvalidMultibulkLength)
}

/// Splits an inline request line on runs of spaces/tabs, honoring single
/// and double quotes the way redis-server's `sdssplitargs` does.
fn split_inline(line: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    let mut args = Vec::new();
    let mut i = 0;
    while i < line.len() {
        while i < line.len() && (line[i] == b' ' || line[i] == b'\t') {
            i += 1;
        }
        if i >= line.len() {
            break;
        }
        let mut current = Vec::new();
        if line[i] == b'"' {
            i += 1;
            let mut closed = false;
            while i < line.len() {
                if line[i] == b'\\' && i + 1 < line.len() {
                    current.push(unescape(line[i + 1]));
                    i += 2;
                } else if line[i] == b'"' {
                    i += 1;
                    closed = true;
                    break;
                } else {
                    current.push(line[i]);
                    i += 1;
                }
            }
            if !closed {
                return Err(WireError::UnbalancedQuotes);
            }
        } else if line[i] == b'\'' {
            i += 1;
            let mut closed = false;
            while i < line.len() {
                if line[i] == b'\'' {
                    i += 1;
                    closed = true;
                    break;
                }
                current.push(line[i]);
                i += 1;
            }
            if !closed {
                return Err(WireError::UnbalancedQuotes);
            }
        } else {
            while i < line.len() && line[i] != b' ' && line[i] != b'\t' {
                current.push(line[i]);
                i += 1;
            }
        }
        args.push(current);
    }
    Ok(args)
}

fn unescape(byte: u8) -> u8 {
    match byte {
        b'n' => b'\n',
        b'r' => b'\r',
        b't' => b'\t',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Request> {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        loop {
            match parser.parse(&mut buf).unwrap() {
                ParseOutcome::Complete(req) => out.push(req),
                ParseOutcome::Incomplete => break,
            }
        }
        out
    }

    #[test]
    fn parses_inline_request() {
        let reqs = parse_all(b"PING\r\n");
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].argv, vec![b"PING".to_vec()]);
    }

    #[test]
    fn parses_inline_with_bare_newline() {
        let reqs = parse_all(b"SET foo bar\n");
        assert_eq!(reqs[0].argv, vec![b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()]);
    }

    #[test]
    fn parses_multibulk_request() {
        let reqs = parse_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
        assert_eq!(reqs.len(), 1);
        assert_eq!(
            reqs[0].argv,
            vec![b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()]
        );
    }

    #[test]
    fn incremental_feed_across_multiple_chunks() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"*2\r\n$3\r\nGET\r\n");
        assert!(matches!(
            parser.parse(&mut buf).unwrap(),
            ParseOutcome::Incomplete
        ));
        buf.extend_from_slice(b"$3\r\nfoo\r\n");
        match parser.parse(&mut buf).unwrap() {
            ParseOutcome::Complete(req) => {
                assert_eq!(req.argv, vec![b"GET".to_vec(), b"foo".to_vec()]);
            }
            ParseOutcome::Incomplete => panic!("expected complete request"),
        }
    }

    #[test]
    fn handles_multiple_requests_in_one_buffer() {
        let reqs = parse_all(b"PING\r\nPING\r\n");
        assert_eq!(reqs.len(), 2);
    }

    #[test]
    fn quoted_inline_arguments_support_escapes() {
        let reqs = parse_all(b"SET foo \"bar\\nbaz\"\r\n");
        assert_eq!(reqs[0].argv[2], b"bar\nbaz".to_vec());
    }

    #[test]
    fn unbalanced_quotes_is_a_protocol_error() {
        let mut parser = RequestParser::new();
        let mut buf = BytesMut::from(&b"SET foo \"bar\r\n"[..]);
        assert!(parser.parse(&mut buf).is_err());
    }
}
