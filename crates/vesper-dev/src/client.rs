use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// One decoded RESP reply (spec §4.1's five reply shapes), enough of the
/// wire protocol for test assertions — not a general-purpose client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestReply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<TestReply>),
    NilArray,
}

impl TestReply {
    pub fn status(s: impl Into<String>) -> Self {
        Self::Status(s.into())
    }

    pub fn bulk(b: impl Into<Vec<u8>>) -> Self {
        Self::Bulk(b.into())
    }

    /// Convenience accessor for `Bulk` replies in tests that only care
    /// about the payload as UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Bulk(b) => std::str::from_utf8(b).ok(),
            Self::Status(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A minimal RESP client connection, for driving a [`crate::TestServer`]
/// from integration tests.
pub struct TestClient {
    reader: BufReader<TcpStream>,
}

impl TestClient {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let mut last_err = None;
        for attempt in 0..20 {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
                    return Ok(Self { reader: BufReader::new(stream) });
                }
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(Duration::from_millis(attempt.min(5) * 10));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "connect retries exhausted")))
    }

    /// Sends one command as a multi-bulk request and reads back exactly
    /// one reply.
    pub fn command(&mut self, args: &[&str]) -> io::Result<TestReply> {
        self.send(args)?;
        self.read_reply()
    }

    /// Sends a raw inline line (for exercising the inline-request path of
    /// spec §4.1, e.g. `PING\r\n`) and reads back one reply.
    pub fn inline(&mut self, line: &str) -> io::Result<TestReply> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            stream.write_all(b"\r\n")?;
        }
        stream.flush()?;
        self.read_reply()
    }

    fn send(&mut self, args: &[&str]) -> io::Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for arg in args {
            buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            buf.extend_from_slice(arg.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        let stream = self.reader.get_mut();
        stream.write_all(&buf)?;
        stream.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        if line.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn read_reply(&mut self) -> io::Result<TestReply> {
        let line = self.read_line()?;
        let (tag, rest) = line.split_at(1);
        match tag {
            "+" => Ok(TestReply::Status(rest.to_string())),
            "-" => Ok(TestReply::Error(rest.to_string())),
            ":" => rest
                .parse()
                .map(TestReply::Integer)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad integer reply")),
            "$" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad bulk length"))?;
                if len < 0 {
                    return Ok(TestReply::Nil);
                }
                let mut body = vec![0u8; len as usize];
                self.reader.read_exact(&mut body)?;
                let mut crlf = [0u8; 2];
                self.reader.read_exact(&mut crlf)?;
                Ok(TestReply::Bulk(body))
            }
            "*" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad multi-bulk length"))?;
                if len < 0 {
                    return Ok(TestReply::NilArray);
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(self.read_reply()?);
                }
                Ok(TestReply::Array(items))
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unrecognized reply tag {tag:?}"))),
        }
    }
}
