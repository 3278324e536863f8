//! RESP reply encoding (spec §4.1).

use bytes::{BufMut, BytesMut};

/// One reply value. Variants map 1:1 onto the five RESP reply shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK\r\n`-style status line.
    Status(String),
    /// `-ERR message\r\n`.
    Error(String),
    /// `:123\r\n`.
    Integer(i64),
    /// `$LEN\r\n<payload>\r\n`.
    Bulk(Vec<u8>),
    /// `$-1\r\n`.
    NilBulk,
    /// `*N\r\n` followed by N encoded replies.
    Multi(Vec<Reply>),
    /// `*-1\r\n`.
    NilMulti,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Appends this reply's wire encoding to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::Status(s) => {
                out.put_u8(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.put_u8(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                out.put_u8(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(data) => {
                out.put_u8(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::NilBulk => {
                out.extend_from_slice(b"$-1\r\n");
            }
            Reply::Multi(items) => {
                out.put_u8(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
            Reply::NilMulti => {
                out.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    /// Encodes into a freshly allocated buffer. Convenience wrapper for
    /// callers that aren't accumulating into a shared connection buffer.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_status() {
        assert_eq!(&Reply::ok().to_bytes()[..], b"+OK\r\n");
    }

    #[test]
    fn encodes_error() {
        assert_eq!(
            &Reply::error("ERR wrong number of arguments").to_bytes()[..],
            b"-ERR wrong number of arguments\r\n"
        );
    }

    #[test]
    fn encodes_integer() {
        assert_eq!(&Reply::Integer(42).to_bytes()[..], b":42\r\n");
        assert_eq!(&Reply::Integer(-1).to_bytes()[..], b":-1\r\n");
    }

    #[test]
    fn encodes_bulk() {
        assert_eq!(&Reply::bulk(*b"foo").to_bytes()[..], b"$3\r\nfoo\r\n");
    }

    #[test]
    fn encodes_nil_bulk() {
        assert_eq!(&Reply::NilBulk.to_bytes()[..], b"$-1\r\n");
    }

    #[test]
    fn encodes_nil_multi() {
        assert_eq!(&Reply::NilMulti.to_bytes()[..], b"*-1\r\n");
    }

    #[test]
    fn encodes_nested_multi() {
        let reply = Reply::Multi(vec![
            Reply::bulk(*b"a"),
            Reply::Integer(1),
            Reply::NilBulk,
        ]);
        assert_eq!(
            &reply.to_bytes()[..],
            b"*3\r\n$1\r\na\r\n:1\r\n$-1\r\n"
        );
    }

    #[test]
    fn encodes_empty_multi() {
        assert_eq!(&Reply::Multi(vec![]).to_bytes()[..], b"*0\r\n");
    }
}
