//! RESP reply values and their wire encoding.

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// `None` encodes the RESP null bulk string (`$-1\r\n`).
    BulkString(Option<Bytes>),
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    pub fn nil() -> Self {
        Self::BulkString(None)
    }

    pub fn bulk(bytes: impl Into<Bytes>) -> Self {
        Self::BulkString(Some(bytes.into()))
    }

    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                out.put_u8(b'+');
                out.put_slice(s.as_bytes());
                out.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                out.put_u8(b'-');
                out.put_slice(s.as_bytes());
                out.put_slice(b"\r\n");
            }
            RespValue::Integer(i) => {
                out.put_u8(b':');
                out.put_slice(i.to_string().as_bytes());
                out.put_slice(b"\r\n");
            }
            RespValue::BulkString(None) => {
                out.put_slice(b"$-1\r\n");
            }
            RespValue::BulkString(Some(bytes)) => {
                out.put_u8(b'$');
                out.put_slice(bytes.len().to_string().as_bytes());
                out.put_slice(b"\r\n");
                out.put_slice(bytes);
                out.put_slice(b"\r\n");
            }
            RespValue::Array(items) => {
                out.put_u8(b'*');
                out.put_slice(items.len().to_string().as_bytes());
                out.put_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_simple_string() {
        assert_eq!(RespValue::ok().to_bytes().as_ref(), b"+OK\r\n");
    }

    #[test]
    fn encodes_nil_bulk_string() {
        assert_eq!(RespValue::nil().to_bytes().as_ref(), b"$-1\r\n");
    }

    #[test]
    fn encodes_bulk_string() {
        assert_eq!(RespValue::bulk(&b"bar"[..]).to_bytes().as_ref(), b"$3\r\nbar\r\n");
    }

    #[test]
    fn encodes_array_of_replies() {
        let value = RespValue::Array(vec![RespValue::ok(), RespValue::ok()]);
        assert_eq!(value.to_bytes().as_ref(), b"*2\r\n+OK\r\n+OK\r\n");
    }

    #[test]
    fn encodes_error() {
        assert_eq!(
            RespValue::Error("ERR boom".to_string()).to_bytes().as_ref(),
            b"-ERR boom\r\n"
        );
    }
}
