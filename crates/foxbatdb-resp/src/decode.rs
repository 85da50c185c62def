//! Incremental parser for RESP arrays of bulk strings
//! (`*<argc>\r\n$<len>\r\n<bytes>\r\n...`), the only request shape clients
//! send.

use bytes::{Bytes, BytesMut};

use crate::error::RespError;

/// Attempts to decode one full command frame from the front of `buf`.
/// Returns `Ok(None)` when `buf` holds a partial frame (the caller should
/// wait for more bytes from the socket); consumes the frame's bytes from
/// `buf` on success.
pub fn decode_command(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, RespError> {
    let Some(header_end) = find_crlf(buf, 0) else {
        return Ok(None);
    };
    if buf[0] != b'*' {
        return Err(RespError::Syntax("expected array header"));
    }
    let argc: i64 = parse_int(&buf[1..header_end])?;
    if argc < 0 {
        return Ok(Some(Vec::new()));
    }
    let argc = argc as usize;

    let mut cursor = header_end + 2;
    let mut args = Vec::with_capacity(argc);

    for _ in 0..argc {
        let Some(len_end) = find_crlf(buf, cursor) else {
            return Ok(None);
        };
        if buf.get(cursor) != Some(&b'$') {
            return Err(RespError::Syntax("expected bulk string header"));
        }
        let len: i64 = parse_int(&buf[cursor + 1..len_end])?;
        if len < 0 {
            return Err(RespError::Syntax("negative bulk length"));
        }
        let len = len as usize;
        let data_start = len_end + 2;
        let data_end = data_start + len;
        if buf.len() < data_end + 2 {
            return Ok(None);
        }
        args.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
        cursor = data_end + 2;
    }

    let _ = buf.split_to(cursor);
    Ok(Some(args))
}

fn find_crlf(buf: &BytesMut, from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

fn parse_int(bytes: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(RespError::Syntax("expected integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_complete_frame() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"[..]);
        let args = decode_command(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![Bytes::from_static(b"foo"), Bytes::from_static(b"bar")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn returns_none_on_partial_frame() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n"[..]);
        assert!(decode_command(&mut buf).unwrap().is_none());
        // Partial frame must not be consumed.
        assert!(!buf.is_empty());
    }

    #[test]
    fn decodes_two_frames_back_to_back() {
        let mut buf = BytesMut::from(&b"*1\r\n$3\r\nfoo\r\n*1\r\n$3\r\nbar\r\n"[..]);
        let first = decode_command(&mut buf).unwrap().unwrap();
        assert_eq!(first, vec![Bytes::from_static(b"foo")]);
        let second = decode_command(&mut buf).unwrap().unwrap();
        assert_eq!(second, vec![Bytes::from_static(b"bar")]);
    }

    #[test]
    fn rejects_malformed_header() {
        let mut buf = BytesMut::from(&b"#2\r\n"[..]);
        assert!(decode_command(&mut buf).is_err());
    }
}
