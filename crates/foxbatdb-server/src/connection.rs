//! Per-connection state: buffers, the non-blocking read/write loop, and
//! incremental RESP command decoding.

use std::io::{self, Read, Write};

use bytes::BytesMut;
use foxbatdb_engine::SessionId;
use foxbatdb_resp::{decode_command, RespError};
use mio::net::TcpStream;
use mio::{Interest, Token};

pub struct Connection {
    #[allow(dead_code)]
    pub token: Token,
    pub session: SessionId,
    pub stream: TcpStream,
    pub read_buf: BytesMut,
    pub write_buf: BytesMut,
    pub closing: bool,
}

impl Connection {
    pub fn new(token: Token, session: SessionId, stream: TcpStream, buffer_size: usize) -> Self {
        Self {
            token,
            session,
            stream,
            read_buf: BytesMut::with_capacity(buffer_size),
            write_buf: BytesMut::with_capacity(buffer_size),
            closing: false,
        }
    }

    /// Reads data from the socket into the read buffer.
    ///
    /// Returns `true` if the connection is still open.
    pub fn read(&mut self) -> io::Result<bool> {
        let mut temp_buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut temp_buf) {
                Ok(0) => return Ok(false),
                Ok(n) => self.read_buf.extend_from_slice(&temp_buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes as much of the write buffer as the socket will accept.
    ///
    /// Returns `true` if the buffer was fully drained.
    pub fn write(&mut self) -> io::Result<bool> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write to socket"));
                }
                Ok(n) => {
                    let _ = self.write_buf.split_to(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Attempts to decode one RESP frame's raw argv from the read buffer.
    pub fn try_decode_argv(&mut self) -> Result<Option<Vec<bytes::Bytes>>, RespError> {
        decode_command(&mut self.read_buf)
    }

    pub fn queue_reply(&mut self, reply: &foxbatdb_resp::RespValue) {
        reply.encode(&mut self.write_buf);
    }

    pub fn interest(&self) -> Interest {
        if self.write_buf.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }
}
