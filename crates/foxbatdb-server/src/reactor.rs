//! Single-threaded cooperative reactor: one `mio::Poll`, a `TcpListener` at
//! `Token(0)`, a slab-indexed connection map. No thread-per-core sharding,
//! no async runtime: every poll wakeup drains readable sockets, decodes and
//! dispatches every complete command immediately, then flushes writable
//! sockets. No command execution suspends mid-flight.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use foxbatdb_engine::{DatabaseManager, SessionId};
use foxbatdb_resp::{is_write_command, parse, RespValue};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use crate::aof::AofWriter;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};

const LISTENER: Token = Token(0);
const BUFFER_SIZE: usize = 8 * 1024;

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    connections: Slab<Connection>,
    manager: DatabaseManager,
    aof: AofWriter,
    /// Raw RESP frames queued between MULTI and EXEC, flushed to the AOF
    /// only once EXEC completes without aborting.
    tx_log_buffers: HashMap<SessionId, Vec<Bytes>>,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    pub fn bind(addr: SocketAddr, manager: DatabaseManager, aof: AofWriter) -> ServerResult<Self> {
        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::BindFailed { addr, source })?;
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            connections: Slab::new(),
            manager,
            aof,
            tx_log_buffers: HashMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A shared flag the caller can set (e.g. from a signal handler) to stop
    /// [`Reactor::run`] at the next poll wakeup.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs the event loop until the shutdown flag is set.
    pub fn run(&mut self) -> ServerResult<()> {
        let mut events = Events::with_capacity(1024);
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.poll.poll(&mut events, Some(Duration::from_millis(200))) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in &events {
                if event.token() == LISTENER {
                    self.accept_all()?;
                    continue;
                }
                self.service(event.token());
            }

            self.reregister_all()?;
        }
        Ok(())
    }

    fn accept_all(&mut self) -> ServerResult<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _peer)) => {
                    let session = self.manager.register_session();
                    let entry = self.connections.vacant_entry();
                    let token = Token(entry.key() + 1);
                    self.poll.registry().register(&mut stream, token, Interest::READABLE)?;
                    entry.insert(Connection::new(token, session, stream, BUFFER_SIZE));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn service(&mut self, token: Token) {
        let Some(key) = token.0.checked_sub(1) else { return };
        if !self.connections.contains(key) {
            return;
        }

        if let Err(err) = self.connections[key].read() {
            tracing::warn!(%err, "read error, closing connection");
            self.close(key);
            return;
        }

        self.drain_commands(key);

        match self.connections.get_mut(key).map(Connection::write) {
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                tracing::warn!(%err, "write error, closing connection");
                self.close(key);
                return;
            }
            None => return,
        }

        if self.connections[key].closing && self.connections[key].write_buf.is_empty() {
            self.close(key);
        }
    }

    fn drain_commands(&mut self, key: usize) {
        loop {
            let argv = match self.connections[key].try_decode_argv() {
                Ok(Some(argv)) => argv,
                Ok(None) => return,
                Err(err) => {
                    let reply = RespValue::Error(err.to_string());
                    self.connections[key].queue_reply(&reply);
                    self.connections[key].closing = true;
                    return;
                }
            };

            let session = self.connections[key].session;
            let frame = RespValue::Array(argv.iter().map(|a| RespValue::bulk(a.clone())).collect()).to_bytes();

            let command = match parse(argv) {
                Ok(c) => c,
                Err(err) => {
                    self.connections[key].queue_reply(&RespValue::Error(err.to_string()));
                    continue;
                }
            };
            let name = command.name.clone();

            if name == "multi" {
                let reply = self.manager.execute(session, command);
                if matches!(reply, RespValue::SimpleString(_)) {
                    self.tx_log_buffers.insert(session, Vec::new());
                }
                self.connections[key].queue_reply(&reply);
                self.deliver_pending_pushes();
                continue;
            }

            if name == "discard" {
                let reply = self.manager.execute(session, command);
                self.tx_log_buffers.remove(&session);
                self.connections[key].queue_reply(&reply);
                self.deliver_pending_pushes();
                continue;
            }

            let reply = self.manager.execute(session, command);
            let is_error = matches!(reply, RespValue::Error(_));

            if name == "exec" {
                if let Some(buffered) = self.tx_log_buffers.remove(&session) {
                    if !is_error {
                        for queued_frame in buffered {
                            self.aof.push(queued_frame);
                        }
                    }
                }
            } else if matches!(reply, RespValue::SimpleString(ref s) if s == "QUEUED") {
                self.tx_log_buffers.entry(session).or_default().push(frame);
            } else if is_write_command(&name) && !is_error {
                self.aof.push(frame);
            }

            self.connections[key].queue_reply(&reply);
            self.deliver_pending_pushes();
        }
    }

    /// Delivers PUBLISH/SUBSCRIBE push messages queued for sessions other
    /// than the one that just dispatched (the manager has no socket access).
    fn deliver_pending_pushes(&mut self) {
        for (session, push) in self.manager.take_pending_pushes() {
            if let Some((key, _)) =
                self.connections.iter().find(|(_, conn)| conn.session == session)
            {
                self.connections[key].queue_reply(&push);
            }
        }
    }

    fn close(&mut self, key: usize) {
        if self.connections.contains(key) {
            let conn = self.connections.remove(key);
            self.manager.deregister_session(conn.session);
            self.tx_log_buffers.remove(&conn.session);
        }
    }

    fn reregister_all(&mut self) -> ServerResult<()> {
        for (_, conn) in self.connections.iter_mut() {
            let token = conn.token;
            let interest = conn.interest();
            self.poll.registry().reregister(&mut conn.stream, token, interest)?;
        }
        Ok(())
    }
}
