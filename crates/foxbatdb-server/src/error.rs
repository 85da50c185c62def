//! Server-level error types, distinct from [`foxbatdb_engine::FoxbatError`]
//! (which maps to RESP replies) because these occur below the protocol
//! layer, where there is no session to reply to yet.

use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] foxbatdb_resp::RespError),

    #[error("failed to bind to {addr}: {source}")]
    BindFailed { addr: std::net::SocketAddr, source: std::io::Error },
}
