//! The network-facing half (components L and N): a single-threaded `mio`
//! reactor serving the RESP protocol, and the AOF background writer.

pub mod aof;
pub mod connection;
pub mod error;
pub mod reactor;

pub use aof::{AofHandle, AofWriter};
pub use error::{ServerError, ServerResult};
pub use reactor::Reactor;
