//! RESP-compatible request protocol: incremental decoding of command
//! frames, the typed `Command`/`CommandOption` model, and reply encoding.

pub mod command;
pub mod decode;
pub mod error;
pub mod value;

pub use command::{is_write_command, parse, Command, CommandOption, CommandOptionKind};
pub use decode::decode_command;
pub use error::RespError;
pub use value::RespValue;
