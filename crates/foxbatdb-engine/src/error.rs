//! Error taxonomy shared by every command path, mapped to RESP error
//! replies at the dispatch boundary.

use foxbatdb_resp::RespValue;
use thiserror::Error;

pub type FoxbatResult<T> = Result<T, FoxbatError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FoxbatError {
    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR wrong number of arguments for '{0}' command")]
    ArgNumbers(String),

    #[error("ERR unknown command '{0}'")]
    CommandNotFound(String),

    #[error("ERR option exclusivity violated")]
    OptionExclusive,

    #[error("ERR command not allowed inside a transaction")]
    InvalidTxCmd,

    #[error("ERR MULTI calls can not be nested")]
    AlreadyInTx,

    #[error("ERR EXEC without MULTI")]
    NotInTx,

    #[error("ERR no such key")]
    KeyNotFound,

    #[error("ERR key already exists")]
    KeyAlreadyExists,

    #[error("ERR db index out of range")]
    DbIndexOutOfRange,

    #[error("OOM command not allowed, engine is in read-only mode")]
    MemoryOut,

    #[error("EXECABORT Transaction discarded because a watched key was modified")]
    WatchedKeyModified,

    #[error("EXECABORT Transaction failed")]
    TxError,

    #[error("ERR internal error: {0}")]
    Internal(String),
}

impl FoxbatError {
    pub fn to_resp(&self) -> RespValue {
        RespValue::Error(self.to_string())
    }
}

impl From<foxbatdb_resp::RespError> for FoxbatError {
    fn from(err: foxbatdb_resp::RespError) -> Self {
        match err {
            foxbatdb_resp::RespError::Syntax(_) => FoxbatError::Syntax,
            foxbatdb_resp::RespError::ArgNumbers(name) => FoxbatError::ArgNumbers(name),
            foxbatdb_resp::RespError::CommandNotFound(name) => FoxbatError::CommandNotFound(name),
            foxbatdb_resp::RespError::OptionExclusive => FoxbatError::OptionExclusive,
        }
    }
}

impl From<foxbatdb_storage::StorageError> for FoxbatError {
    fn from(err: foxbatdb_storage::StorageError) -> Self {
        FoxbatError::Internal(err.to_string())
    }
}
