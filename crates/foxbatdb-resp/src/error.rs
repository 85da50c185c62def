use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RespError {
    #[error("protocol error: {0}")]
    Syntax(&'static str),

    #[error("wrong number of arguments for '{0}' command")]
    ArgNumbers(String),

    #[error("unknown command '{0}'")]
    CommandNotFound(String),

    #[error("conflicting options")]
    OptionExclusive,
}
