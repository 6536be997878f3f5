use thiserror::Error;

/// Failures from parsing or composing a wire message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad magic: expected {expected:?}, got {found:?}")]
    BadMagic { expected: &'static str, found: String },
    #[error("message has too few fields: {0:?}")]
    TooFewFields(String),
    #[error("invalid node id: {0:?}")]
    InvalidId(String),
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
    #[error("unknown verb: {0:?}")]
    UnknownVerb(String),
    #[error("missing argument {index} for verb {verb}")]
    MissingArgument { verb: &'static str, index: usize },
    #[error("invalid relation: {0:?}")]
    InvalidRelation(String),
}

/// Top-level error type returned by the core crate's fallible operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
