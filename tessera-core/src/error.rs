use thiserror::Error;

#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("key not found")]
    NotFound,

    #[error("nil key given")]
    NilKey,

    #[error("not enough shards available")]
    ShardsUnavailable,

    #[error("unexpected shards count: expected {expected}, got {actual}")]
    UnexpectedShardsCount { expected: usize, actual: usize },

    #[error("invalid data size: expected {expected}, got {actual}")]
    InvalidDataSize { expected: usize, actual: usize },

    #[error("object chunk #{index}'s data and hash do not match")]
    IntegrityMismatch { index: usize },

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("operation timed out")]
    Timeout,

    #[error("backend unavailable")]
    Unavailable,

    #[error("operation cancelled")]
    Cancelled,

    #[error("no space left on namespace: {0}")]
    NamespaceFull(String),

    #[error("invalid epoch range")]
    InvalidEpochRange,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal {kind} error: {cause}")]
    Internal { kind: String, cause: String },
}

impl TesseraError {
    pub fn internal(kind: impl Into<String>, cause: impl ToString) -> Self {
        Self::Internal {
            kind: kind.into(),
            cause: cause.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<redis::RedisError> for TesseraError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_connection_refusal() || err.is_connection_dropped() {
            return Self::Unavailable;
        }
        Self::internal("REDIS", err)
    }
}

pub type Result<T> = std::result::Result<T, TesseraError>;
