use thiserror::Error;

/// What a `NotFound` error failed to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Collection,
    Document,
    Index,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collection => write!(f, "collection"),
            Self::Document => write!(f, "document"),
            Self::Index => write!(f, "index"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BSON: {0}")]
    Bson(#[from] bson::error::Error),

    #[error("data corruption: {0}")]
    Corrupted(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: NotFoundKind, name: String },

    #[error("unique index violation on '{index}': duplicate key {key}")]
    Conflict { index: String, key: String },

    #[error("invalid credentials for protected database")]
    Unauthorized,

    #[error("unsupported predicate: {0}")]
    Unsupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("engine has been closed")]
    Disposed,

    #[error("operation timed out")]
    Timeout,

    #[error("a transaction is already active")]
    TransactionActive,
}

impl Error {
    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        Self::Corrupted(reason.into())
    }

    pub(crate) fn not_found(kind: NotFoundKind, name: impl Into<String>) -> Self {
        Self::NotFound { kind, name: name.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
