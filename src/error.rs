// src/error.rs

//! Error taxonomy of the mapping layer.

use crate::meta::DataType;

/// Errors returned by every `Store` operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure or corruption reported by sled. Never retried.
    #[error("engine error: {0}")]
    Engine(#[from] sled::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The key holds a different type than the operation expects.
    #[error("WRONGTYPE operation expects {expected}, key holds {found}")]
    TypeMismatch { expected: DataType, found: DataType },

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("malformed metadata: {0}")]
    MalformedMeta(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// The key (or element) was never created, was deleted, or has expired.
    #[error("not found")]
    NotFound,

    #[error("version counter exhausted")]
    VersionOverflow,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
