use std::io;

use thiserror::Error;

use crate::encoding::EncodingError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure reported by the underlying ordered key-value engine.
    #[error("storage engine error: {0}")]
    Storage(#[from] redb::Error),

    /// The on-disk format marker does not match this build. Raised only by `open`.
    #[error("store format mismatch: expected {expected:?}, found {found:?}")]
    FormatMismatch { expected: String, found: String },

    /// A persisted record or key violates an invariant of the layout.
    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("corrupt encoding: {0}")]
    Encoding(#[from] EncodingError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store is closed")]
    Closed,

    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// True for failures caused by corrupt or inconsistent persisted state.
    pub fn is_consistency(&self) -> bool {
        matches!(self, Error::Consistency(_) | Error::Encoding(_))
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        Error::Storage(err.into())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        Error::Storage(err.into())
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        Error::Storage(err.into())
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        Error::Storage(err.into())
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        Error::Storage(err.into())
    }
}
