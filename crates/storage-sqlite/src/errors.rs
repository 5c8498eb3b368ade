use larkmail_core::errors::{DatabaseError, Error};
use thiserror::Error;

/// Storage-layer failures, converted into the shared [`Error`] at the
/// repository boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("{0}")]
    Internal(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Pool(e) => Error::Database(DatabaseError::Pool(e.to_string())),
            StorageError::Query(e) => Error::Database(DatabaseError::Query(e.to_string())),
            StorageError::Connection(e) => Error::Database(DatabaseError::Query(e.to_string())),
            StorageError::Internal(msg) => Error::Database(DatabaseError::Internal(msg)),
        }
    }
}
