//! Shared error types used across the larkmail crates.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Database-layer failures surfaced through storage crates.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection pool exhaustion or checkout failure
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Query execution failure
    #[error("Query error: {0}")]
    Query(String),

    /// Anything else the storage layer cannot classify
    #[error("{0}")]
    Internal(String),
}

/// Top-level error for domain and storage operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an internal database error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Database(DatabaseError::Internal(message.into()))
    }
}
