//! Error types for the client sync crate.

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Retry policy class for sync failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors that can occur during a sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the changes endpoint
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Both the access token and the refresh exchange failed; the caller
    /// must force a fresh login. Never retried within a cycle.
    #[error("Token expired")]
    TokenExpired,

    /// Local store failure
    #[error("Store error: {0}")]
    Store(#[from] larkmail_core::Error),

    /// Invalid request (missing identity, malformed token, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SyncError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(_) => ApiRetryClass::Retryable,
            Self::Json(_) => ApiRetryClass::Permanent,
            Self::TokenExpired => ApiRetryClass::ReauthRequired,
            Self::Store(_) => ApiRetryClass::Permanent,
            Self::InvalidRequest(_) => ApiRetryClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_for_unauthorized_is_reauth() {
        let err = SyncError::api(401, "unauthorized");
        assert_eq!(err.retry_class(), ApiRetryClass::ReauthRequired);
    }

    #[test]
    fn retry_class_for_server_errors_is_retryable() {
        assert_eq!(SyncError::api(503, "down").retry_class(), ApiRetryClass::Retryable);
        assert_eq!(SyncError::api(400, "bad").retry_class(), ApiRetryClass::Permanent);
    }

    #[test]
    fn token_expired_message_matches_wire_contract() {
        assert_eq!(SyncError::TokenExpired.to_string(), "Token expired");
    }
}
