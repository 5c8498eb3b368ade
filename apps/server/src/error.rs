//! HTTP error surface for the changes endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use larkmail_core::sync::ApiErrorBody;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{error}")]
    BadRequest {
        error: String,
        more_info: Option<String>,
    },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Token expired")]
    TokenExpired,
    #[error("{error}")]
    Forbidden {
        error: String,
        more_info: Option<String>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>) -> Self {
        ApiError::BadRequest {
            error: error.into(),
            more_info: None,
        }
    }

    pub fn bad_request_with(error: impl Into<String>, more_info: impl Into<String>) -> Self {
        ApiError::BadRequest {
            error: error.into(),
            more_info: Some(more_info.into()),
        }
    }

    pub fn forbidden(error: impl Into<String>, more_info: impl Into<String>) -> Self {
        ApiError::Forbidden {
            error: error.into(),
            more_info: Some(more_info.into()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest { error, more_info } => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody {
                    error,
                    more_info,
                    link: None,
                },
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody {
                    error: "Unauthorized".to_string(),
                    more_info: None,
                    link: None,
                },
            ),
            ApiError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody {
                    error: "Token expired".to_string(),
                    more_info: None,
                    link: None,
                },
            ),
            ApiError::Forbidden { error, more_info } => (
                StatusCode::FORBIDDEN,
                ApiErrorBody {
                    error,
                    more_info,
                    link: None,
                },
            ),
            ApiError::NotFound(error) => (
                StatusCode::NOT_FOUND,
                ApiErrorBody {
                    error,
                    more_info: None,
                    link: None,
                },
            ),
            ApiError::Internal(message) => {
                error!("Internal error: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorBody {
                        error: "Internal server error".to_string(),
                        more_info: None,
                        link: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
