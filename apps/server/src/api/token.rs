//! Refresh-token exchange and credential revocation.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::info;

use larkmail_core::sync::RefreshTokenResponse;

use crate::auth::{credential_from_headers, rotate_refresh_token, revoke, Credential};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `POST /internal/refresh-token`. Consumes the presented refresh token and
/// issues a rotated session/refresh pair.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<RefreshTokenResponse>> {
    let Credential::Refresh(token) = credential_from_headers(&headers)? else {
        return Err(ApiError::Unauthorized);
    };
    let refreshed = rotate_refresh_token(&state.pool, token).await?;
    info!("Issued refreshed tokens for user {}", refreshed.user_id);
    Ok(Json(refreshed))
}

/// `DELETE /internal/revoke-token`. Accepts either credential scheme and is
/// idempotent; revoking an unknown token succeeds.
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let credential = credential_from_headers(&headers)?;
    revoke(&state.pool, credential).await?;
    Ok(Json(serde_json::json!({})))
}
