//! Token resolution for the two credential schemes the sync protocol uses:
//! `session <token>` for regular calls and `refresh <token>` for the
//! refresh/revoke pair.

use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use larkmail_core::sync::{epoch_ms_to_iso, RefreshTokenResponse};

use crate::error::{ApiError, ApiResult};

const SESSION_TTL_HOURS: i64 = 24;
const REFRESH_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential<'a> {
    Session(&'a str),
    Refresh(&'a str),
}

pub fn parse_authorization(value: &str) -> Option<Credential<'_>> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    match scheme.to_ascii_lowercase().as_str() {
        "session" => Some(Credential::Session(token)),
        "refresh" => Some(Credential::Refresh(token)),
        _ => None,
    }
}

pub fn credential_from_headers(headers: &HeaderMap) -> ApiResult<Credential<'_>> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_authorization)
        .ok_or(ApiError::Unauthorized)
}

/// Resolve a session token to its user id. Expired and unknown tokens are
/// indistinguishable to the caller.
pub async fn resolve_session(pool: &PgPool, token: &str) -> ApiResult<String> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM sessions WHERE token = $1 AND expires_at > now()")
            .bind(token)
            .fetch_optional(pool)
            .await?;
    row.map(|(user_id,)| user_id).ok_or(ApiError::Unauthorized)
}

/// Exchange a refresh token for a fresh session/refresh pair. The old
/// refresh token is consumed; a rejected or expired one is terminal and the
/// client must re-authenticate.
pub async fn rotate_refresh_token(pool: &PgPool, token: &str) -> ApiResult<RefreshTokenResponse> {
    let mut tx = pool.begin().await?;

    let row: Option<(String, chrono::DateTime<Utc>)> = sqlx::query_as(
        "SELECT user_id, expires_at FROM refresh_tokens WHERE token = $1 FOR UPDATE",
    )
    .bind(token)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((user_id, expires_at)) = row else {
        return Err(ApiError::TokenExpired);
    };
    sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
        .bind(token)
        .execute(&mut *tx)
        .await?;
    if expires_at <= Utc::now() {
        tx.commit().await?;
        return Err(ApiError::TokenExpired);
    }

    let now = Utc::now();
    let session_token = Uuid::new_v4().to_string();
    let refresh_token = Uuid::new_v4().to_string();
    let session_expires = now + Duration::hours(SESSION_TTL_HOURS);
    let refresh_expires = now + Duration::days(REFRESH_TTL_DAYS);

    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(&session_token)
        .bind(&user_id)
        .bind(session_expires)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO refresh_tokens (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(&refresh_token)
        .bind(&user_id)
        .bind(refresh_expires)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    debug!("Rotated refresh token for user {user_id}");
    Ok(RefreshTokenResponse {
        token: session_token,
        refresh_token,
        token_expires_at: epoch_ms_to_iso(session_expires.timestamp_millis()),
        refresh_token_expires_at: epoch_ms_to_iso(refresh_expires.timestamp_millis()),
        user_id,
    })
}

/// Invalidate a credential. Unknown tokens are a no-op, never an error.
pub async fn revoke(pool: &PgPool, credential: Credential<'_>) -> ApiResult<()> {
    match credential {
        Credential::Session(token) => {
            sqlx::query("DELETE FROM sessions WHERE token = $1")
                .bind(token)
                .execute(pool)
                .await?;
        }
        Credential::Refresh(token) => {
            sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
                .bind(token)
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_schemes() {
        assert_eq!(
            parse_authorization("session abc123"),
            Some(Credential::Session("abc123"))
        );
        assert_eq!(
            parse_authorization("refresh r-1"),
            Some(Credential::Refresh("r-1"))
        );
    }

    #[test]
    fn scheme_is_case_insensitive() {
        assert_eq!(
            parse_authorization("Session abc"),
            Some(Credential::Session("abc"))
        );
    }

    #[test]
    fn rejects_unknown_schemes_and_empty_tokens() {
        assert_eq!(parse_authorization("bearer abc"), None);
        assert_eq!(parse_authorization("session "), None);
        assert_eq!(parse_authorization("session"), None);
        assert_eq!(parse_authorization(""), None);
    }
}
