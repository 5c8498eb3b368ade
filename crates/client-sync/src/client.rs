//! HTTP client for the larkmail changes endpoint and token routes.

use std::time::Duration;

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use larkmail_core::sync::{ApiErrorBody, ChangesPush, ChangesResponse, RefreshTokenResponse};

use crate::error::{Result, SyncError};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Authorization scheme carried on each request. Sync calls authenticate
/// with the session token; the refresh and revoke routes accept the
/// refresh token under its own scheme.
#[derive(Debug, Clone, Copy)]
pub enum AuthScheme {
    Session,
    Refresh,
}

impl AuthScheme {
    fn prefix(&self) -> &'static str {
        match self {
            AuthScheme::Session => "session",
            AuthScheme::Refresh => "refresh",
        }
    }
}

/// Client for one larkmail API origin.
#[derive(Debug, Clone)]
pub struct ChangesApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ChangesApiClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn headers(&self, scheme: AuthScheme, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("{} {}", scheme.prefix(), token))
            .map_err(|_| SyncError::invalid_request("Invalid token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            // Try to parse the structured error body
            if let Ok(error) = serde_json::from_str::<ApiErrorBody>(&body) {
                let message = match error.more_info {
                    Some(more_info) => format!("{}: {}", error.error, more_info),
                    None => error.error,
                };
                return Err(SyncError::api(status.as_u16(), message));
            }
            return Err(SyncError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            SyncError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Pull changes since `last_sync`.
    ///
    /// GET /sync?last_sync=<epoch_ms>&minimal=<bool>
    pub async fn get_changes(
        &self,
        token: &str,
        last_sync: i64,
        minimal: bool,
    ) -> Result<ChangesResponse> {
        let url = format!(
            "{}/sync?last_sync={}&minimal={}",
            self.base_url, last_sync, minimal
        );
        debug!("Pulling changes since {}", last_sync);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(AuthScheme::Session, token)?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Push dirty rows and pull changes in one round trip. The response is
    /// computed from the supplied pre-push watermark.
    ///
    /// POST /sync?last_sync=<epoch_ms>
    pub async fn post_changes(
        &self,
        token: &str,
        last_sync: i64,
        push: &ChangesPush,
    ) -> Result<ChangesResponse> {
        let url = format!("{}/sync?last_sync={}", self.base_url, last_sync);
        debug!("Pushing {} mutations", push.len());

        let response = self
            .client
            .post(&url)
            .headers(self.headers(AuthScheme::Session, token)?)
            .json(push)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Exchange a refresh token for a rotated session/refresh token pair.
    ///
    /// POST /internal/refresh-token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshTokenResponse> {
        let url = format!("{}/internal/refresh-token", self.base_url);
        debug!("Refreshing access token");

        let response = self
            .client
            .post(&url)
            .headers(self.headers(AuthScheme::Refresh, refresh_token)?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Revoke a credential. Idempotent server-side; revoking an unknown
    /// token succeeds.
    ///
    /// DELETE /internal/revoke-token
    pub async fn revoke_token(&self, scheme: AuthScheme, token: &str) -> Result<()> {
        let url = format!("{}/internal/revoke-token", self.base_url);

        let response = self
            .client
            .delete(&url)
            .headers(self.headers(scheme, token)?)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);
        if !status.is_success() {
            return Err(SyncError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed() {
        let client = ChangesApiClient::new("http://localhost:9999///");
        assert_eq!(client.base_url, "http://localhost:9999");
    }

    #[test]
    fn auth_scheme_prefixes() {
        assert_eq!(AuthScheme::Session.prefix(), "session");
        assert_eq!(AuthScheme::Refresh.prefix(), "refresh");
    }
}
