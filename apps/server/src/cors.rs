//! Origin gate, evaluated before any auth work.
//!
//! Browsers only; requests without an `Origin` header (curl, server-side
//! callers, the desktop client) pass through. A disallowed origin gets a
//! bodyless 403 and the request never reaches a handler.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    exact: Vec<String>,
    parent_domains: Vec<String>,
}

impl CorsPolicy {
    pub fn new(exact: Vec<String>, parent_domains: Vec<String>) -> Self {
        Self {
            exact,
            parent_domains,
        }
    }

    /// Exact allow-list match, or a wildcard suffix match against the
    /// configured parent domains (`https://mail.larkmail.app` is allowed by
    /// parent domain `larkmail.app`).
    pub fn allows(&self, origin: &str) -> bool {
        if self.exact.iter().any(|o| o == origin) {
            return true;
        }
        let Some(host) = origin_host(origin) else {
            return false;
        };
        self.parent_domains
            .iter()
            .any(|parent| host == *parent || host.ends_with(&format!(".{parent}")))
    }
}

fn origin_host(origin: &str) -> Option<&str> {
    let rest = origin.split_once("://").map(|(_, rest)| rest)?;
    let host = rest.split('/').next().unwrap_or(rest);
    Some(host.split(':').next().unwrap_or(host))
}

pub async fn origin_gate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match origin {
        None => next.run(request).await,
        Some(origin) if state.cors.allows(&origin) => {
            let mut response = next.run(request).await;
            if let Ok(value) = HeaderValue::from_str(&origin) {
                response
                    .headers_mut()
                    .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                response
                    .headers_mut()
                    .insert(header::VARY, HeaderValue::from_static("Origin"));
            }
            response
        }
        Some(origin) => {
            warn!("Rejected request from origin {origin}");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CorsPolicy {
        CorsPolicy::new(
            vec!["http://localhost:3000".to_string()],
            vec!["larkmail.app".to_string(), "larkmail.dev".to_string()],
        )
    }

    #[test]
    fn exact_origin_is_allowed() {
        assert!(policy().allows("http://localhost:3000"));
        assert!(!policy().allows("http://localhost:3001"));
    }

    #[test]
    fn parent_domain_suffix_matches_subdomains() {
        let policy = policy();
        assert!(policy.allows("https://larkmail.app"));
        assert!(policy.allows("https://mail.larkmail.app"));
        assert!(policy.allows("https://staging.larkmail.dev"));
    }

    #[test]
    fn lookalike_domains_are_rejected() {
        let policy = policy();
        assert!(!policy.allows("https://evillarkmail.app"));
        assert!(!policy.allows("https://larkmail.app.evil.com"));
    }

    #[test]
    fn port_and_path_do_not_defeat_the_suffix_check() {
        let policy = policy();
        assert!(policy.allows("https://mail.larkmail.app:8443"));
        assert!(!policy.allows("not a url"));
    }
}
