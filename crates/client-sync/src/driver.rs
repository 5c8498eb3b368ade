//! The sync cycle state machine.
//!
//! One cycle: gather dirty rows, push them with the pre-push watermark,
//! merge the combined response, persist `server_time - 60s` as the next
//! watermark. A 401 triggers one token refresh followed by one retry of the
//! whole cycle (dirty rows are re-gathered; a superset push is safe because
//! the merge is idempotent). A second 401 ends the cycle with
//! [`SyncError::TokenExpired`] and local state untouched.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use larkmail_core::sync::{is_client_temp_id, iso_to_epoch_ms, next_watermark, ChangesPush};
use larkmail_storage_sqlite::store::SyncStateDB;
use larkmail_storage_sqlite::LocalStore;

use crate::client::{AuthScheme, ChangesApiClient};
use crate::error::{Result, SyncError};

pub struct SyncDriver {
    store: Arc<LocalStore>,
    // Single-slot advisory lock: at most one cycle runs at a time,
    // contending callers wait rather than fail.
    cycle_lock: Mutex<()>,
}

impl SyncDriver {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Push-and-pull cycle. Skips the network entirely when nothing is
    /// dirty locally.
    pub async fn sync(&self, user_id: &str) -> Result<()> {
        self.run_cycle(user_id, true).await
    }

    /// Pull-only cycle; the first pull for an identity (watermark 0) asks
    /// for the bounded minimal snapshot.
    pub async fn fetch_sync(&self, user_id: &str) -> Result<()> {
        self.run_cycle(user_id, false).await
    }

    /// Pull-only refresh across every locally-known identity. Per-identity
    /// failures are logged and skipped so one expired login does not stall
    /// the rest.
    pub async fn fetch_sync_all(&self) -> Result<()> {
        let identities = self.store.list_sync_states()?;
        for state in identities {
            if let Err(err) = self.fetch_sync(&state.user_id).await {
                error!("Periodic refresh failed for {}: {}", state.user_id, err);
            }
        }
        Ok(())
    }

    /// Revoke the identity's credentials and forget its local sync state.
    /// Revocation is best effort; the local identity is removed either way.
    pub async fn sign_out(&self, user_id: &str) -> Result<()> {
        let _guard = self.cycle_lock.lock().await;
        let Some(state) = self.store.get_sync_state(user_id)? else {
            return Ok(());
        };
        let client = ChangesApiClient::new(&state.api_url);
        if let Err(err) = client.revoke_token(AuthScheme::Session, &state.token).await {
            warn!("Session revocation failed for {user_id}: {err}");
        }
        if let Err(err) = client
            .revoke_token(AuthScheme::Refresh, &state.refresh_token)
            .await
        {
            warn!("Refresh revocation failed for {user_id}: {err}");
        }
        self.store.remove_sync_state(user_id.to_string()).await?;
        info!("Signed out {user_id}");
        Ok(())
    }

    async fn run_cycle(&self, user_id: &str, with_push: bool) -> Result<()> {
        let _guard = self.cycle_lock.lock().await;

        let state = self.store.get_sync_state(user_id)?.ok_or_else(|| {
            SyncError::invalid_request(format!("No sync identity for user '{user_id}'"))
        })?;

        // Informational in-flight marker only; exclusion is the lock above.
        if let Err(err) = self.store.set_syncing(user_id.to_string(), true).await {
            warn!("Failed to set in-flight marker for {user_id}: {err}");
        }
        let result = self.run_authenticated(&state, with_push).await;
        if let Err(err) = self.store.set_syncing(user_id.to_string(), false).await {
            warn!("Failed to clear in-flight marker for {user_id}: {err}");
        }

        match &result {
            Ok(()) => debug!("Sync cycle completed for {user_id}"),
            Err(err) => warn!("Sync cycle failed for {user_id}: {err}"),
        }
        result
    }

    async fn run_authenticated(&self, state: &SyncStateDB, with_push: bool) -> Result<()> {
        let client = ChangesApiClient::new(&state.api_url);
        let mut token = state.token.clone();
        let mut already_refreshed = false;

        loop {
            match self.attempt_cycle(&client, &token, state, with_push).await {
                Ok(()) => return Ok(()),
                Err(err) if err.status_code() == Some(401) => {
                    if already_refreshed {
                        return Err(SyncError::TokenExpired);
                    }
                    already_refreshed = true;
                    info!("Access token rejected, refreshing once");
                    token = self.refresh_tokens(&client, state).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt_cycle(
        &self,
        client: &ChangesApiClient,
        token: &str,
        state: &SyncStateDB,
        with_push: bool,
    ) -> Result<()> {
        let (response, pushed_temp_ids) = if with_push {
            let push = self.store.gather_dirty()?;
            if push.is_empty() {
                debug!("Nothing dirty for {}, skipping network round trip", state.user_id);
                return Ok(());
            }
            let temp_ids = pushed_temp_ids(&push);
            let response = client.post_changes(token, state.last_sync, &push).await?;
            (response, temp_ids)
        } else {
            let minimal = state.last_sync == 0;
            let response = client.get_changes(token, state.last_sync, minimal).await?;
            (response, Vec::new())
        };

        let server_time = response.current_time;
        self.store.apply_changes(response, pushed_temp_ids).await?;
        self.store
            .set_last_sync(state.user_id.clone(), next_watermark(server_time))
            .await?;
        Ok(())
    }

    async fn refresh_tokens(
        &self,
        client: &ChangesApiClient,
        state: &SyncStateDB,
    ) -> Result<String> {
        let refreshed = client
            .refresh_token(&state.refresh_token)
            .await
            .map_err(|err| match err.status_code() {
                // A rejected refresh token is terminal; force re-login.
                Some(401) | Some(403) => SyncError::TokenExpired,
                _ => err,
            })?;

        let token_expires_at = iso_to_epoch_ms(&refreshed.token_expires_at).unwrap_or(0);
        let refresh_expires_at = iso_to_epoch_ms(&refreshed.refresh_token_expires_at).unwrap_or(0);
        self.store
            .update_tokens(
                state.user_id.clone(),
                refreshed.token.clone(),
                refreshed.refresh_token,
                token_expires_at,
                refresh_expires_at,
            )
            .await?;
        Ok(refreshed.token)
    }
}

fn pushed_temp_ids(push: &ChangesPush) -> Vec<String> {
    push.draft_emails
        .iter()
        .filter_map(|m| m.id.clone())
        .chain(push.mailbox_categories.iter().filter_map(|m| m.id.clone()))
        .filter(|id| is_client_temp_id(id))
        .collect()
}

/// Submit a background cycle for a local mutation's fire-and-forget sync.
/// The mutation has already committed locally; a failed cycle is logged and
/// retried on the next trigger, never surfaced to the mutating caller.
pub fn spawn_sync(driver: Arc<SyncDriver>, user_id: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = driver.sync(&user_id).await {
            error!("Background sync failed for {user_id}: {err}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    use larkmail_core::sync::ChangesResponse;
    use larkmail_storage_sqlite::db::{create_pool, init, spawn_writer};
    use serde_json::json;
    use tempfile::tempdir;

    const SERVER_TIME_MS: i64 = 1_770_000_000_000;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        line: String,
        authorization: Option<String>,
        body: String,
    }

    #[derive(Debug, Clone)]
    enum MockOutcome {
        Respond { status: u16, body: String },
    }

    fn changes_body(current_time: i64) -> String {
        format!(r#"{{"currentTime":{}}}"#, current_time)
    }

    fn refresh_body() -> String {
        json!({
            "token": "tok-2",
            "refreshToken": "ref-2",
            "tokenExpiresAt": "2026-03-01T00:00:00.000Z",
            "refreshTokenExpiresAt": "2026-04-01T00:00:00.000Z",
            "userId": "u1"
        })
        .to_string()
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(
        stream: &mut tokio::net::TcpStream,
    ) -> Option<(String, HashMap<String, String>, String)> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 && header_end_offset(&buffer).is_none() {
                return None;
            }
            if read > 0 {
                buffer.extend_from_slice(&chunk[..read]);
            }
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next()?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let body_start = header_end + 4;
        while buffer.len() < body_start + content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
        }

        let body = String::from_utf8_lossy(
            &buffer[body_start..(body_start + content_length).min(buffer.len())],
        )
        .to_string();
        Some((request_line, headers, body))
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            500 => "Internal Server Error",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        status: u16,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }

    async fn start_mock_server(
        outcomes: Vec<MockOutcome>,
    ) -> (String, std::sync::Arc<TokioMutex<Vec<CapturedRequest>>>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = std::sync::Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = std::sync::Arc::new(TokioMutex::new(VecDeque::from(outcomes)));
        let captured_clone = std::sync::Arc::clone(&captured);

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let Some((line, headers, body)) = read_http_request(&mut stream).await else {
                    continue;
                };
                captured_clone.lock().await.push(CapturedRequest {
                    line,
                    authorization: headers.get("authorization").cloned(),
                    body,
                });

                let outcome = scripted.lock().await.pop_front().unwrap_or(MockOutcome::Respond {
                    status: 500,
                    body: r#"{"error":"unexpected request"}"#.to_string(),
                });
                match outcome {
                    MockOutcome::Respond { status, body } => {
                        let _ = write_http_response(&mut stream, status, &body).await;
                    }
                }
            }
        });

        (format!("http://{}", addr), captured)
    }

    async fn setup_driver(api_url: &str, last_sync: i64) -> SyncDriver {
        let dir = tempdir().expect("tempdir").keep();
        let db_path = init(dir.to_string_lossy().as_ref()).expect("init db");
        let pool = create_pool(&db_path).expect("pool");
        let writer = spawn_writer(pool.as_ref().clone());
        let store = Arc::new(LocalStore::new(pool, writer));
        store
            .put_sync_state(SyncStateDB {
                user_id: "u1".to_string(),
                last_sync,
                token: "tok-1".to_string(),
                refresh_token: "ref-1".to_string(),
                token_expires_at: 0,
                refresh_token_expires_at: 0,
                is_syncing: false,
                api_url: api_url.to_string(),
            })
            .await
            .expect("seed identity");
        SyncDriver::new(store)
    }

    async fn seed_email(store: &LocalStore) {
        let response: ChangesResponse = serde_json::from_value(json!({
            "currentTime": SERVER_TIME_MS,
            "emails": [{
                "id": "e1",
                "mailboxId": "mb1",
                "createdAt": "2026-02-01T10:00:00.000Z",
                "subject": "hello",
                "snippet": "hello",
                "body": "hello",
                "senderAddress": "ada@example.com",
                "recipientAddresses": [],
                "size": 1,
                "isRead": false,
                "isStarred": false,
                "isSender": false,
                "isDeleted": false,
                "updatedAt": "2026-02-01T10:00:00.000Z"
            }]
        }))
        .expect("seed response");
        store.apply_changes(response, vec![]).await.expect("seed");
    }

    #[tokio::test]
    async fn empty_diff_makes_zero_network_calls() {
        let (base_url, captured) = start_mock_server(vec![]).await;
        let driver = setup_driver(&base_url, 500).await;

        driver.sync("u1").await.expect("sync");

        assert!(captured.lock().await.is_empty());
        let state = driver.store().get_sync_state("u1").expect("get").expect("state");
        assert_eq!(state.last_sync, 500);
        assert!(!state.is_syncing);
    }

    #[tokio::test]
    async fn watermark_gets_the_safety_margin() {
        let (base_url, captured) = start_mock_server(vec![MockOutcome::Respond {
            status: 200,
            body: changes_body(SERVER_TIME_MS),
        }])
        .await;
        let driver = setup_driver(&base_url, 100).await;

        driver.fetch_sync("u1").await.expect("fetch");

        let state = driver.store().get_sync_state("u1").expect("get").expect("state");
        assert_eq!(state.last_sync, SERVER_TIME_MS - 60_000);

        let captured = captured.lock().await;
        assert_eq!(captured.len(), 1);
        assert!(captured[0].line.starts_with("GET /sync?last_sync=100&minimal=false"));
        assert_eq!(captured[0].authorization.as_deref(), Some("session tok-1"));
    }

    #[tokio::test]
    async fn first_pull_requests_the_minimal_snapshot() {
        let (base_url, captured) = start_mock_server(vec![MockOutcome::Respond {
            status: 200,
            body: changes_body(SERVER_TIME_MS),
        }])
        .await;
        let driver = setup_driver(&base_url, 0).await;

        driver.fetch_sync("u1").await.expect("fetch");

        let captured = captured.lock().await;
        assert!(captured[0].line.starts_with("GET /sync?last_sync=0&minimal=true"));
    }

    #[tokio::test]
    async fn push_carries_the_dirty_rows_and_merge_clears_them() {
        let (base_url, captured) = start_mock_server(vec![MockOutcome::Respond {
            status: 200,
            body: json!({
                "currentTime": SERVER_TIME_MS,
                "emails": [{
                    "id": "e1",
                    "mailboxId": "mb1",
                    "createdAt": "2026-02-01T10:00:00.000Z",
                    "subject": "hello",
                    "snippet": "hello",
                    "body": "hello",
                    "senderAddress": "ada@example.com",
                    "recipientAddresses": [],
                    "size": 1,
                    "isRead": true,
                    "isStarred": false,
                    "isSender": false,
                    "isDeleted": false,
                    "updatedAt": "2026-02-01T10:05:00.000Z"
                }]
            })
            .to_string(),
        }])
        .await;
        let driver = setup_driver(&base_url, 200).await;
        seed_email(driver.store().as_ref()).await;
        driver
            .store()
            .mark_read("e1".to_string(), true)
            .await
            .expect("mark read");

        driver.sync("u1").await.expect("sync");

        let captured_requests = captured.lock().await;
        assert_eq!(captured_requests.len(), 1);
        assert!(captured_requests[0].line.starts_with("POST /sync?last_sync=200"));
        let body: serde_json::Value =
            serde_json::from_str(&captured_requests[0].body).expect("body json");
        assert_eq!(body["emails"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["emails"][0]["id"], json!("e1"));
        assert_eq!(body["emails"][0]["isRead"], json!(true));
        assert!(body.get("draftEmails").is_none());

        let email = driver.store().get_email("e1").expect("get").expect("exists");
        assert!(email.is_read);
        assert!(!email.needs_sync);
    }

    #[tokio::test]
    async fn unauthorized_triggers_one_refresh_and_one_retry() {
        let (base_url, captured) = start_mock_server(vec![
            MockOutcome::Respond { status: 401, body: r#"{"error":"Unauthorized"}"#.to_string() },
            MockOutcome::Respond { status: 200, body: refresh_body() },
            MockOutcome::Respond { status: 200, body: changes_body(SERVER_TIME_MS) },
        ])
        .await;
        let driver = setup_driver(&base_url, 100).await;

        driver.fetch_sync("u1").await.expect("fetch");

        let captured = captured.lock().await;
        let paths: Vec<&str> = captured.iter().map(|r| r.line.as_str()).collect();
        assert_eq!(captured.len(), 3);
        assert!(paths[0].starts_with("GET /sync"));
        assert!(paths[1].starts_with("POST /internal/refresh-token"));
        assert!(paths[2].starts_with("GET /sync"));
        assert_eq!(captured[1].authorization.as_deref(), Some("refresh ref-1"));
        assert_eq!(captured[2].authorization.as_deref(), Some("session tok-2"));

        let state = driver.store().get_sync_state("u1").expect("get").expect("state");
        assert_eq!(state.token, "tok-2");
        assert_eq!(state.refresh_token, "ref-2");
        assert_eq!(state.last_sync, SERVER_TIME_MS - 60_000);
    }

    #[tokio::test]
    async fn second_unauthorized_is_terminal() {
        let (base_url, captured) = start_mock_server(vec![
            MockOutcome::Respond { status: 401, body: r#"{"error":"Unauthorized"}"#.to_string() },
            MockOutcome::Respond { status: 200, body: refresh_body() },
            MockOutcome::Respond { status: 401, body: r#"{"error":"Unauthorized"}"#.to_string() },
        ])
        .await;
        let driver = setup_driver(&base_url, 100).await;

        let err = driver.fetch_sync("u1").await.expect_err("terminal");
        assert!(matches!(err, SyncError::TokenExpired));
        assert_eq!(captured.lock().await.len(), 3);

        let state = driver.store().get_sync_state("u1").expect("get").expect("state");
        assert_eq!(state.last_sync, 100);
        assert!(!state.is_syncing);
    }

    #[tokio::test]
    async fn rejected_refresh_token_is_terminal() {
        let (base_url, captured) = start_mock_server(vec![
            MockOutcome::Respond { status: 401, body: r#"{"error":"Unauthorized"}"#.to_string() },
            MockOutcome::Respond { status: 401, body: r#"{"error":"Token expired"}"#.to_string() },
        ])
        .await;
        let driver = setup_driver(&base_url, 100).await;

        let err = driver.fetch_sync("u1").await.expect_err("terminal");
        assert!(matches!(err, SyncError::TokenExpired));
        assert_eq!(captured.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn network_failure_leaves_local_state_untouched() {
        // Nothing listens on this port; the request fails at connect time.
        let driver = setup_driver("http://127.0.0.1:9", 100).await;
        seed_email(driver.store().as_ref()).await;
        driver
            .store()
            .mark_read("e1".to_string(), true)
            .await
            .expect("mark read");

        let err = driver.sync("u1").await.expect_err("network error");
        assert!(matches!(err, SyncError::Http(_)));

        let state = driver.store().get_sync_state("u1").expect("get").expect("state");
        assert_eq!(state.last_sync, 100);
        assert!(!state.is_syncing);
        // Still dirty; the next cycle will retry the push.
        assert_eq!(driver.store().gather_dirty().expect("gather").len(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_wait_for_the_lock() {
        let (base_url, captured) = start_mock_server(vec![
            MockOutcome::Respond { status: 200, body: changes_body(SERVER_TIME_MS) },
            MockOutcome::Respond { status: 200, body: changes_body(SERVER_TIME_MS + 1_000) },
        ])
        .await;
        let driver = Arc::new(setup_driver(&base_url, 100).await);

        let a = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.fetch_sync("u1").await })
        };
        let b = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.fetch_sync("u1").await })
        };
        a.await.expect("join").expect("cycle a");
        b.await.expect("join").expect("cycle b");

        // Both cycles ran, one after the other.
        assert_eq!(captured.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn sign_out_revokes_both_tokens_and_forgets_the_identity() {
        let (base_url, captured) = start_mock_server(vec![
            MockOutcome::Respond { status: 200, body: "{}".to_string() },
            MockOutcome::Respond { status: 200, body: "{}".to_string() },
        ])
        .await;
        let driver = setup_driver(&base_url, 100).await;

        driver.sign_out("u1").await.expect("sign out");

        let captured = captured.lock().await;
        assert_eq!(captured.len(), 2);
        assert!(captured[0].line.starts_with("DELETE /internal/revoke-token"));
        assert_eq!(captured[0].authorization.as_deref(), Some("session tok-1"));
        assert_eq!(captured[1].authorization.as_deref(), Some("refresh ref-1"));
        assert!(driver.store().get_sync_state("u1").expect("get").is_none());

        // Idempotent once the identity is gone.
        driver.sign_out("u1").await.expect("repeat sign out");
        assert_eq!(captured.len(), 2);
    }

    #[tokio::test]
    async fn background_sync_logs_and_swallows_errors() {
        let driver = Arc::new(setup_driver("http://127.0.0.1:9", 100).await);
        seed_email(driver.store().as_ref()).await;
        driver
            .store()
            .mark_read("e1".to_string(), true)
            .await
            .expect("mark read");

        // The spawned task must complete without propagating the failure.
        spawn_sync(Arc::clone(&driver), "u1".to_string())
            .await
            .expect("task completed");

        tokio::time::timeout(Duration::from_secs(1), async {})
            .await
            .expect("no hang");
    }
}
