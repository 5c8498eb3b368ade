//! The changes endpoint: pull (`GET /sync`) and the combined push+pull
//! (`POST /sync`).

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use larkmail_core::sync::{
    is_client_temp_id, is_valid_category_color, ChangeTable, ChangesPush, ChangesResponse,
};

use crate::auth::{credential_from_headers, resolve_session, Credential};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::storage;

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub last_sync: i64,
    #[serde(default)]
    pub minimal: bool,
}

async fn session_user(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    match credential_from_headers(headers)? {
        Credential::Session(token) => resolve_session(&state.pool, token).await,
        Credential::Refresh(_) => Err(ApiError::Unauthorized),
    }
}

pub async fn pull(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SyncQuery>,
) -> ApiResult<Json<ChangesResponse>> {
    let user_id = session_user(&state, &headers).await?;
    debug!(
        "Pull for {user_id} since {} (minimal={})",
        query.last_sync, query.minimal
    );
    let response =
        storage::build_changes_response(&state.pool, &user_id, query.last_sync, query.minimal)
            .await?;
    Ok(Json(response))
}

pub async fn push(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SyncQuery>,
    Json(body): Json<Value>,
) -> ApiResult<Json<ChangesResponse>> {
    let user_id = session_user(&state, &headers).await?;

    let Some(tables) = body.as_object() else {
        return Err(ApiError::bad_request("Push body must be a JSON object"));
    };
    check_table_keys(tables.keys().map(String::as_str))?;
    let push: ChangesPush = serde_json::from_value(body.clone())
        .map_err(|e| ApiError::bad_request_with("Malformed mutation", e.to_string()))?;

    let memberships: HashSet<String> = storage::membership_mailboxes(&state.pool, &user_id)
        .await?
        .into_iter()
        .collect();

    // Validate the whole batch before touching any row, so a violation
    // anywhere aborts everything.
    validate_push(&push, &memberships)?;

    let now = Utc::now();
    let mut tx = state.pool.begin().await?;
    let mut applied = 0_u64;
    for mutation in &push.emails {
        applied += storage::apply_email_mutation(&mut tx, mutation, now).await?;
    }
    for mutation in &push.draft_emails {
        applied += storage::apply_draft_mutation(&mut tx, mutation, now).await?;
    }
    for mutation in &push.mailbox_categories {
        applied += storage::apply_category_mutation(&mut tx, mutation, now).await?;
    }
    tx.commit().await?;

    // A shortfall is stale writes losing the CAS, not an error.
    info!(
        "Push for {user_id}: {applied} of {} mutations applied",
        push.len()
    );

    // The caller supplied its pre-push watermark; the pull below includes
    // everything this push just touched.
    let response =
        storage::build_changes_response(&state.pool, &user_id, query.last_sync, false).await?;
    Ok(Json(response))
}

/// Push bodies may only name the client-writable tables.
fn check_table_keys<'a>(keys: impl Iterator<Item = &'a str>) -> ApiResult<()> {
    for key in keys {
        let writable = match ChangeTable::from_wire_key(key) {
            Some(table) => table.is_client_writable(),
            None => false,
        };
        if !writable {
            return Err(ApiError::bad_request(format!("Invalid key: {key}")));
        }
    }
    Ok(())
}

fn check_tenancy(mailbox_id: &str, memberships: &HashSet<String>) -> ApiResult<()> {
    if memberships.contains(mailbox_id) {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "No access to mailbox",
            mailbox_id.to_string(),
        ))
    }
}

fn check_claim(last_updated: &Option<String>) -> ApiResult<()> {
    match last_updated.as_deref() {
        Some(value) if storage::parse_wire_timestamp(value).is_none() => Err(
            ApiError::bad_request_with("Invalid timestamp", value.to_string()),
        ),
        _ => Ok(()),
    }
}

fn validate_push(push: &ChangesPush, memberships: &HashSet<String>) -> ApiResult<()> {
    for mutation in &push.emails {
        check_tenancy(&mutation.mailbox_id, memberships)?;
        if is_client_temp_id(&mutation.id) {
            return Err(ApiError::bad_request("Cannot create email yet"));
        }
        check_claim(&mutation.last_updated)?;
        if let Some(Some(binned)) = &mutation.binned_at {
            if storage::parse_wire_timestamp(binned).is_none() {
                return Err(ApiError::bad_request_with(
                    "Invalid timestamp",
                    binned.clone(),
                ));
            }
        }
    }
    for mutation in &push.draft_emails {
        check_tenancy(&mutation.mailbox_id, memberships)?;
        check_claim(&mutation.last_updated)?;
    }
    for mutation in &push.mailbox_categories {
        check_tenancy(&mutation.mailbox_id, memberships)?;
        check_claim(&mutation.last_updated)?;
        let creating = match &mutation.id {
            None => true,
            Some(id) => is_client_temp_id(id),
        };
        if creating && mutation.name.as_deref().unwrap_or("").is_empty() {
            return Err(ApiError::bad_request("Missing category name"));
        }
        if let Some(Some(color)) = &mutation.color {
            if !is_valid_category_color(color) {
                return Err(ApiError::bad_request_with(
                    "Invalid category color",
                    color.clone(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use larkmail_core::sync::{CategoryMutation, DraftEmailMutation, EmailMutation};

    fn memberships() -> HashSet<String> {
        ["mb1".to_string(), "mb2".to_string()].into_iter().collect()
    }

    fn email(id: &str, mailbox: &str) -> EmailMutation {
        EmailMutation {
            id: id.to_string(),
            mailbox_id: mailbox.to_string(),
            is_read: Some(true),
            is_starred: None,
            category_id: None,
            binned_at: None,
            hard_delete: false,
            last_updated: Some("2026-02-01T10:00:00.000Z".to_string()),
        }
    }

    #[test]
    fn only_client_writable_table_keys_pass() {
        assert!(check_table_keys(["emails", "draftEmails", "mailboxCategories"].into_iter()).is_ok());
        assert!(matches!(
            check_table_keys(["emails", "mailboxes"].into_iter()),
            Err(ApiError::BadRequest { .. })
        ));
        assert!(matches!(
            check_table_keys(["attachments"].into_iter()),
            Err(ApiError::BadRequest { .. })
        ));
    }

    #[test]
    fn foreign_mailbox_fails_the_whole_batch() {
        let push = ChangesPush {
            emails: vec![email("e1", "mb1"), email("e2", "mb-other")],
            ..Default::default()
        };
        assert!(matches!(
            validate_push(&push, &memberships()),
            Err(ApiError::Forbidden { .. })
        ));
    }

    #[test]
    fn email_creation_is_rejected() {
        let push = ChangesPush {
            emails: vec![email("new:tmp-1", "mb1")],
            ..Default::default()
        };
        let err = validate_push(&push, &memberships()).expect_err("rejected");
        assert!(matches!(
            err,
            ApiError::BadRequest { ref error, .. } if error == "Cannot create email yet"
        ));
    }

    #[test]
    fn category_create_requires_a_name_and_a_valid_color() {
        let nameless = ChangesPush {
            mailbox_categories: vec![CategoryMutation {
                id: None,
                mailbox_id: "mb1".to_string(),
                name: None,
                color: None,
                hard_delete: false,
                last_updated: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            validate_push(&nameless, &memberships()),
            Err(ApiError::BadRequest { .. })
        ));

        let bad_color = ChangesPush {
            mailbox_categories: vec![CategoryMutation {
                id: Some("c1".to_string()),
                mailbox_id: "mb1".to_string(),
                name: Some("Work".to_string()),
                color: Some(Some("teal".to_string())),
                hard_delete: false,
                last_updated: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            validate_push(&bad_color, &memberships()),
            Err(ApiError::BadRequest { .. })
        ));
    }

    #[test]
    fn well_formed_batch_passes() {
        let push = ChangesPush {
            emails: vec![email("e1", "mb1")],
            draft_emails: vec![DraftEmailMutation {
                id: Some("new:tmp-9".to_string()),
                mailbox_id: "mb2".to_string(),
                subject: Some(Some("hi".to_string())),
                body: None,
                from_address: None,
                to_addresses: None,
                headers: None,
                hard_delete: false,
                last_updated: None,
            }],
            mailbox_categories: vec![CategoryMutation {
                id: None,
                mailbox_id: "mb1".to_string(),
                name: Some("Work".to_string()),
                color: Some(Some("#a1b2c3".to_string())),
                hard_delete: false,
                last_updated: None,
            }],
        };
        assert!(validate_push(&push, &memberships()).is_ok());
    }

    #[test]
    fn malformed_claim_timestamps_are_rejected() {
        let mut mutation = email("e1", "mb1");
        mutation.last_updated = Some("yesterday".to_string());
        let push = ChangesPush {
            emails: vec![mutation],
            ..Default::default()
        };
        assert!(matches!(
            validate_push(&push, &memberships()),
            Err(ApiError::BadRequest { .. })
        ));
    }
}
