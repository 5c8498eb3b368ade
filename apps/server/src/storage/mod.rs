//! Postgres side of the changes protocol: row types, the paginated pull
//! queries, and the guarded push statements.
//!
//! Every update statement carries `updated_at <= $claimed` in its WHERE
//! clause; that predicate is the whole concurrency control story. A stale
//! claim matches zero rows and the write silently loses.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgQueryResult;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use larkmail_core::sync::{
    iso_ms, iso_ms_opt, mask_token, CategoryMutation, ChangesResponse, DraftEmailMutation,
    EmailMutation, Patch, DELETED_SENTINEL, MINIMAL_SNAPSHOT_LIMIT, PULL_PAGE_SIZE,
};

use crate::error::{ApiError, ApiResult};

mod schema_sql;

pub use schema_sql::ensure_schema;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRow {
    pub id: String,
    pub mailbox_id: String,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    pub subject: String,
    pub snippet: String,
    pub body: String,
    pub html: Option<String>,
    pub sender_name: Option<String>,
    pub sender_address: String,
    pub recipient_addresses: Value,
    pub size: i64,
    pub is_read: bool,
    pub is_starred: bool,
    #[serde(with = "iso_ms_opt")]
    pub binned_at: Option<DateTime<Utc>>,
    pub category_id: Option<String>,
    pub given_id: Option<String>,
    pub is_sender: bool,
    pub is_deleted: bool,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftEmailRow {
    pub id: String,
    pub mailbox_id: String,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Option<Value>,
    pub headers: Option<Value>,
    pub is_deleted: bool,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRow {
    pub id: String,
    pub mailbox_id: String,
    pub name: String,
    pub color: Option<String>,
    pub is_deleted: bool,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxRow {
    pub id: String,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    pub storage_used: i64,
    pub plan: String,
    pub is_deleted: bool,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxAliasRow {
    pub id: String,
    pub mailbox_id: String,
    pub alias: String,
    pub name: Option<String>,
    pub is_default: bool,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempAliasRow {
    pub id: String,
    pub mailbox_id: String,
    pub alias: String,
    pub name: Option<String>,
    #[serde(with = "iso_ms")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

/// Custom domain as it travels to clients. `auth_key` is never selected.
#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomDomainRow {
    pub id: String,
    pub mailbox_id: String,
    pub domain: String,
    pub is_verified: bool,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxTokenRow {
    pub id: String,
    pub mailbox_id: String,
    pub token: String,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_ms_opt")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRow {
    pub mailbox_id: String,
    pub user_id: String,
    pub role: String,
    pub is_default: bool,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

/// User row as it travels to clients. The password column is never part of
/// the select list.
#[derive(Debug, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub onboarding_status: Value,
    #[serde(with = "iso_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

fn to_values<T: Serialize>(rows: Vec<T>) -> ApiResult<Vec<Value>> {
    rows.into_iter()
        .map(|row| serde_json::to_value(row).map_err(|e| ApiError::Internal(e.to_string())))
        .collect()
}

fn watermark_instant(last_sync_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(last_sync_ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Ids of every mailbox the user currently belongs to.
pub async fn membership_mailboxes(pool: &PgPool, user_id: &str) -> ApiResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT mailbox_id FROM mailbox_for_user WHERE user_id = $1 AND NOT is_deleted",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn collect_pages<T, F, Fut>(fetch: F) -> Result<Vec<T>, sqlx::Error>
where
    F: Fn(i64) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<T>, sqlx::Error>>,
{
    let mut rows = Vec::new();
    let mut offset = 0_i64;
    loop {
        let page = fetch(offset).await?;
        let count = page.len() as i64;
        rows.extend(page);
        if count < PULL_PAGE_SIZE {
            return Ok(rows);
        }
        offset += count;
    }
}

macro_rules! paged_since {
    ($pool:expr, $ids:expr, $since:expr, $row:ty, $sql:expr) => {
        collect_pages(|offset| {
            sqlx::query_as::<_, $row>($sql)
                .bind($ids)
                .bind($since)
                .bind(PULL_PAGE_SIZE)
                .bind(offset)
                .fetch_all($pool)
        })
        .await?
    };
}

/// Build the combined changes response for one user: every row touched in
/// the user's mailboxes since `last_sync_ms`, each table offset-paginated
/// at [`PULL_PAGE_SIZE`] rows per query.
///
/// `minimal` replaces the time filter with a bounded first-login snapshot:
/// the latest [`MINIMAL_SNAPSHOT_LIMIT`] emails (html stripped) and drafts
/// plus the full mailbox, alias and category sets.
pub async fn build_changes_response(
    pool: &PgPool,
    user_id: &str,
    last_sync_ms: i64,
    minimal: bool,
) -> ApiResult<ChangesResponse> {
    let current_time = Utc::now().timestamp_millis();
    let since = watermark_instant(last_sync_ms);

    let user: Option<UserRow> = sqlx::query_as(
        "SELECT id, username, email, onboarding_status, created_at, updated_at \
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    let Some(user) = user else {
        return Err(ApiError::NotFound("User not found".to_string()));
    };

    let mailbox_ids = membership_mailboxes(pool, user_id).await?;
    let ids = mailbox_ids.as_slice();

    // Membership rows are time-filtered by their own updated_at and include
    // grants added by other users of the same mailboxes.
    let memberships: Vec<MembershipRow> = if minimal {
        sqlx::query_as(
            "SELECT mailbox_id, user_id, role, is_default, created_at, is_deleted, updated_at \
             FROM mailbox_for_user WHERE user_id = $1 OR mailbox_id = ANY($2) \
             ORDER BY updated_at, mailbox_id, user_id",
        )
        .bind(user_id)
        .bind(ids)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as(
            "SELECT mailbox_id, user_id, role, is_default, created_at, is_deleted, updated_at \
             FROM mailbox_for_user \
             WHERE (user_id = $1 OR mailbox_id = ANY($2)) AND updated_at >= $3 \
             ORDER BY updated_at, mailbox_id, user_id",
        )
        .bind(user_id)
        .bind(ids)
        .bind(since)
        .fetch_all(pool)
        .await?
    };

    let mut response = ChangesResponse {
        current_time,
        user: Some(serde_json::to_value(user).map_err(|e| ApiError::Internal(e.to_string()))?),
        mailboxes_for_user: to_values(memberships)?,
        ..Default::default()
    };

    if minimal {
        let emails: Vec<EmailRow> = sqlx::query_as(
            "SELECT id, mailbox_id, created_at, subject, snippet, body, NULL::text AS html, \
                    sender_name, sender_address, recipient_addresses, size, is_read, \
                    is_starred, binned_at, category_id, given_id, is_sender, is_deleted, \
                    updated_at \
             FROM emails WHERE mailbox_id = ANY($1) AND NOT is_deleted \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(ids)
        .bind(MINIMAL_SNAPSHOT_LIMIT)
        .fetch_all(pool)
        .await?;
        let drafts: Vec<DraftEmailRow> = sqlx::query_as(
            "SELECT id, mailbox_id, created_at, subject, body, from_address, to_addresses, \
                    headers, is_deleted, updated_at \
             FROM draft_emails WHERE mailbox_id = ANY($1) AND NOT is_deleted \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(ids)
        .bind(MINIMAL_SNAPSHOT_LIMIT)
        .fetch_all(pool)
        .await?;
        let mailboxes: Vec<MailboxRow> = sqlx::query_as(
            "SELECT id, created_at, storage_used, plan, is_deleted, updated_at \
             FROM mailboxes WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(pool)
        .await?;
        let aliases: Vec<MailboxAliasRow> = sqlx::query_as(
            "SELECT id, mailbox_id, alias, name, is_default, created_at, is_deleted, updated_at \
             FROM mailbox_aliases WHERE mailbox_id = ANY($1) AND NOT is_deleted ORDER BY id",
        )
        .bind(ids)
        .fetch_all(pool)
        .await?;
        let categories: Vec<CategoryRow> = sqlx::query_as(
            "SELECT id, mailbox_id, name, color, is_deleted, updated_at \
             FROM mailbox_categories WHERE mailbox_id = ANY($1) AND NOT is_deleted ORDER BY id",
        )
        .bind(ids)
        .fetch_all(pool)
        .await?;

        response.emails = to_values(emails)?;
        response.draft_emails = to_values(drafts)?;
        response.mailboxes = to_values(mailboxes)?;
        response.mailbox_aliases = to_values(aliases)?;
        response.mailbox_categories = to_values(categories)?;
        return Ok(response);
    }

    let emails = paged_since!(
        pool,
        ids,
        since,
        EmailRow,
        "SELECT id, mailbox_id, created_at, subject, snippet, body, html, sender_name, \
                sender_address, recipient_addresses, size, is_read, is_starred, binned_at, \
                category_id, given_id, is_sender, is_deleted, updated_at \
         FROM emails WHERE mailbox_id = ANY($1) AND updated_at >= $2 \
         ORDER BY updated_at, id LIMIT $3 OFFSET $4"
    );
    let drafts = paged_since!(
        pool,
        ids,
        since,
        DraftEmailRow,
        "SELECT id, mailbox_id, created_at, subject, body, from_address, to_addresses, \
                headers, is_deleted, updated_at \
         FROM draft_emails WHERE mailbox_id = ANY($1) AND updated_at >= $2 \
         ORDER BY updated_at, id LIMIT $3 OFFSET $4"
    );
    let categories = paged_since!(
        pool,
        ids,
        since,
        CategoryRow,
        "SELECT id, mailbox_id, name, color, is_deleted, updated_at \
         FROM mailbox_categories WHERE mailbox_id = ANY($1) AND updated_at >= $2 \
         ORDER BY updated_at, id LIMIT $3 OFFSET $4"
    );
    let mailboxes = paged_since!(
        pool,
        ids,
        since,
        MailboxRow,
        "SELECT id, created_at, storage_used, plan, is_deleted, updated_at \
         FROM mailboxes WHERE id = ANY($1) AND updated_at >= $2 \
         ORDER BY updated_at, id LIMIT $3 OFFSET $4"
    );
    let aliases = paged_since!(
        pool,
        ids,
        since,
        MailboxAliasRow,
        "SELECT id, mailbox_id, alias, name, is_default, created_at, is_deleted, updated_at \
         FROM mailbox_aliases WHERE mailbox_id = ANY($1) AND updated_at >= $2 \
         ORDER BY updated_at, id LIMIT $3 OFFSET $4"
    );
    let temp_aliases = paged_since!(
        pool,
        ids,
        since,
        TempAliasRow,
        "SELECT id, mailbox_id, alias, name, expires_at, created_at, is_deleted, updated_at \
         FROM temp_aliases WHERE mailbox_id = ANY($1) AND updated_at >= $2 \
         ORDER BY updated_at, id LIMIT $3 OFFSET $4"
    );
    let domains = paged_since!(
        pool,
        ids,
        since,
        CustomDomainRow,
        "SELECT id, mailbox_id, domain, is_verified, created_at, is_deleted, updated_at \
         FROM custom_domains WHERE mailbox_id = ANY($1) AND updated_at >= $2 \
         ORDER BY updated_at, id LIMIT $3 OFFSET $4"
    );
    let mut tokens = paged_since!(
        pool,
        ids,
        since,
        MailboxTokenRow,
        "SELECT id, mailbox_id, token, created_at, expires_at, is_deleted, updated_at \
         FROM mailbox_tokens WHERE mailbox_id = ANY($1) AND updated_at >= $2 \
         ORDER BY updated_at, id LIMIT $3 OFFSET $4"
    );
    for row in &mut tokens {
        row.token = mask_token(&row.token);
    }

    response.emails = to_values(emails)?;
    response.draft_emails = to_values(drafts)?;
    response.mailbox_categories = to_values(categories)?;
    response.mailboxes = to_values(mailboxes)?;
    response.mailbox_aliases = to_values(aliases)?;
    response.temp_aliases = to_values(temp_aliases)?;
    response.custom_domains = to_values(domains)?;
    response.mailbox_tokens = to_values(tokens)?;
    Ok(response)
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// Client-claimed `lastUpdated` for the CAS predicate. A mutation without a
/// claim uses the request time, which always passes the check.
pub fn claimed_instant(last_updated: &Option<String>, now: DateTime<Utc>) -> DateTime<Utc> {
    last_updated
        .as_deref()
        .and_then(parse_wire_timestamp)
        .unwrap_or(now)
}

pub fn parse_wire_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn patch_text(patch: &Patch<String>) -> Option<&str> {
    patch.as_ref().and_then(|inner| inner.as_deref())
}

/// JSON-typed patch values arrive as encoded text; anything unparsable is
/// kept as a plain JSON string.
fn patch_json(patch: &Patch<String>) -> Option<Value> {
    patch_text(patch).map(|text| {
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
    })
}

const EMAIL_ANONYMIZE_SQL: &str =
    "UPDATE emails SET subject = $1, snippet = $1, body = $1, html = NULL, \
            sender_name = NULL, sender_address = $1, \
            recipient_addresses = '[]'::jsonb, category_id = NULL, \
            binned_at = NULL, given_id = NULL, is_deleted = TRUE, updated_at = $2 \
     WHERE id = $3 AND mailbox_id = $4 AND updated_at <= $5";

fn email_update_query<'a>(
    mutation: &'a EmailMutation,
    now: DateTime<Utc>,
    claimed: DateTime<Utc>,
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new("UPDATE emails SET updated_at = ");
    builder.push_bind(now);
    if let Some(read) = mutation.is_read {
        builder.push(", is_read = ").push_bind(read);
    }
    if let Some(starred) = mutation.is_starred {
        builder.push(", is_starred = ").push_bind(starred);
    }
    if let Some(category) = &mutation.category_id {
        builder.push(", category_id = ").push_bind(category.clone());
    }
    if let Some(binned) = &mutation.binned_at {
        let instant = binned.as_deref().and_then(parse_wire_timestamp);
        builder.push(", binned_at = ").push_bind(instant);
    }
    builder.push(" WHERE id = ").push_bind(&mutation.id);
    builder
        .push(" AND mailbox_id = ")
        .push_bind(&mutation.mailbox_id);
    builder.push(" AND updated_at <= ").push_bind(claimed);
    builder
}

pub async fn apply_email_mutation(
    tx: &mut Transaction<'_, Postgres>,
    mutation: &EmailMutation,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let claimed = claimed_instant(&mutation.last_updated, now);

    let result: PgQueryResult = if mutation.hard_delete {
        sqlx::query(EMAIL_ANONYMIZE_SQL)
            .bind(DELETED_SENTINEL)
            .bind(now)
            .bind(&mutation.id)
            .bind(&mutation.mailbox_id)
            .bind(claimed)
            .execute(&mut **tx)
            .await?
    } else {
        let mut builder = email_update_query(mutation, now, claimed);
        builder.build().execute(&mut **tx).await?
    };
    Ok(result.rows_affected())
}

pub async fn apply_draft_mutation(
    tx: &mut Transaction<'_, Postgres>,
    mutation: &DraftEmailMutation,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let Some(id) = existing_id(&mutation.id) else {
        let result = sqlx::query(
            "INSERT INTO draft_emails \
                 (id, mailbox_id, created_at, subject, body, from_address, to_addresses, \
                  headers, is_deleted, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $3)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&mutation.mailbox_id)
        .bind(now)
        .bind(patch_text(&mutation.subject))
        .bind(patch_text(&mutation.body))
        .bind(patch_text(&mutation.from_address))
        .bind(patch_json(&mutation.to_addresses))
        .bind(patch_json(&mutation.headers))
        .execute(&mut **tx)
        .await?;
        return Ok(result.rows_affected());
    };

    let claimed = claimed_instant(&mutation.last_updated, now);
    let result: PgQueryResult = if mutation.hard_delete {
        sqlx::query(DRAFT_ANONYMIZE_SQL)
            .bind(DELETED_SENTINEL)
            .bind(now)
            .bind(id)
            .bind(&mutation.mailbox_id)
            .bind(claimed)
            .execute(&mut **tx)
            .await?
    } else {
        let mut builder = draft_update_query(id, mutation, now, claimed);
        builder.build().execute(&mut **tx).await?
    };
    Ok(result.rows_affected())
}

const DRAFT_ANONYMIZE_SQL: &str =
    "UPDATE draft_emails SET subject = $1, body = $1, from_address = NULL, \
            to_addresses = NULL, headers = NULL, is_deleted = TRUE, updated_at = $2 \
     WHERE id = $3 AND mailbox_id = $4 AND updated_at <= $5";

fn draft_update_query<'a>(
    id: &'a str,
    mutation: &'a DraftEmailMutation,
    now: DateTime<Utc>,
    claimed: DateTime<Utc>,
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new("UPDATE draft_emails SET updated_at = ");
    builder.push_bind(now);
    if let Some(subject) = &mutation.subject {
        builder.push(", subject = ").push_bind(subject.clone());
    }
    if let Some(body) = &mutation.body {
        builder.push(", body = ").push_bind(body.clone());
    }
    if let Some(from) = &mutation.from_address {
        builder.push(", from_address = ").push_bind(from.clone());
    }
    if mutation.to_addresses.is_some() {
        builder
            .push(", to_addresses = ")
            .push_bind(patch_json(&mutation.to_addresses));
    }
    if mutation.headers.is_some() {
        builder
            .push(", headers = ")
            .push_bind(patch_json(&mutation.headers));
    }
    builder.push(" WHERE id = ").push_bind(id);
    builder
        .push(" AND mailbox_id = ")
        .push_bind(&mutation.mailbox_id);
    builder.push(" AND updated_at <= ").push_bind(claimed);
    builder
}

pub async fn apply_category_mutation(
    tx: &mut Transaction<'_, Postgres>,
    mutation: &CategoryMutation,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let Some(id) = existing_id(&mutation.id) else {
        let result = sqlx::query(
            "INSERT INTO mailbox_categories (id, mailbox_id, name, color, is_deleted, updated_at) \
             VALUES ($1, $2, $3, $4, FALSE, $5)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&mutation.mailbox_id)
        .bind(mutation.name.as_deref().unwrap_or_default())
        .bind(patch_text(&mutation.color))
        .bind(now)
        .execute(&mut **tx)
        .await?;
        return Ok(result.rows_affected());
    };

    let claimed = claimed_instant(&mutation.last_updated, now);
    let result: PgQueryResult = if mutation.hard_delete {
        sqlx::query(CATEGORY_ANONYMIZE_SQL)
            .bind(DELETED_SENTINEL)
            .bind(now)
            .bind(id)
            .bind(&mutation.mailbox_id)
            .bind(claimed)
            .execute(&mut **tx)
            .await?
    } else {
        let mut builder = category_update_query(id, mutation, now, claimed);
        builder.build().execute(&mut **tx).await?
    };
    Ok(result.rows_affected())
}

const CATEGORY_ANONYMIZE_SQL: &str =
    "UPDATE mailbox_categories SET name = $1, color = NULL, is_deleted = TRUE, \
            updated_at = $2 \
     WHERE id = $3 AND mailbox_id = $4 AND updated_at <= $5";

fn category_update_query<'a>(
    id: &'a str,
    mutation: &'a CategoryMutation,
    now: DateTime<Utc>,
    claimed: DateTime<Utc>,
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new("UPDATE mailbox_categories SET updated_at = ");
    builder.push_bind(now);
    if let Some(name) = &mutation.name {
        builder.push(", name = ").push_bind(name.clone());
    }
    if let Some(color) = &mutation.color {
        builder.push(", color = ").push_bind(color.clone());
    }
    builder.push(" WHERE id = ").push_bind(id);
    builder
        .push(" AND mailbox_id = ")
        .push_bind(&mutation.mailbox_id);
    builder.push(" AND updated_at <= ").push_bind(claimed);
    builder
}

/// `None` and `new:`-prefixed ids both mean "create"; the temp id is only a
/// client-side correlation handle and never becomes a server identity.
fn existing_id(id: &Option<String>) -> Option<&str> {
    id.as_deref()
        .filter(|id| !larkmail_core::sync::is_client_temp_id(id))
}
