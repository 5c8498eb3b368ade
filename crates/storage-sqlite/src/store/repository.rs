//! Local store repository.
//!
//! Two jobs live here: the change tracker (every local mutation flips
//! `needs_sync` and bumps `updated_at` in the same writer transaction as the
//! data change) and the merge (one pulled changes response applied as one
//! transaction across every touched table).

use std::sync::Arc;

use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use larkmail_core::errors::{Error, Result};
use larkmail_core::sync::{
    epoch_ms_to_iso, is_client_temp_id, is_valid_category_color, normalize_row, normalize_rows,
    CategoryMutation, ChangeTable, ChangesPush, ChangesResponse, DraftEmailMutation,
    EmailMutation, NEW_ID_PREFIX,
};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{
    custom_domains, draft_emails, emails, mailbox_aliases, mailbox_categories, mailbox_for_user,
    mailboxes, sync_state, temp_aliases, users,
};

use super::model::{
    CategoryDB, CustomDomainDB, DraftEmailDB, DraftInput, EmailDB, MailboxAliasDB, MailboxDB,
    MailboxForUserDB, SyncStateDB, TempAliasDB, UserDB,
};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn wire_deleted(row: &Value) -> bool {
    match row.get("isDeleted") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

pub struct LocalStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl LocalStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    // ----- change tracker: gather -----

    /// Collect every dirty row into one push body. O(dirty rows): each
    /// table is filtered on its `needs_sync` index, never scanned.
    pub fn gather_dirty(&self) -> Result<ChangesPush> {
        let mut conn = get_connection(&self.pool)?;

        let dirty_emails = emails::table
            .filter(emails::needs_sync.eq(true))
            .order(emails::id.asc())
            .load::<EmailDB>(&mut conn)
            .map_err(StorageError::from)?;
        let dirty_drafts = draft_emails::table
            .filter(draft_emails::needs_sync.eq(true))
            .order(draft_emails::id.asc())
            .load::<DraftEmailDB>(&mut conn)
            .map_err(StorageError::from)?;
        let dirty_categories = mailbox_categories::table
            .filter(mailbox_categories::needs_sync.eq(true))
            .order(mailbox_categories::id.asc())
            .load::<CategoryDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(ChangesPush {
            emails: dirty_emails.into_iter().map(email_mutation).collect(),
            draft_emails: dirty_drafts.into_iter().map(draft_mutation).collect(),
            mailbox_categories: dirty_categories.into_iter().map(category_mutation).collect(),
        })
    }

    // ----- merge -----

    /// Apply one changes response as a single transaction. `pushed_temp_ids`
    /// are the `new:` correlation ids sent in the same cycle's push; the
    /// response carries their server-assigned rows, so the correlation rows
    /// are dropped here.
    pub async fn apply_changes(
        &self,
        response: ChangesResponse,
        pushed_temp_ids: Vec<String>,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| apply_changes_tx(conn, response, &pushed_temp_ids))
            .await
    }

    // ----- local mutations (all set needs_sync + bump updated_at) -----

    pub async fn mark_read(&self, email_id: String, read: bool) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let n = diesel::update(emails::table.find(&email_id))
                    .set((
                        emails::is_read.eq(read),
                        emails::needs_sync.eq(true),
                        emails::updated_at.eq(now_ms()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                require_email(n, &email_id)
            })
            .await
    }

    pub async fn set_starred(&self, email_id: String, starred: bool) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let n = diesel::update(emails::table.find(&email_id))
                    .set((
                        emails::is_starred.eq(starred),
                        emails::needs_sync.eq(true),
                        emails::updated_at.eq(now_ms()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                require_email(n, &email_id)
            })
            .await
    }

    pub async fn set_category(&self, email_id: String, category_id: Option<String>) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let n = diesel::update(emails::table.find(&email_id))
                    .set((
                        emails::category_id.eq(category_id),
                        emails::needs_sync.eq(true),
                        emails::updated_at.eq(now_ms()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                require_email(n, &email_id)
            })
            .await
    }

    pub async fn move_to_bin(&self, email_id: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let n = diesel::update(emails::table.find(&email_id))
                    .set((
                        emails::binned_at.eq(Some(now_ms())),
                        emails::needs_sync.eq(true),
                        emails::updated_at.eq(now_ms()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                require_email(n, &email_id)
            })
            .await
    }

    pub async fn restore_from_bin(&self, email_id: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let n = diesel::update(emails::table.find(&email_id))
                    .set((
                        emails::binned_at.eq(None::<i64>),
                        emails::needs_sync.eq(true),
                        emails::updated_at.eq(now_ms()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                require_email(n, &email_id)
            })
            .await
    }

    /// Create or update a draft. New drafts get a `new:` correlation id
    /// which the server replaces with a real identity on the next push.
    pub async fn save_draft(&self, id: Option<String>, input: DraftInput) -> Result<String> {
        let draft_id = id.unwrap_or_else(|| format!("{NEW_ID_PREFIX}{}", Uuid::new_v4()));
        let id_for_row = draft_id.clone();
        self.writer
            .exec(move |conn| {
                let now = now_ms();
                let existing = draft_emails::table
                    .find(&id_for_row)
                    .first::<DraftEmailDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?;
                let row = DraftEmailDB {
                    id: id_for_row.clone(),
                    mailbox_id: input.mailbox_id,
                    created_at: existing.map(|d| d.created_at).unwrap_or(now),
                    subject: input.subject,
                    body: input.body,
                    from_address: input.from_address,
                    to_addresses: input.to_addresses,
                    headers: input.headers,
                    is_deleted: false,
                    updated_at: now,
                    needs_sync: true,
                };
                diesel::replace_into(draft_emails::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;
        Ok(draft_id)
    }

    /// Mark a draft pending deletion. The row stays until a pull confirms
    /// the server-side anonymization.
    pub async fn delete_draft(&self, draft_id: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let n = diesel::update(draft_emails::table.find(&draft_id))
                    .set((
                        draft_emails::is_deleted.eq(true),
                        draft_emails::needs_sync.eq(true),
                        draft_emails::updated_at.eq(now_ms()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if n == 0 {
                    return Err(Error::validation(format!("Unknown draft '{draft_id}'")));
                }
                Ok(())
            })
            .await
    }

    pub async fn upsert_category(
        &self,
        id: Option<String>,
        mailbox_id: String,
        name: String,
        color: Option<String>,
    ) -> Result<String> {
        if let Some(color) = color.as_deref() {
            if !is_valid_category_color(color) {
                return Err(Error::validation(format!("Invalid category color '{color}'")));
            }
        }
        let category_id = id.unwrap_or_else(|| format!("{NEW_ID_PREFIX}{}", Uuid::new_v4()));
        let id_for_row = category_id.clone();
        self.writer
            .exec(move |conn| {
                let row = CategoryDB {
                    id: id_for_row,
                    mailbox_id,
                    name,
                    color,
                    is_deleted: false,
                    updated_at: now_ms(),
                    needs_sync: true,
                };
                diesel::replace_into(mailbox_categories::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;
        Ok(category_id)
    }

    pub async fn delete_category(&self, category_id: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let n = diesel::update(mailbox_categories::table.find(&category_id))
                    .set((
                        mailbox_categories::is_deleted.eq(true),
                        mailbox_categories::needs_sync.eq(true),
                        mailbox_categories::updated_at.eq(now_ms()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if n == 0 {
                    return Err(Error::validation(format!("Unknown category '{category_id}'")));
                }
                Ok(())
            })
            .await
    }

    // ----- reads (cache-only, never touch the network) -----

    pub fn get_email(&self, email_id: &str) -> Result<Option<EmailDB>> {
        let mut conn = get_connection(&self.pool)?;
        emails::table
            .find(email_id)
            .first::<EmailDB>(&mut conn)
            .optional()
            .map_err(|e| StorageError::Query(e).into())
    }

    pub fn list_emails(&self, mailbox_id: &str) -> Result<Vec<EmailDB>> {
        let mut conn = get_connection(&self.pool)?;
        emails::table
            .filter(emails::mailbox_id.eq(mailbox_id))
            .order(emails::created_at.desc())
            .load::<EmailDB>(&mut conn)
            .map_err(|e| StorageError::Query(e).into())
    }

    pub fn get_draft(&self, draft_id: &str) -> Result<Option<DraftEmailDB>> {
        let mut conn = get_connection(&self.pool)?;
        draft_emails::table
            .find(draft_id)
            .first::<DraftEmailDB>(&mut conn)
            .optional()
            .map_err(|e| StorageError::Query(e).into())
    }

    /// Drafts pending deletion are filtered out of user-facing lists.
    pub fn list_drafts(&self, mailbox_id: &str) -> Result<Vec<DraftEmailDB>> {
        let mut conn = get_connection(&self.pool)?;
        draft_emails::table
            .filter(draft_emails::mailbox_id.eq(mailbox_id))
            .filter(draft_emails::is_deleted.eq(false))
            .order(draft_emails::created_at.desc())
            .load::<DraftEmailDB>(&mut conn)
            .map_err(|e| StorageError::Query(e).into())
    }

    pub fn get_category(&self, category_id: &str) -> Result<Option<CategoryDB>> {
        let mut conn = get_connection(&self.pool)?;
        mailbox_categories::table
            .find(category_id)
            .first::<CategoryDB>(&mut conn)
            .optional()
            .map_err(|e| StorageError::Query(e).into())
    }

    pub fn list_categories(&self, mailbox_id: &str) -> Result<Vec<CategoryDB>> {
        let mut conn = get_connection(&self.pool)?;
        mailbox_categories::table
            .filter(mailbox_categories::mailbox_id.eq(mailbox_id))
            .filter(mailbox_categories::is_deleted.eq(false))
            .order(mailbox_categories::name.asc())
            .load::<CategoryDB>(&mut conn)
            .map_err(|e| StorageError::Query(e).into())
    }

    // ----- sync state bookkeeping -----

    pub fn get_sync_state(&self, user_id: &str) -> Result<Option<SyncStateDB>> {
        let mut conn = get_connection(&self.pool)?;
        sync_state::table
            .find(user_id)
            .first::<SyncStateDB>(&mut conn)
            .optional()
            .map_err(|e| StorageError::Query(e).into())
    }

    /// Every locally-known identity, for the pull-everyone refresh path.
    pub fn list_sync_states(&self) -> Result<Vec<SyncStateDB>> {
        let mut conn = get_connection(&self.pool)?;
        sync_state::table
            .order(sync_state::user_id.asc())
            .load::<SyncStateDB>(&mut conn)
            .map_err(|e| StorageError::Query(e).into())
    }

    pub async fn put_sync_state(&self, state: SyncStateDB) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::replace_into(sync_state::table)
                    .values(&state)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn remove_sync_state(&self, user_id: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::delete(sync_state::table.find(&user_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Informational in-flight marker; mutual exclusion itself is the
    /// driver's lock, not this column.
    pub async fn set_syncing(&self, user_id: String, syncing: bool) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::update(sync_state::table.find(&user_id))
                    .set(sync_state::is_syncing.eq(syncing))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn set_last_sync(&self, user_id: String, last_sync: i64) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let n = diesel::update(sync_state::table.find(&user_id))
                    .set(sync_state::last_sync.eq(last_sync))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if n == 0 {
                    return Err(Error::validation(format!("Unknown sync identity '{user_id}'")));
                }
                Ok(())
            })
            .await
    }

    pub async fn update_tokens(
        &self,
        user_id: String,
        token: String,
        refresh_token: String,
        token_expires_at: i64,
        refresh_token_expires_at: i64,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let n = diesel::update(sync_state::table.find(&user_id))
                    .set((
                        sync_state::token.eq(token),
                        sync_state::refresh_token.eq(refresh_token),
                        sync_state::token_expires_at.eq(token_expires_at),
                        sync_state::refresh_token_expires_at.eq(refresh_token_expires_at),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if n == 0 {
                    return Err(Error::validation(format!("Unknown sync identity '{user_id}'")));
                }
                Ok(())
            })
            .await
    }
}

fn require_email(rows_affected: usize, email_id: &str) -> Result<()> {
    if rows_affected == 0 {
        return Err(Error::validation(format!("Unknown email '{email_id}'")));
    }
    Ok(())
}

fn email_mutation(row: EmailDB) -> EmailMutation {
    EmailMutation {
        id: row.id,
        mailbox_id: row.mailbox_id,
        is_read: Some(row.is_read),
        is_starred: Some(row.is_starred),
        category_id: Some(row.category_id),
        binned_at: Some(row.binned_at.map(epoch_ms_to_iso)),
        hard_delete: false,
        last_updated: Some(epoch_ms_to_iso(row.updated_at)),
    }
}

fn draft_mutation(row: DraftEmailDB) -> DraftEmailMutation {
    DraftEmailMutation {
        id: Some(row.id),
        mailbox_id: row.mailbox_id,
        subject: Some(row.subject),
        body: Some(row.body),
        from_address: Some(row.from_address),
        to_addresses: Some(row.to_addresses),
        headers: Some(row.headers),
        hard_delete: row.is_deleted,
        last_updated: Some(epoch_ms_to_iso(row.updated_at)),
    }
}

fn category_mutation(row: CategoryDB) -> CategoryMutation {
    CategoryMutation {
        id: Some(row.id),
        mailbox_id: row.mailbox_id,
        name: Some(row.name),
        color: Some(row.color),
        hard_delete: row.is_deleted,
        last_updated: Some(epoch_ms_to_iso(row.updated_at)),
    }
}

fn apply_changes_tx(
    conn: &mut SqliteConnection,
    mut response: ChangesResponse,
    pushed_temp_ids: &[String],
) -> Result<()> {
    // The server answered with real identities for pushed creates; the
    // local correlation rows are superseded.
    for temp_id in pushed_temp_ids.iter().filter(|id| is_client_temp_id(id)) {
        diesel::delete(draft_emails::table.find(temp_id))
            .execute(conn)
            .map_err(StorageError::from)?;
        diesel::delete(mailbox_categories::table.find(temp_id))
            .execute(conn)
            .map_err(StorageError::from)?;
    }

    for table in ChangeTable::ALL {
        match table {
            ChangeTable::Emails => merge_emails(conn, std::mem::take(&mut response.emails))?,
            ChangeTable::DraftEmails => {
                merge_drafts(conn, std::mem::take(&mut response.draft_emails))?
            }
            ChangeTable::Mailboxes => {
                merge_mailboxes(conn, std::mem::take(&mut response.mailboxes))?
            }
            ChangeTable::MailboxAliases => {
                merge_aliases(conn, std::mem::take(&mut response.mailbox_aliases))?
            }
            ChangeTable::MailboxCategories => {
                merge_categories(conn, std::mem::take(&mut response.mailbox_categories))?
            }
            ChangeTable::TempAliases => {
                merge_temp_aliases(conn, std::mem::take(&mut response.temp_aliases))?
            }
            ChangeTable::CustomDomains => {
                merge_domains(conn, std::mem::take(&mut response.custom_domains))?
            }
            // Pulled masked for display elsewhere; the client keeps no
            // token cache.
            ChangeTable::MailboxTokens => {}
            ChangeTable::MailboxesForUser => {
                merge_memberships(conn, std::mem::take(&mut response.mailboxes_for_user))?
            }
            ChangeTable::Users => {
                if let Some(user) = response.user.take() {
                    merge_user(conn, user)?;
                }
            }
        }
    }
    Ok(())
}

fn merge_emails(conn: &mut SqliteConnection, raw: Vec<Value>) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    let normalized = normalize_rows(raw);
    if !normalized.deleted_ids.is_empty() {
        debug!("Tombstoning {} emails", normalized.deleted_ids.len());
        diesel::delete(emails::table.filter(emails::id.eq_any(&normalized.deleted_ids)))
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    for row in normalized.rows {
        let email: EmailDB = serde_json::from_value(row)?;
        diesel::replace_into(emails::table)
            .values(&email)
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    Ok(())
}

fn merge_drafts(conn: &mut SqliteConnection, raw: Vec<Value>) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    let normalized = normalize_rows(raw);
    if !normalized.deleted_ids.is_empty() {
        diesel::delete(draft_emails::table.filter(draft_emails::id.eq_any(&normalized.deleted_ids)))
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    for row in normalized.rows {
        let draft: DraftEmailDB = serde_json::from_value(row)?;
        diesel::replace_into(draft_emails::table)
            .values(&draft)
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    Ok(())
}

fn merge_categories(conn: &mut SqliteConnection, raw: Vec<Value>) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    let normalized = normalize_rows(raw);
    if !normalized.deleted_ids.is_empty() {
        diesel::delete(
            mailbox_categories::table
                .filter(mailbox_categories::id.eq_any(&normalized.deleted_ids)),
        )
        .execute(conn)
        .map_err(StorageError::from)?;
    }
    for row in normalized.rows {
        let category: CategoryDB = serde_json::from_value(row)?;
        diesel::replace_into(mailbox_categories::table)
            .values(&category)
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    Ok(())
}

fn merge_mailboxes(conn: &mut SqliteConnection, raw: Vec<Value>) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    let normalized = normalize_rows(raw);
    if !normalized.deleted_ids.is_empty() {
        diesel::delete(mailboxes::table.filter(mailboxes::id.eq_any(&normalized.deleted_ids)))
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    for row in normalized.rows {
        let mailbox: MailboxDB = serde_json::from_value(row)?;
        diesel::replace_into(mailboxes::table)
            .values(&mailbox)
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    Ok(())
}

fn merge_aliases(conn: &mut SqliteConnection, raw: Vec<Value>) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    let normalized = normalize_rows(raw);
    if !normalized.deleted_ids.is_empty() {
        diesel::delete(
            mailbox_aliases::table.filter(mailbox_aliases::id.eq_any(&normalized.deleted_ids)),
        )
        .execute(conn)
        .map_err(StorageError::from)?;
    }
    for row in normalized.rows {
        let alias: MailboxAliasDB = serde_json::from_value(row)?;
        diesel::replace_into(mailbox_aliases::table)
            .values(&alias)
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    Ok(())
}

fn merge_temp_aliases(conn: &mut SqliteConnection, raw: Vec<Value>) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    let normalized = normalize_rows(raw);
    if !normalized.deleted_ids.is_empty() {
        diesel::delete(temp_aliases::table.filter(temp_aliases::id.eq_any(&normalized.deleted_ids)))
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    for row in normalized.rows {
        let alias: TempAliasDB = serde_json::from_value(row)?;
        diesel::replace_into(temp_aliases::table)
            .values(&alias)
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    Ok(())
}

fn merge_domains(conn: &mut SqliteConnection, raw: Vec<Value>) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    let normalized = normalize_rows(raw);
    if !normalized.deleted_ids.is_empty() {
        diesel::delete(
            custom_domains::table.filter(custom_domains::id.eq_any(&normalized.deleted_ids)),
        )
        .execute(conn)
        .map_err(StorageError::from)?;
    }
    for row in normalized.rows {
        let domain: CustomDomainDB = serde_json::from_value(row)?;
        diesel::replace_into(custom_domains::table)
            .values(&domain)
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    Ok(())
}

/// Membership rows have a composite key, so the deletion pass keys on the
/// (mailboxId, userId) pair carried in the row itself.
fn merge_memberships(conn: &mut SqliteConnection, raw: Vec<Value>) -> Result<()> {
    for mut row in raw {
        if wire_deleted(&row) {
            let mailbox = row.get("mailboxId").and_then(Value::as_str);
            let user = row.get("userId").and_then(Value::as_str);
            if let (Some(mailbox), Some(user)) = (mailbox, user) {
                diesel::delete(
                    mailbox_for_user::table
                        .filter(mailbox_for_user::mailbox_id.eq(mailbox))
                        .filter(mailbox_for_user::user_id.eq(user)),
                )
                .execute(conn)
                .map_err(StorageError::from)?;
            }
            continue;
        }
        normalize_row(&mut row);
        let membership: MailboxForUserDB = serde_json::from_value(row)?;
        diesel::replace_into(mailbox_for_user::table)
            .values(&membership)
            .execute(conn)
            .map_err(StorageError::from)?;
    }
    Ok(())
}

fn merge_user(conn: &mut SqliteConnection, mut raw: Value) -> Result<()> {
    normalize_row(&mut raw);
    let user: UserDB = serde_json::from_value(raw)?;
    diesel::replace_into(users::table)
        .values(&user)
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, spawn_writer};
    use serde_json::json;
    use tempfile::tempdir;

    fn setup_store() -> LocalStore {
        let dir = tempdir().expect("tempdir").keep();
        let db_path = init(dir.to_string_lossy().as_ref()).expect("init db");
        let pool = create_pool(&db_path).expect("create pool");
        let writer = spawn_writer(pool.as_ref().clone());
        LocalStore::new(pool, writer)
    }

    fn email_row(id: &str, subject: &str) -> Value {
        json!({
            "id": id,
            "mailboxId": "mb1",
            "createdAt": "2026-02-01T10:00:00.000Z",
            "subject": subject,
            "snippet": subject,
            "body": subject,
            "html": null,
            "senderName": "Ada",
            "senderAddress": "ada@example.com",
            "recipientAddresses": ["me@larkmail.test"],
            "size": 1024,
            "isRead": false,
            "isStarred": false,
            "binnedAt": null,
            "categoryId": null,
            "isSender": false,
            "isDeleted": false,
            "updatedAt": "2026-02-01T10:00:00.000Z"
        })
    }

    fn response_with(emails: Vec<Value>) -> ChangesResponse {
        serde_json::from_value(json!({
            "currentTime": 1_770_000_000_000_i64,
            "user": {
                "id": "u1",
                "username": "ada",
                "email": "ada@larkmail.test",
                "onboardingStatus": {"done": true},
                "createdAt": "2026-01-01T00:00:00.000Z",
                "updatedAt": "2026-01-01T00:00:00.000Z"
            },
            "emails": emails,
            "mailboxes": [{
                "id": "mb1",
                "createdAt": "2026-01-01T00:00:00.000Z",
                "storageUsed": 42,
                "plan": "free",
                "isDeleted": false,
                "updatedAt": "2026-01-01T00:00:00.000Z"
            }],
            "mailboxesForUser": [{
                "mailboxId": "mb1",
                "userId": "u1",
                "role": "OWNER",
                "isDefault": true,
                "createdAt": "2026-01-01T00:00:00.000Z",
                "isDeleted": false,
                "updatedAt": "2026-01-01T00:00:00.000Z"
            }]
        }))
        .expect("response json")
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let store = setup_store();
        let response = response_with(vec![email_row("e1", "hello"), email_row("e2", "again")]);

        store
            .apply_changes(response.clone(), vec![])
            .await
            .expect("first apply");
        let first = store.list_emails("mb1").expect("list");

        store
            .apply_changes(response, vec![])
            .await
            .expect("second apply");
        let second = store.list_emails("mb1").expect("list");

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn gather_returns_exactly_the_dirty_rows() {
        let store = setup_store();
        store
            .apply_changes(response_with(vec![email_row("e1", "hello")]), vec![])
            .await
            .expect("seed");
        assert!(store.gather_dirty().expect("gather").is_empty());

        store.mark_read("e1".to_string(), true).await.expect("mark read");
        let draft_id = store
            .save_draft(
                None,
                DraftInput {
                    mailbox_id: "mb1".to_string(),
                    subject: Some("hi".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("save draft");
        let category_id = store
            .upsert_category(None, "mb1".to_string(), "Work".to_string(), Some("#ff0000".to_string()))
            .await
            .expect("category");

        let push = store.gather_dirty().expect("gather");
        assert_eq!(push.len(), 3);
        assert_eq!(push.emails[0].id, "e1");
        assert_eq!(push.emails[0].is_read, Some(true));
        assert!(push.emails[0].last_updated.is_some());
        assert_eq!(push.draft_emails[0].id.as_deref(), Some(draft_id.as_str()));
        assert!(draft_id.starts_with(NEW_ID_PREFIX));
        assert_eq!(push.mailbox_categories[0].id.as_deref(), Some(category_id.as_str()));
    }

    #[tokio::test]
    async fn bin_round_trip_marks_the_row_dirty_both_ways() {
        let store = setup_store();
        store
            .apply_changes(response_with(vec![email_row("e1", "hello")]), vec![])
            .await
            .expect("seed");

        store.move_to_bin("e1".to_string()).await.expect("bin");
        let binned = store.get_email("e1").expect("get").expect("row");
        assert!(binned.binned_at.is_some());
        assert!(binned.needs_sync);

        store.restore_from_bin("e1".to_string()).await.expect("restore");
        let restored = store.get_email("e1").expect("get").expect("row");
        assert!(restored.binned_at.is_none());
        assert!(restored.needs_sync);

        store.set_starred("e1".to_string(), true).await.expect("star");
        store
            .set_category("e1".to_string(), Some("c1".to_string()))
            .await
            .expect("categorize");
        let push = store.gather_dirty().expect("gather");
        assert_eq!(push.emails.len(), 1);
        assert_eq!(push.emails[0].is_starred, Some(true));
        assert_eq!(push.emails[0].category_id, Some(Some("c1".to_string())));
    }

    #[tokio::test]
    async fn merge_clears_needs_sync_and_replaces_temp_rows() {
        let store = setup_store();
        store
            .apply_changes(response_with(vec![email_row("e1", "hello")]), vec![])
            .await
            .expect("seed");
        store.mark_read("e1".to_string(), true).await.expect("mark read");
        let temp_id = store
            .save_draft(
                None,
                DraftInput {
                    mailbox_id: "mb1".to_string(),
                    subject: Some("hi".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("save draft");

        let mut echoed = email_row("e1", "hello");
        echoed["isRead"] = json!(true);
        let mut response = response_with(vec![echoed]);
        response.draft_emails = vec![json!({
            "id": "d-real",
            "mailboxId": "mb1",
            "createdAt": "2026-02-01T11:00:00.000Z",
            "subject": "hi",
            "body": null,
            "fromAddress": null,
            "toAddresses": null,
            "headers": null,
            "isDeleted": false,
            "updatedAt": "2026-02-01T11:00:00.000Z"
        })];

        store
            .apply_changes(response, vec![temp_id.clone()])
            .await
            .expect("apply");

        let email = store.get_email("e1").expect("get").expect("exists");
        assert!(email.is_read);
        assert!(!email.needs_sync);
        assert!(store.get_draft(&temp_id).expect("get temp").is_none());
        let real = store.get_draft("d-real").expect("get real").expect("exists");
        assert!(!real.needs_sync);
        assert_eq!(store.gather_dirty().expect("gather").len(), 0);
    }

    #[tokio::test]
    async fn deleted_rows_are_tombstoned_locally() {
        let store = setup_store();
        store
            .apply_changes(response_with(vec![email_row("e1", "hello")]), vec![])
            .await
            .expect("seed");

        let mut gone = email_row("e1", "<deleted>");
        gone["isDeleted"] = json!(true);
        store
            .apply_changes(response_with(vec![gone]), vec![])
            .await
            .expect("apply delete");

        assert!(store.get_email("e1").expect("get").is_none());
    }

    #[tokio::test]
    async fn deleted_draft_survives_until_pull_confirms() {
        let store = setup_store();
        store
            .apply_changes(response_with(vec![]), vec![])
            .await
            .expect("seed");
        let draft_id = store
            .save_draft(
                Some("d1".to_string()),
                DraftInput {
                    mailbox_id: "mb1".to_string(),
                    subject: Some("old".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("save");
        store.delete_draft(draft_id.clone()).await.expect("delete");

        // Still present (pending), pushed as a hard delete, hidden from lists.
        let pending = store.get_draft(&draft_id).expect("get").expect("pending row");
        assert!(pending.is_deleted);
        assert!(store.list_drafts("mb1").expect("list").is_empty());
        let push = store.gather_dirty().expect("gather");
        assert!(push.draft_emails[0].hard_delete);

        let mut response = response_with(vec![]);
        response.draft_emails = vec![json!({"id": "d1", "isDeleted": true})];
        store.apply_changes(response, vec![]).await.expect("confirm");
        assert!(store.get_draft(&draft_id).expect("get").is_none());
    }

    #[tokio::test]
    async fn category_color_is_validated() {
        let store = setup_store();
        let err = store
            .upsert_category(None, "mb1".to_string(), "Bad".to_string(), Some("red".to_string()))
            .await
            .expect_err("invalid color");
        assert!(matches!(err, Error::Validation(_)));
        assert!(store
            .upsert_category(None, "mb1".to_string(), "Ok".to_string(), Some("#abc".to_string()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn sync_state_roundtrip() {
        let store = setup_store();
        store
            .put_sync_state(SyncStateDB {
                user_id: "u1".to_string(),
                last_sync: 0,
                token: "tok".to_string(),
                refresh_token: "ref".to_string(),
                token_expires_at: 1,
                refresh_token_expires_at: 2,
                is_syncing: false,
                api_url: "http://localhost:1".to_string(),
            })
            .await
            .expect("put");

        store.set_last_sync("u1".to_string(), 500).await.expect("last sync");
        store.set_syncing("u1".to_string(), true).await.expect("syncing");
        let state = store.get_sync_state("u1").expect("get").expect("exists");
        assert_eq!(state.last_sync, 500);
        assert!(state.is_syncing);

        store
            .update_tokens("u1".to_string(), "tok2".to_string(), "ref2".to_string(), 3, 4)
            .await
            .expect("tokens");
        let state = store.get_sync_state("u1").expect("get").expect("exists");
        assert_eq!(state.token, "tok2");
        assert_eq!(state.refresh_token, "ref2");

        assert_eq!(store.list_sync_states().expect("list").len(), 1);
        store.remove_sync_state("u1".to_string()).await.expect("remove");
        assert!(store.get_sync_state("u1").expect("get").is_none());
    }

    #[tokio::test]
    async fn membership_revocation_removes_the_pair() {
        let store = setup_store();
        store
            .apply_changes(response_with(vec![]), vec![])
            .await
            .expect("seed");

        let mut response = response_with(vec![]);
        response.mailboxes_for_user = vec![json!({
            "mailboxId": "mb1",
            "userId": "u1",
            "isDeleted": true
        })];
        store.apply_changes(response, vec![]).await.expect("revoke");

        let mut conn = get_connection(&store.pool).expect("conn");
        let remaining: i64 = mailbox_for_user::table
            .count()
            .get_result(&mut conn)
            .expect("count");
        assert_eq!(remaining, 0);
    }
}
