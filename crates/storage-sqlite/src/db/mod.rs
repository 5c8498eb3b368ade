//! Database bootstrap: file layout, schema creation, pooling.
//!
//! The local database is a cache of server state. There are no incremental
//! migrations: a schema version marker is checked on open and any mismatch
//! drops the file wholesale so the next pull rebuilds it from scratch.

pub mod write_actor;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use log::{debug, warn};

use larkmail_core::errors::{DatabaseError, Error, Result};

use crate::errors::StorageError;
use crate::schema::local_meta;

pub use write_actor::{spawn_writer, WriteHandle};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Bumped whenever any client table shape changes.
pub const SCHEMA_VERSION: i32 = 1;

const DB_FILE_NAME: &str = "larkmail.db";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS emails (
    id TEXT PRIMARY KEY NOT NULL,
    mailbox_id TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    subject TEXT NOT NULL,
    snippet TEXT NOT NULL,
    body TEXT NOT NULL,
    html TEXT,
    sender_name TEXT,
    sender_address TEXT NOT NULL,
    recipient_addresses TEXT NOT NULL,
    size BIGINT NOT NULL,
    is_read BOOLEAN NOT NULL DEFAULT 0,
    is_starred BOOLEAN NOT NULL DEFAULT 0,
    binned_at BIGINT,
    category_id TEXT,
    given_id TEXT,
    is_sender BOOLEAN NOT NULL DEFAULT 0,
    updated_at BIGINT NOT NULL,
    needs_sync BOOLEAN NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_emails_mailbox_created ON emails (mailbox_id, created_at);
CREATE INDEX IF NOT EXISTS idx_emails_mailbox_read ON emails (mailbox_id, is_read);
CREATE INDEX IF NOT EXISTS idx_emails_needs_sync ON emails (needs_sync);

CREATE TABLE IF NOT EXISTS draft_emails (
    id TEXT PRIMARY KEY NOT NULL,
    mailbox_id TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    subject TEXT,
    body TEXT,
    from_address TEXT,
    to_addresses TEXT,
    headers TEXT,
    is_deleted BOOLEAN NOT NULL DEFAULT 0,
    updated_at BIGINT NOT NULL,
    needs_sync BOOLEAN NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_draft_emails_mailbox ON draft_emails (mailbox_id, created_at);
CREATE INDEX IF NOT EXISTS idx_draft_emails_needs_sync ON draft_emails (needs_sync);

CREATE TABLE IF NOT EXISTS mailbox_categories (
    id TEXT PRIMARY KEY NOT NULL,
    mailbox_id TEXT NOT NULL,
    name TEXT NOT NULL,
    color TEXT,
    is_deleted BOOLEAN NOT NULL DEFAULT 0,
    updated_at BIGINT NOT NULL,
    needs_sync BOOLEAN NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_mailbox_categories_mailbox ON mailbox_categories (mailbox_id);
CREATE INDEX IF NOT EXISTS idx_mailbox_categories_needs_sync ON mailbox_categories (needs_sync);

CREATE TABLE IF NOT EXISTS mailboxes (
    id TEXT PRIMARY KEY NOT NULL,
    created_at BIGINT NOT NULL,
    storage_used BIGINT NOT NULL DEFAULT 0,
    plan TEXT NOT NULL DEFAULT '',
    updated_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS mailbox_aliases (
    id TEXT PRIMARY KEY NOT NULL,
    mailbox_id TEXT NOT NULL,
    alias TEXT NOT NULL,
    name TEXT,
    is_default BOOLEAN NOT NULL DEFAULT 0,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_mailbox_aliases_mailbox ON mailbox_aliases (mailbox_id);

CREATE TABLE IF NOT EXISTS temp_aliases (
    id TEXT PRIMARY KEY NOT NULL,
    mailbox_id TEXT NOT NULL,
    alias TEXT NOT NULL,
    name TEXT,
    expires_at BIGINT NOT NULL,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_temp_aliases_mailbox ON temp_aliases (mailbox_id);

CREATE TABLE IF NOT EXISTS custom_domains (
    id TEXT PRIMARY KEY NOT NULL,
    mailbox_id TEXT NOT NULL,
    domain TEXT NOT NULL,
    is_verified BOOLEAN NOT NULL DEFAULT 0,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS mailbox_for_user (
    mailbox_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    is_default BOOLEAN NOT NULL DEFAULT 0,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY (mailbox_id, user_id)
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL,
    email TEXT NOT NULL,
    onboarding_status TEXT NOT NULL DEFAULT '{}',
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_state (
    user_id TEXT PRIMARY KEY NOT NULL,
    last_sync BIGINT NOT NULL DEFAULT 0,
    token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    token_expires_at BIGINT NOT NULL DEFAULT 0,
    refresh_token_expires_at BIGINT NOT NULL DEFAULT 0,
    is_syncing BOOLEAN NOT NULL DEFAULT 0,
    api_url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS local_meta (
    id INTEGER PRIMARY KEY NOT NULL,
    schema_version INTEGER NOT NULL
);
"#;

#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA busy_timeout = 5000; \
             PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

fn stored_schema_version(db_path: &str) -> Option<i32> {
    let mut conn = SqliteConnection::establish(db_path).ok()?;
    local_meta::table
        .find(1)
        .select(local_meta::schema_version)
        .first::<i32>(&mut conn)
        .ok()
}

fn remove_db_files(db_path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = fs::remove_file(format!("{db_path}{suffix}"));
    }
}

/// Open (or create) the client database under `app_data_dir`, enforcing the
/// schema version marker. Returns the database file path.
pub fn init(app_data_dir: &str) -> Result<String> {
    fs::create_dir_all(app_data_dir).map_err(|e| {
        Error::Database(DatabaseError::Internal(format!(
            "Failed creating app data dir '{app_data_dir}': {e}"
        )))
    })?;
    let db_path = Path::new(app_data_dir)
        .join(DB_FILE_NAME)
        .to_string_lossy()
        .to_string();

    if Path::new(&db_path).exists() {
        match stored_schema_version(&db_path) {
            Some(version) if version == SCHEMA_VERSION => {
                debug!("Local database at schema version {version}");
            }
            version => {
                warn!(
                    "Local database schema version {:?} does not match {}, rebuilding cache",
                    version, SCHEMA_VERSION
                );
                remove_db_files(&db_path);
            }
        }
    }

    let mut conn = SqliteConnection::establish(&db_path).map_err(StorageError::from)?;
    conn.batch_execute(SCHEMA_SQL).map_err(StorageError::from)?;
    diesel::replace_into(local_meta::table)
        .values((local_meta::id.eq(1), local_meta::schema_version.eq(SCHEMA_VERSION)))
        .execute(&mut conn)
        .map_err(StorageError::from)?;

    Ok(db_path)
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(8)
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
        .map_err(|e| Error::Database(DatabaseError::Pool(e.to_string())))?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &Arc<DbPool>) -> Result<DbConnection> {
    pool.get()
        .map_err(|e| Error::Database(DatabaseError::Pool(e.to_string())))
}
