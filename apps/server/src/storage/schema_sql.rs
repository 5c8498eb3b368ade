//! Server schema bootstrap. Idempotent; runs at startup.

use sqlx::PgPool;
use tracing::info;

use crate::error::ApiResult;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                TEXT PRIMARY KEY,
    username          TEXT NOT NULL,
    email             TEXT NOT NULL,
    password          TEXT NOT NULL DEFAULT '',
    onboarding_status JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS mailboxes (
    id           TEXT PRIMARY KEY,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    storage_used BIGINT NOT NULL DEFAULT 0,
    plan         TEXT NOT NULL DEFAULT 'free',
    is_deleted   BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS mailbox_for_user (
    mailbox_id TEXT NOT NULL REFERENCES mailboxes(id),
    user_id    TEXT NOT NULL REFERENCES users(id),
    role       TEXT NOT NULL DEFAULT 'OWNER',
    is_default BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (mailbox_id, user_id)
);

CREATE TABLE IF NOT EXISTS emails (
    id                  TEXT PRIMARY KEY,
    mailbox_id          TEXT NOT NULL REFERENCES mailboxes(id),
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    subject             TEXT NOT NULL DEFAULT '',
    snippet             TEXT NOT NULL DEFAULT '',
    body                TEXT NOT NULL DEFAULT '',
    html                TEXT,
    sender_name         TEXT,
    sender_address      TEXT NOT NULL DEFAULT '',
    recipient_addresses JSONB NOT NULL DEFAULT '[]'::jsonb,
    size                BIGINT NOT NULL DEFAULT 0,
    is_read             BOOLEAN NOT NULL DEFAULT FALSE,
    is_starred          BOOLEAN NOT NULL DEFAULT FALSE,
    binned_at           TIMESTAMPTZ,
    category_id         TEXT,
    given_id            TEXT,
    is_sender           BOOLEAN NOT NULL DEFAULT FALSE,
    is_deleted          BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_emails_mailbox_updated ON emails (mailbox_id, updated_at);

CREATE TABLE IF NOT EXISTS draft_emails (
    id           TEXT PRIMARY KEY,
    mailbox_id   TEXT NOT NULL REFERENCES mailboxes(id),
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    subject      TEXT,
    body         TEXT,
    from_address TEXT,
    to_addresses JSONB,
    headers      JSONB,
    is_deleted   BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_draft_emails_mailbox_updated ON draft_emails (mailbox_id, updated_at);

CREATE TABLE IF NOT EXISTS mailbox_categories (
    id         TEXT PRIMARY KEY,
    mailbox_id TEXT NOT NULL REFERENCES mailboxes(id),
    name       TEXT NOT NULL,
    color      TEXT,
    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS mailbox_aliases (
    id         TEXT PRIMARY KEY,
    mailbox_id TEXT NOT NULL REFERENCES mailboxes(id),
    alias      TEXT NOT NULL,
    name       TEXT,
    is_default BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS temp_aliases (
    id         TEXT PRIMARY KEY,
    mailbox_id TEXT NOT NULL REFERENCES mailboxes(id),
    alias      TEXT NOT NULL,
    name       TEXT,
    expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS custom_domains (
    id          TEXT PRIMARY KEY,
    mailbox_id  TEXT NOT NULL REFERENCES mailboxes(id),
    domain      TEXT NOT NULL,
    is_verified BOOLEAN NOT NULL DEFAULT FALSE,
    auth_key    TEXT NOT NULL DEFAULT '',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    is_deleted  BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS mailbox_tokens (
    id         TEXT PRIMARY KEY,
    mailbox_id TEXT NOT NULL REFERENCES mailboxes(id),
    token      TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    expires_at TIMESTAMPTZ,
    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS sessions (
    token      TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES users(id),
    expires_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS refresh_tokens (
    token      TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES users(id),
    expires_at TIMESTAMPTZ NOT NULL
);
"#;

pub async fn ensure_schema(pool: &PgPool) -> ApiResult<()> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    info!("Server schema is up to date");
    Ok(())
}
