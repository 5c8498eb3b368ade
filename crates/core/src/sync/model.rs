//! Entity kinds and the conflict/watermark rules of the changes protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Safety margin subtracted from the server-reported time before the
/// watermark is persisted. Changes landing inside the overlap window are
/// re-fetched on the next cycle; merges are idempotent overwrite-by-id, so
/// the overlap is free apart from a little bandwidth.
pub const WATERMARK_SKEW_MS: i64 = 60_000;

/// Maximum rows per table returned for a single pull page.
pub const PULL_PAGE_SIZE: i64 = 500;

/// Row cap per table for the `minimal=true` initial snapshot.
pub const MINIMAL_SNAPSHOT_LIMIT: i64 = 50;

/// Placeholder written into content fields when a row is anonymized.
/// Anonymized rows keep their id and tenancy key forever.
pub const DELETED_SENTINEL: &str = "<deleted>";

/// Correlation prefix for client-created rows awaiting a server identity.
pub const NEW_ID_PREFIX: &str = "new:";

/// Tables that flow through the changes endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeTable {
    Emails,
    DraftEmails,
    Mailboxes,
    MailboxAliases,
    MailboxCategories,
    TempAliases,
    CustomDomains,
    MailboxTokens,
    MailboxesForUser,
    Users,
}

impl ChangeTable {
    /// Every synced table, in the order pull responses list them.
    pub const ALL: [ChangeTable; 10] = [
        ChangeTable::Emails,
        ChangeTable::DraftEmails,
        ChangeTable::Mailboxes,
        ChangeTable::MailboxAliases,
        ChangeTable::MailboxCategories,
        ChangeTable::TempAliases,
        ChangeTable::CustomDomains,
        ChangeTable::MailboxTokens,
        ChangeTable::MailboxesForUser,
        ChangeTable::Users,
    ];

    /// Tables a client may push mutations for. Everything else is
    /// server-authoritative and read-only through sync.
    pub const CLIENT_WRITABLE: [ChangeTable; 3] = [
        ChangeTable::Emails,
        ChangeTable::DraftEmails,
        ChangeTable::MailboxCategories,
    ];

    /// Key used for this table in request/response bodies.
    pub fn wire_key(&self) -> &'static str {
        match self {
            ChangeTable::Emails => "emails",
            ChangeTable::DraftEmails => "draftEmails",
            ChangeTable::Mailboxes => "mailboxes",
            ChangeTable::MailboxAliases => "mailboxAliases",
            ChangeTable::MailboxCategories => "mailboxCategories",
            ChangeTable::TempAliases => "tempAliases",
            ChangeTable::CustomDomains => "customDomains",
            ChangeTable::MailboxTokens => "mailboxTokens",
            ChangeTable::MailboxesForUser => "mailboxesForUser",
            ChangeTable::Users => "users",
        }
    }

    pub fn from_wire_key(key: &str) -> Option<Self> {
        match key {
            "emails" => Some(ChangeTable::Emails),
            "draftEmails" => Some(ChangeTable::DraftEmails),
            "mailboxes" => Some(ChangeTable::Mailboxes),
            "mailboxAliases" => Some(ChangeTable::MailboxAliases),
            "mailboxCategories" => Some(ChangeTable::MailboxCategories),
            "tempAliases" => Some(ChangeTable::TempAliases),
            "customDomains" => Some(ChangeTable::CustomDomains),
            "mailboxTokens" => Some(ChangeTable::MailboxTokens),
            "mailboxesForUser" => Some(ChangeTable::MailboxesForUser),
            "users" => Some(ChangeTable::Users),
            _ => None,
        }
    }

    pub fn is_client_writable(&self) -> bool {
        Self::CLIENT_WRITABLE.contains(self)
    }
}

/// Last-write-wins acceptance check, keyed on the *server* clock.
///
/// A client mutation claiming `last_updated` applies only while the server
/// row has not moved past that timestamp. The server executes this as a
/// `WHERE updated_at <= $claimed` clause, so a stale claim matches zero
/// rows and loses silently; the losing client sees the winning version on
/// its next pull.
pub fn lww_accepts(server_updated_at: DateTime<Utc>, claimed_last_updated: DateTime<Utc>) -> bool {
    server_updated_at <= claimed_last_updated
}

/// Watermark persisted after a successful cycle returning `server_time_ms`.
pub fn next_watermark(server_time_ms: i64) -> i64 {
    (server_time_ms - WATERMARK_SKEW_MS).max(0)
}

/// True when an id is a client-assigned correlation id, not a server identity.
pub fn is_client_temp_id(id: &str) -> bool {
    id.starts_with(NEW_ID_PREFIX)
}

/// Mask a secret to its first and last four characters. Values too short
/// to keep anything meaningful hidden are masked entirely.
pub fn mask_token(token: &str) -> String {
    if token.len() <= 12 {
        return "*".repeat(token.len());
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}

/// Category colors accept `#RRGGBB` or `#RGB`.
pub fn is_valid_category_color(color: &str) -> bool {
    let Some(hex) = color.strip_prefix('#') else {
        return false;
    };
    (hex.len() == 6 || hex.len() == 3) && hex.bytes().all(|b| b.is_ascii_hexdigit())
}
