//! Row models for the client cache.
//!
//! Each struct deserializes straight from a normalized wire row (camelCase
//! keys, epoch-ms timestamps, real booleans) and inserts via `replace_into`,
//! so the merge is an overwrite-by-id upsert. Unknown wire keys are ignored;
//! missing keys fall back to defaults.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{
    custom_domains, draft_emails, emails, mailbox_aliases, mailbox_categories, mailbox_for_user,
    mailboxes, sync_state, temp_aliases, users,
};

/// JSON-valued wire fields (recipient lists, headers) land in TEXT columns
/// holding their JSON text.
mod json_text {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    pub fn serialize<S: Serializer>(text: &str, s: S) -> Result<S::Ok, S::Error> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => value.serialize(s),
            Err(_) => s.serialize_str(text),
        }
    }
}

mod json_text_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }))
    }

    pub fn serialize<S: Serializer>(text: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        match text {
            None => s.serialize_none(),
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => value.serialize(s),
                Err(_) => text.serialize(s),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = emails)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailDB {
    pub id: String,
    pub mailbox_id: String,
    pub created_at: i64,
    pub subject: String,
    pub snippet: String,
    pub body: String,
    pub html: Option<String>,
    pub sender_name: Option<String>,
    pub sender_address: String,
    #[serde(with = "json_text")]
    pub recipient_addresses: String,
    pub size: i64,
    pub is_read: bool,
    pub is_starred: bool,
    pub binned_at: Option<i64>,
    pub category_id: Option<String>,
    pub given_id: Option<String>,
    pub is_sender: bool,
    pub updated_at: i64,
    pub needs_sync: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = draft_emails)]
#[serde(rename_all = "camelCase", default)]
pub struct DraftEmailDB {
    pub id: String,
    pub mailbox_id: String,
    pub created_at: i64,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub from_address: Option<String>,
    #[serde(with = "json_text_opt")]
    pub to_addresses: Option<String>,
    #[serde(with = "json_text_opt")]
    pub headers: Option<String>,
    pub is_deleted: bool,
    pub updated_at: i64,
    pub needs_sync: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = mailbox_categories)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryDB {
    pub id: String,
    pub mailbox_id: String,
    pub name: String,
    pub color: Option<String>,
    pub is_deleted: bool,
    pub updated_at: i64,
    pub needs_sync: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = mailboxes)]
#[serde(rename_all = "camelCase", default)]
pub struct MailboxDB {
    pub id: String,
    pub created_at: i64,
    pub storage_used: i64,
    pub plan: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = mailbox_aliases)]
#[serde(rename_all = "camelCase", default)]
pub struct MailboxAliasDB {
    pub id: String,
    pub mailbox_id: String,
    pub alias: String,
    pub name: Option<String>,
    pub is_default: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = temp_aliases)]
#[serde(rename_all = "camelCase", default)]
pub struct TempAliasDB {
    pub id: String,
    pub mailbox_id: String,
    pub alias: String,
    pub name: Option<String>,
    pub expires_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = custom_domains)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomDomainDB {
    pub id: String,
    pub mailbox_id: String,
    pub domain: String,
    pub is_verified: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = mailbox_for_user)]
#[serde(rename_all = "camelCase", default)]
pub struct MailboxForUserDB {
    pub mailbox_id: String,
    pub user_id: String,
    pub role: String,
    pub is_default: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = users)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDB {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(with = "json_text")]
    pub onboarding_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-identity sync bookkeeping. Client-local, never pushed or pulled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = sync_state)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncStateDB {
    pub user_id: String,
    pub last_sync: i64,
    pub token: String,
    pub refresh_token: String,
    pub token_expires_at: i64,
    pub refresh_token_expires_at: i64,
    pub is_syncing: bool,
    pub api_url: String,
}

/// Draft fields supplied by the composer when creating or editing a draft.
#[derive(Debug, Clone, Default)]
pub struct DraftInput {
    pub mailbox_id: String,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Option<String>,
    pub headers: Option<String>,
}
