//! Request/response bodies for the changes endpoint.
//!
//! Response tables are carried as raw JSON rows so the value normalizer can
//! run its key-wise transform before the typed layer deserializes them.
//! Push bodies are fully typed; serialization uses the same camelCase keys
//! the server stores the rows under.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Optional-update field: the outer `None` means "leave unchanged", an
/// inner `None` means "explicitly clear". Absent keys deserialize to the
/// outer `None` via `#[serde(default)]`; JSON `null` becomes `Some(None)`.
pub type Patch<T> = Option<Option<T>>;

/// Deserializer keeping a present `null` distinct from an absent key.
/// Serde's default double-`Option` handling collapses `null` to the outer
/// `None`, which would turn an explicit clear into "leave unchanged".
fn patch<'de, D, T>(deserializer: D) -> Result<Patch<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Outgoing push body: per-table arrays of mutations gathered from dirty
/// local rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesPush {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<EmailMutation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub draft_emails: Vec<DraftEmailMutation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mailbox_categories: Vec<CategoryMutation>,
}

impl ChangesPush {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.draft_emails.is_empty() && self.mailbox_categories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.emails.len() + self.draft_emails.len() + self.mailbox_categories.len()
    }
}

/// Flag-level email mutation. Content fields are server-authored and never
/// client-writable; only the listed flags travel through sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMutation {
    pub id: String,
    pub mailbox_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_starred: Option<bool>,
    #[serde(default, deserialize_with = "patch", skip_serializing_if = "Option::is_none")]
    pub category_id: Patch<String>,
    #[serde(default, deserialize_with = "patch", skip_serializing_if = "Option::is_none")]
    pub binned_at: Patch<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hard_delete: bool,
    /// ISO-8601 ms timestamp the client last saw for this row; the server's
    /// compare-and-swap predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Draft mutation. `id: None` (or a `new:`-prefixed correlation id) creates;
/// `hard_delete` anonymizes in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftEmailMutation {
    #[serde(default)]
    pub id: Option<String>,
    pub mailbox_id: String,
    #[serde(default, deserialize_with = "patch", skip_serializing_if = "Option::is_none")]
    pub subject: Patch<String>,
    #[serde(default, deserialize_with = "patch", skip_serializing_if = "Option::is_none")]
    pub body: Patch<String>,
    #[serde(default, deserialize_with = "patch", skip_serializing_if = "Option::is_none")]
    pub from_address: Patch<String>,
    /// JSON array of recipient addresses.
    #[serde(default, deserialize_with = "patch", skip_serializing_if = "Option::is_none")]
    pub to_addresses: Patch<String>,
    /// JSON object of extra headers.
    #[serde(default, deserialize_with = "patch", skip_serializing_if = "Option::is_none")]
    pub headers: Patch<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hard_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Category mutation; creatable and hard-deletable like drafts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMutation {
    #[serde(default)]
    pub id: Option<String>,
    pub mailbox_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "patch", skip_serializing_if = "Option::is_none")]
    pub color: Patch<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hard_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Combined pull/push response: every row touched across the caller's
/// mailboxes since the supplied watermark, plus the server's construction
/// time for the next watermark.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    /// Server time (epoch ms) when the response was built.
    pub current_time: i64,
    /// Current user row, password stripped. Always present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub draft_emails: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mailboxes: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mailbox_aliases: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mailbox_categories: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub temp_aliases: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_domains: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mailbox_tokens: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mailboxes_for_user: Vec<Value>,
}

/// Structured error body returned by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Token pair returned by the refresh endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub token: String,
    pub refresh_token: String,
    /// ISO-8601 ms expiry of the access token.
    pub token_expires_at: String,
    /// ISO-8601 ms expiry of the rotated refresh token.
    pub refresh_token_expires_at: String,
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_fields_distinguish_absent_from_null() {
        let absent: EmailMutation =
            serde_json::from_str(r#"{"id":"e1","mailboxId":"mb1","isRead":true}"#).unwrap();
        assert_eq!(absent.category_id, None);

        let cleared: EmailMutation =
            serde_json::from_str(r#"{"id":"e1","mailboxId":"mb1","categoryId":null}"#).unwrap();
        assert_eq!(cleared.category_id, Some(None));

        let set: EmailMutation =
            serde_json::from_str(r#"{"id":"e1","mailboxId":"mb1","categoryId":"cat1"}"#).unwrap();
        assert_eq!(set.category_id, Some(Some("cat1".to_string())));
    }

    #[test]
    fn explicit_clear_survives_a_serialize_round_trip() {
        let cleared = EmailMutation {
            id: "e1".to_string(),
            mailbox_id: "mb1".to_string(),
            is_read: None,
            is_starred: None,
            category_id: Some(None),
            binned_at: Some(None),
            hard_delete: false,
            last_updated: None,
        };
        let body = serde_json::to_string(&cleared).unwrap();
        assert!(body.contains("\"categoryId\":null"));
        assert!(body.contains("\"binnedAt\":null"));

        let back: EmailMutation = serde_json::from_str(&body).unwrap();
        assert_eq!(back.category_id, Some(None));
        assert_eq!(back.binned_at, Some(None));
    }

    #[test]
    fn empty_push_skips_all_keys() {
        let body = serde_json::to_string(&ChangesPush::default()).unwrap();
        assert_eq!(body, "{}");
        assert!(ChangesPush::default().is_empty());
    }

    #[test]
    fn response_tolerates_missing_tables() {
        let resp: ChangesResponse = serde_json::from_str(r#"{"currentTime":1700000000000}"#).unwrap();
        assert_eq!(resp.current_time, 1_700_000_000_000);
        assert!(resp.emails.is_empty());
        assert!(resp.user.is_none());
    }

    #[test]
    fn hard_delete_defaults_off_and_serializes_only_when_set() {
        let m: DraftEmailMutation =
            serde_json::from_str(r#"{"id":"d1","mailboxId":"mb1"}"#).unwrap();
        assert!(!m.hard_delete);

        let gone = DraftEmailMutation {
            hard_delete: true,
            ..m.clone()
        };
        let body = serde_json::to_string(&gone).unwrap();
        assert!(body.contains("\"hardDelete\":true"));
        assert!(!serde_json::to_string(&m).unwrap().contains("hardDelete"));
    }
}
