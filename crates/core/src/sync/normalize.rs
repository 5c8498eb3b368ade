//! Value normalizer: the bidirectional seam between the server's
//! Postgres-shaped wire rows and the client store's typed rows.
//!
//! The server emits ISO-8601 ms timestamps, real booleans and nulls. Older
//! clients persisted `0` as a universal "absent" sentinel, and the wire
//! still carries `0`/`1` in boolean positions from those clients. All of
//! that sentinel handling is confined to this module: rows leaving the
//! normalizer carry epoch-ms integers for timestamps, real booleans, and
//! `null` for absent values, ready for the typed layer.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Keys holding wire timestamps: the `...At` suffix convention plus
/// anything mentioning a date.
pub fn is_timestamp_key(key: &str) -> bool {
    key.ends_with("At") || key.to_ascii_lowercase().contains("date")
}

/// Keys holding booleans: the `isX` prefix convention plus the sync flags.
fn is_boolean_key(key: &str) -> bool {
    key == "needsSync"
        || key == "hardDelete"
        || (key.len() > 2
            && key.starts_with("is")
            && key.as_bytes()[2].is_ascii_uppercase())
}

/// Keys where a numeric zero is a real value, not the legacy absent
/// sentinel.
const NUMERIC_KEYS: [&str; 4] = ["size", "storageUsed", "lastSync", "currentTime"];

/// Parse an ISO-8601 timestamp (with or without fractional seconds) into
/// epoch milliseconds.
pub fn iso_to_epoch_ms(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Render epoch milliseconds as the wire's millisecond-precision ISO form.
pub fn epoch_ms_to_iso(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        _ => Utc.timestamp_millis_opt(0).unwrap().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
    }
}

/// Serde adapter emitting `DateTime<Utc>` in the wire's ms-precision form.
pub mod iso_ms {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional wire timestamps.
pub mod iso_ms_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => super::iso_ms::serialize(dt, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

fn normalize_value(key: &str, value: Value) -> Value {
    if is_timestamp_key(key) {
        return match value {
            Value::String(s) => match iso_to_epoch_ms(&s) {
                Some(ms) => Value::from(ms),
                None => Value::String(s),
            },
            // Legacy sentinel: 0 in a timestamp position means "never".
            Value::Number(n) if n.as_i64() == Some(0) => Value::Null,
            other => other,
        };
    }
    if is_boolean_key(key) {
        return Value::Bool(is_truthy(&value));
    }
    match value {
        // Legacy sentinel: 0 outside known numeric columns means absent.
        Value::Number(n) if n.as_i64() == Some(0) && !NUMERIC_KEYS.contains(&key) => Value::Null,
        other => other,
    }
}

/// Normalize one wire row in place. A just-pulled row is by definition not
/// locally dirty, so `needsSync` is forced off as the final step.
pub fn normalize_row(row: &mut Value) {
    let Value::Object(map) = row else { return };
    let entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
    let mut rebuilt = Map::with_capacity(entries.len() + 1);
    for (key, value) in entries {
        let normalized = normalize_value(&key, value);
        rebuilt.insert(key, normalized);
    }
    rebuilt.insert("needsSync".to_string(), Value::Bool(false));
    *map = rebuilt;
}

/// Result of normalizing one table's worth of pulled rows.
#[derive(Debug, Default, Clone)]
pub struct NormalizedRows {
    /// Live rows, normalized, ready for bulk-put.
    pub rows: Vec<Value>,
    /// Ids of rows the server reports as deleted; the caller applies these
    /// as a separate local deletion pass, never as upserts.
    pub deleted_ids: Vec<String>,
}

/// Normalize an array of pulled rows, splitting out deleted rows before
/// the rest of the transform runs. Anonymized placeholder content never
/// reaches the local bulk-put.
pub fn normalize_rows(raw: Vec<Value>) -> NormalizedRows {
    let mut out = NormalizedRows::default();
    for mut row in raw {
        let deleted = row.get("isDeleted").map(is_truthy).unwrap_or(false);
        if deleted {
            if let Some(id) = row.get("id").and_then(Value::as_str) {
                out.deleted_ids.push(id.to_string());
            }
            continue;
        }
        normalize_row(&mut row);
        out.rows.push(row);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_become_epoch_ms() {
        let mut row = json!({"id": "e1", "createdAt": "2026-01-01T00:00:00.000Z"});
        normalize_row(&mut row);
        assert_eq!(row["createdAt"], json!(1_767_225_600_000_i64));
    }

    #[test]
    fn iso_round_trip_keeps_millisecond_precision() {
        let ms = 1_767_225_600_123_i64;
        let iso = epoch_ms_to_iso(ms);
        assert_eq!(iso, "2026-01-01T00:00:00.123Z");
        assert_eq!(iso_to_epoch_ms(&iso), Some(ms));
    }

    #[test]
    fn booleans_coerced_from_sentinel_integers() {
        let mut row = json!({"id": "e1", "isRead": 1, "isStarred": 0, "isSender": true});
        normalize_row(&mut row);
        assert_eq!(row["isRead"], json!(true));
        assert_eq!(row["isStarred"], json!(false));
        assert_eq!(row["isSender"], json!(true));
    }

    #[test]
    fn sentinel_zero_decodes_to_null_except_numeric_columns() {
        let mut row = json!({"id": "e1", "html": 0, "size": 0, "binnedAt": 0});
        normalize_row(&mut row);
        assert_eq!(row["html"], Value::Null);
        assert_eq!(row["size"], json!(0));
        assert_eq!(row["binnedAt"], Value::Null);
    }

    #[test]
    fn needs_sync_forced_off() {
        let mut row = json!({"id": "e1", "needsSync": 1});
        normalize_row(&mut row);
        assert_eq!(row["needsSync"], json!(false));

        let mut missing = json!({"id": "e1"});
        normalize_row(&mut missing);
        assert_eq!(missing["needsSync"], json!(false));
    }

    #[test]
    fn deleted_rows_split_out_before_transform() {
        let out = normalize_rows(vec![
            json!({"id": "a", "isDeleted": false, "subject": "hi"}),
            json!({"id": "b", "isDeleted": true, "subject": "<deleted>"}),
            json!({"id": "c", "isDeleted": 1}),
        ]);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0]["id"], json!("a"));
        assert_eq!(out.deleted_ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut row = json!({
            "id": "e1",
            "createdAt": "2026-01-01T00:00:00.000Z",
            "isRead": 1,
            "html": 0
        });
        normalize_row(&mut row);
        let once = row.clone();
        normalize_row(&mut row);
        assert_eq!(row, once);
    }
}
