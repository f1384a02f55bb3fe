//! On-disk record formats.
//!
//! Writes always produce the current envelope `{"version": 2, "entries": ...}`.
//! Reads accept that envelope plus the older shapes and upgrade them:
//!
//! - version 1 / bare maps without an envelope
//! - bare lists of keys for `notified` and `deadlist`
//! - integer fixture ids (the legacy `sent_matches.json`)
//!
//! Individual entries that fail to decode are skipped with a warning; the
//! rest of the record is kept.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::domain::{DeadlistEntry, DeadlistReason, MatchKey, NotificationRecord, TrackedMatch};

pub const FORMAT_VERSION: u32 = 2;

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    version: u32,
    entries: &'a T,
}

/// Serialize `entries` inside the current envelope
pub fn encode<T: Serialize>(entries: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(&Envelope {
        version: FORMAT_VERSION,
        entries,
    })
}

/// Strip the envelope if there is one, rejecting versions newer than ours.
fn unwrap_envelope(value: Value) -> Result<Value, String> {
    match value {
        Value::Object(mut obj) if obj.contains_key("version") && obj.contains_key("entries") => {
            let version = obj
                .get("version")
                .and_then(Value::as_u64)
                .ok_or_else(|| "envelope version is not a number".to_string())?;
            if version > u64::from(FORMAT_VERSION) {
                return Err(format!("unsupported format version {}", version));
            }
            Ok(obj.remove("entries").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

fn key_from_value(value: &Value) -> Option<MatchKey> {
    match value {
        Value::String(s) if !s.is_empty() => Some(MatchKey::from_raw(s.clone())),
        Value::Number(n) => Some(MatchKey::from_raw(n.to_string())),
        _ => None,
    }
}

fn expect_map(value: Value, record: &str) -> Result<Map<String, Value>, String> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(format!("{} is not a map (found {})", record, type_name(&other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn decode_tracked(value: Value) -> Result<BTreeMap<MatchKey, TrackedMatch>, String> {
    let map = expect_map(unwrap_envelope(value)?, "tracked")?;
    let mut out = BTreeMap::new();
    for (key, entry) in map {
        match serde_json::from_value::<TrackedMatch>(entry) {
            Ok(tracked) => {
                out.insert(MatchKey::from_raw(key), tracked);
            }
            Err(e) => warn!(key = %key, error = %e, "Skipping unreadable tracked entry"),
        }
    }
    Ok(out)
}

/// Accepts a key -> record map or a bare list of keys. List entries and
/// non-object values become empty records.
pub fn decode_notified(value: Value) -> Result<BTreeMap<MatchKey, NotificationRecord>, String> {
    let mut out = BTreeMap::new();
    match unwrap_envelope(value)? {
        Value::Array(items) => {
            for item in items {
                match key_from_value(&item) {
                    Some(key) => {
                        out.insert(key, NotificationRecord::default());
                    }
                    None => warn!(entry = %item, "Skipping unreadable notified key"),
                }
            }
        }
        other => {
            for (key, entry) in expect_map(other, "notified")? {
                let record = match entry {
                    Value::Object(_) => match serde_json::from_value(entry) {
                        Ok(record) => record,
                        Err(e) => {
                            warn!(key = %key, error = %e, "Notified entry unreadable, keeping key");
                            NotificationRecord::default()
                        }
                    },
                    _ => NotificationRecord::default(),
                };
                out.insert(MatchKey::from_raw(key), record);
            }
        }
    }
    Ok(out)
}

/// Accepts a key -> entry map, a key -> timestamp map, or a bare list of
/// keys. Entries without a timestamp are dated `loaded_at`.
pub fn decode_deadlist(
    value: Value,
    loaded_at: DateTime<Utc>,
) -> Result<BTreeMap<MatchKey, DeadlistEntry>, String> {
    let mut out = BTreeMap::new();
    match unwrap_envelope(value)? {
        Value::Array(items) => {
            for item in items {
                match key_from_value(&item) {
                    Some(key) => {
                        out.insert(key, DeadlistEntry::new(DeadlistReason::Unknown, loaded_at));
                    }
                    None => warn!(entry = %item, "Skipping unreadable deadlist key"),
                }
            }
        }
        other => {
            for (key, entry) in expect_map(other, "deadlist")? {
                let entry = match entry {
                    Value::Object(_) => serde_json::from_value(entry).unwrap_or_else(|e| {
                        warn!(key = %key, error = %e, "Deadlist entry unreadable, keeping key");
                        DeadlistEntry::new(DeadlistReason::Unknown, loaded_at)
                    }),
                    Value::String(ts) => DateTime::parse_from_rfc3339(&ts)
                        .map(|t| DeadlistEntry::new(DeadlistReason::Unknown, t.with_timezone(&Utc)))
                        .unwrap_or_else(|_| DeadlistEntry::new(DeadlistReason::Unknown, loaded_at)),
                    _ => DeadlistEntry::new(DeadlistReason::Unknown, loaded_at),
                };
                out.insert(MatchKey::from_raw(key), entry);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{derive_key, Period, Reliability};
    use serde_json::json;

    #[test]
    fn test_encode_writes_envelope() {
        let mut deadlist = BTreeMap::new();
        let now = Utc::now();
        deadlist.insert(
            derive_key("A", "B", "L"),
            DeadlistEntry::new(DeadlistReason::Finished, now),
        );
        let bytes = encode(&deadlist).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["version"], 2);
        assert_eq!(value["entries"]["a|b|l"]["reason"], "finished");

        let back = decode_deadlist(value, now).unwrap();
        assert_eq!(back, deadlist);
    }

    #[test]
    fn test_bare_notified_list_is_upgraded() {
        let value = json!(["a|b|l", 1035, 2048]);
        let notified = decode_notified(value).unwrap();
        assert_eq!(notified.len(), 3);
        assert!(notified[&MatchKey::from_raw("1035")].is_empty());
        assert!(notified[&MatchKey::from_raw("a|b|l")].is_empty());
    }

    #[test]
    fn test_version_one_notified_map() {
        let value = json!({
            "version": 1,
            "entries": {
                "a|b|l": {"home": "A", "away": "B", "first_score": "1-0", "first_minute": 12},
                "c|d|l": true
            }
        });
        let notified = decode_notified(value).unwrap();
        let record = &notified[&MatchKey::from_raw("a|b|l")];
        assert_eq!(record.home, "A");
        assert_eq!(record.first_minute, Some(12));
        assert!(notified[&MatchKey::from_raw("c|d|l")].is_empty());
    }

    #[test]
    fn test_future_version_is_rejected() {
        let value = json!({"version": 9, "entries": {}});
        assert!(decode_tracked(value).is_err());
    }

    #[test]
    fn test_bad_tracked_entry_is_skipped() {
        let value = json!({
            "a|b|l": {
                "state": "SCORELESS",
                "last_seen_minute": 12,
                "last_seen_period": "FIRST_HALF",
                "last_seen_at": "2024-03-10T15:00:00Z"
            },
            "c|d|l": {"state": "HALF_TIME"}
        });
        let tracked = decode_tracked(value).unwrap();
        assert_eq!(tracked.len(), 1);
        match &tracked[&MatchKey::from_raw("a|b|l")] {
            TrackedMatch::Scoreless {
                last_seen_minute,
                last_seen_period,
                ..
            } => {
                assert_eq!(*last_seen_minute, Some(12));
                assert_eq!(*last_seen_period, Period::FirstHalf);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_leading_entry_defaults() {
        let value = json!({
            "a|b|l": {
                "state": "LEADING",
                "leading_side": "HOME",
                "first_goal_minute": null,
                "first_goal_time": "2024-03-10T15:00:00Z"
            }
        });
        let tracked = decode_tracked(value).unwrap();
        match &tracked[&MatchKey::from_raw("a|b|l")] {
            TrackedMatch::Leading {
                first_goal_period,
                first_goal_reliability,
                ..
            } => {
                assert_eq!(*first_goal_period, Period::Unknown);
                assert_eq!(*first_goal_reliability, Reliability::LOWEST);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_legacy_deadlist_shapes() {
        let now = Utc::now();
        let from_list = decode_deadlist(json!(["x|y|z"]), now).unwrap();
        assert_eq!(
            from_list[&MatchKey::from_raw("x|y|z")],
            DeadlistEntry::new(DeadlistReason::Unknown, now)
        );

        let from_times = decode_deadlist(json!({"x|y|z": "2024-03-10T15:00:00Z"}), now).unwrap();
        assert_eq!(
            from_times[&MatchKey::from_raw("x|y|z")].added_at.to_rfc3339(),
            "2024-03-10T15:00:00+00:00"
        );
    }

    #[test]
    fn test_non_collection_is_an_error() {
        assert!(decode_tracked(json!("garbage")).is_err());
        assert!(decode_notified(json!(42)).is_err());
        assert!(decode_tracked(Value::Null).unwrap().is_empty());
    }
}
