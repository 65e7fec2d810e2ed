//! Ordered fallback chains over loosely-typed upstream JSON.
//!
//! Each adapter lists, per logical field, the JSON paths to try in order.
//! The first path that resolves to a usable value wins.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

pub const UNKNOWN: &str = "Unknown";
pub const REMOTE: &str = "Remote";

pub fn at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

/// First non-blank string found along `paths`.
pub fn first_str(value: &JsonValue, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| {
        at(value, path)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    })
}

/// Like [`first_str`] but also accepts numeric ids.
pub fn first_id(value: &JsonValue, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| match at(value, path)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// A string, or a list of strings joined with ", " (at most `limit` items).
pub fn str_or_list(value: Option<&JsonValue>, limit: usize) -> Option<String> {
    match value? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Array(items) => {
            let parts = items
                .iter()
                .filter_map(|v| match v {
                    JsonValue::String(s) => Some(s.trim().to_string()),
                    JsonValue::Object(_) => first_str(v, &[&["name"]]),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .take(limit)
                .collect::<Vec<_>>();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        _ => None,
    }
}

/// Joins the non-blank string values at `keys` of an object.
pub fn join_parts(value: Option<&JsonValue>, keys: &[&str]) -> Option<String> {
    let obj = value?;
    let parts = keys
        .iter()
        .filter_map(|k| first_str(obj, &[&[*k]]))
        .collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Unix seconds or milliseconds (disambiguated by magnitude) as RFC 3339.
pub fn unix_to_rfc3339(ts: f64) -> Option<String> {
    if !ts.is_finite() || ts <= 0.0 {
        return None;
    }
    let secs = if ts > 1e12 { ts / 1000.0 } else { ts };
    DateTime::<Utc>::from_timestamp(secs as i64, 0).map(|dt| dt.to_rfc3339())
}

/// Dates that arrive either as strings or as numeric timestamps.
pub fn date_value(value: Option<&JsonValue>) -> String {
    match value {
        Some(JsonValue::String(s)) => s.trim().to_string(),
        Some(JsonValue::Number(n)) => n.as_f64().and_then(unix_to_rfc3339).unwrap_or_default(),
        _ => String::new(),
    }
}

/// The list under the first matching key, or the value itself when it is a list.
pub fn list_under<'a>(value: &'a JsonValue, keys: &[&str]) -> Option<&'a Vec<JsonValue>> {
    if let Some(items) = value.as_array() {
        return Some(items);
    }
    keys.iter().find_map(|k| value.get(*k).and_then(JsonValue::as_array))
}
