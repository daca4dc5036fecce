//! Helpers for reading the loosely-typed server payloads. Entity parsers use
//! these at their single parsing boundary; nothing past that boundary sees a
//! raw `Value`.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// `{ success, data?, message? }` as returned by every endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub success: Option<bool>,
    pub data: Value,
    pub message: Option<String>,
}

impl Envelope {
    pub fn from_value(root: &Value) -> Self {
        let is_envelope = root.is_object()
            && (root.get("success").is_some() || root.get("data").is_some());
        if !is_envelope {
            return Self {
                success: None,
                data: root.clone(),
                message: None,
            };
        }
        Self {
            success: root.get("success").and_then(Value::as_bool),
            data: root.get("data").cloned().unwrap_or(Value::Null),
            message: pick_str(root, &["message", "error"]),
        }
    }
}

pub fn unwrap_data(root: &Value) -> &Value {
    if root.is_object() && root.get("success").is_some() {
        return root.get("data").unwrap_or(&Value::Null);
    }
    root
}

pub fn pick<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|v| !v.is_null())
}

pub fn pick_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub fn pick_f64(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| value.get(*key).and_then(number_of))
}

pub fn pick_u64(value: &Value, keys: &[&str]) -> Option<u64> {
    pick_f64(value, keys).map(|n| if n <= 0.0 { 0 } else { n.round() as u64 })
}

pub fn pick_time(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(parse_timestamp))
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| s.trim().parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
