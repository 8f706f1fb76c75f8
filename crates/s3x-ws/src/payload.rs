//! Client-facing payload handling

use chrono::{Local, TimeZone};
use serde_json::Value;

/// Topic a client receives on: the leading `to` of its id becomes `from`
pub fn reply_topic(id: &str) -> Option<String> {
    let rest = id.strip_prefix("to")?;
    if rest.is_empty() {
        return None;
    }
    Some(format!("from{}", rest))
}

/// Whether a gateway reported a terminal failure
pub fn is_panic(payload: &Value) -> bool {
    payload.get("report").and_then(Value::as_str) == Some("panic")
}

/// Rewrite a numeric `timestamp` (unix seconds) as local
/// `%Y-%m-%d %H:%M:%S`. Other payloads pass through unchanged.
pub fn localize_timestamp(mut payload: Value) -> Value {
    let Some(seconds) = payload.get("timestamp").and_then(Value::as_f64) else {
        return payload;
    };

    let secs = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1e9) as u32;
    if let Some(local) = Local.timestamp_opt(secs, nanos).single() {
        payload["timestamp"] = Value::String(local.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    payload
}
