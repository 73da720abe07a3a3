//! Response body decoding

use serde_json::Value;

/// Decode a raw body. Empty is `null`; anything that is not JSON is kept as
/// a JSON string so callers still see what the server said.
pub fn parse_body(raw: &[u8]) -> Value {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}

/// Strip the `{"data": ...}` envelope the API wraps most payloads in.
pub fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}
