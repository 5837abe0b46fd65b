//! Scrubbing of structured trace details before they are persisted.

use serde_json::{Map, Value};

use orchestra_core::text::{preview, PREVIEW_CHARS};

pub const REDACTED: &str = "[REDACTED]";

/// Substrings that mark a key as carrying secret material.
const SENSITIVE_KEY_MARKERS: &[&str] = &[
    "credential",
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "private_key",
];

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_MARKERS.iter().any(|m| key.contains(m))
        && !key.ends_with("_tokens")
        && key != "tokens_used"
        && key != "tokens"
}

/// Redact secret-bearing keys and cut every string down to a preview.
pub fn sanitize_details(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if is_sensitive(&k) {
                        (k, Value::String(REDACTED.into()))
                    } else {
                        (k, sanitize_details(v))
                    }
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_details).collect()),
        Value::String(s) => Value::String(preview(&s, PREVIEW_CHARS)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_credentials() {
        let details = json!({
            "skill": "gmail",
            "credentials": {"user": "a", "password": "b"},
            "request": {"headers": {"Authorization": "Bearer x"}},
            "prompt_tokens": 12,
        });
        let clean = sanitize_details(details);
        assert_eq!(clean["credentials"], json!(REDACTED));
        assert_eq!(clean["request"]["headers"]["Authorization"], json!(REDACTED));
        assert_eq!(clean["prompt_tokens"], json!(12));
        assert_eq!(clean["skill"], json!("gmail"));
    }

    #[test]
    fn test_token_counts_are_not_redacted() {
        let clean = sanitize_details(json!({
            "tokens": 42,
            "total_tokens": 42,
            "access_token": "abc",
        }));
        assert_eq!(clean["tokens"], json!(42));
        assert_eq!(clean["total_tokens"], json!(42));
        assert_eq!(clean["access_token"], json!(REDACTED));
    }

    #[test]
    fn test_truncates_long_strings() {
        let long = "x".repeat(1000);
        let clean = sanitize_details(json!({"input": long, "list": ["y".repeat(400)]}));
        assert_eq!(clean["input"].as_str().unwrap().chars().count(), PREVIEW_CHARS);
        assert_eq!(clean["list"][0].as_str().unwrap().chars().count(), PREVIEW_CHARS);
    }
}
