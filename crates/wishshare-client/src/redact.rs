//! Secret redaction for diagnostic payloads
//!
//! Request and response bodies are attached to failure logs and to [`crate::error::ApiError`].
//! Everything passes through here first so passwords, tokens and cookies never reach a log line.

use serde_json::Value;

/// Replacement for sensitive values
pub const REDACTED: &str = "[REDACTED]";

/// Replacement for containers nested deeper than [`MAX_DEPTH`]
pub const TRUNCATED: &str = "[TRUNCATED]";

/// Maximum nesting depth that is walked
pub const MAX_DEPTH: usize = 6;

/// Longest raw text body kept in diagnostics
const MAX_TEXT_LEN: usize = 2000;

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "access_token",
    "refresh_token",
    "authorization",
    "cookie",
    "set-cookie",
    "secret",
];

/// Returns true if values under this key must never be logged
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&key.as_str()) || key.contains("password") || key.contains("token")
}

/// Returns a copy of `value` with every sensitive field replaced by [`REDACTED`]
pub fn redact(value: &Value) -> Value {
    redact_at(value, 0)
}

fn redact_at(value: &Value, depth: usize) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) if depth >= MAX_DEPTH => {
            Value::String(TRUNCATED.to_string())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let inner = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_at(inner, depth + 1)
                    };
                    (key.clone(), inner)
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| redact_at(item, depth + 1)).collect())
        }
        other => other.clone(),
    }
}

/// Redacts a raw body of unknown shape
///
/// JSON is redacted structurally. Other text is dropped entirely if it mentions a
/// sensitive key (form-encoded credentials, cookie headers) and truncated otherwise.
pub fn redact_text(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return redact(&value).to_string();
    }

    let lowered = body.to_ascii_lowercase();
    if SENSITIVE_KEYS.iter().any(|key| lowered.contains(key)) {
        return REDACTED.to_string();
    }

    if body.chars().count() > MAX_TEXT_LEN {
        let mut truncated: String = body.chars().take(MAX_TEXT_LEN).collect();
        truncated.push('…');
        truncated
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_top_level_password() {
        let body = json!({"email": "a@example.com", "password": "hunter2"});
        let redacted = redact(&body);

        assert_eq!(redacted["email"], "a@example.com");
        assert_eq!(redacted["password"], REDACTED);
    }

    #[test]
    fn redacts_nested_objects_and_arrays() {
        let body = json!({
            "profile": {
                "logins": [
                    {"provider": "github", "access_token": "gho_abc"},
                    {"provider": "email", "Password": "hunter2"}
                ]
            }
        });
        let text = redact(&body).to_string();

        assert!(!text.contains("gho_abc"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("github"));
    }

    #[test]
    fn matches_keys_containing_sensitive_words() {
        assert!(is_sensitive_key("new_password"));
        assert!(is_sensitive_key("publicToken"));
        assert!(is_sensitive_key("Set-Cookie"));
        assert!(!is_sensitive_key("title"));
    }

    #[test]
    fn truncates_past_max_depth() {
        let mut body = json!({"password": "deep-secret"});
        for _ in 0..(MAX_DEPTH + 2) {
            body = json!({ "inner": body });
        }
        let text = redact(&body).to_string();

        assert!(text.contains(TRUNCATED));
        assert!(!text.contains("deep-secret"));
    }

    #[test]
    fn leaves_scalars_untouched() {
        assert_eq!(redact(&json!(42)), json!(42));
        assert_eq!(redact(&json!("plain")), json!("plain"));
    }

    #[test]
    fn redact_text_handles_json_and_form_bodies() {
        let json_body = r#"{"password":"hunter2","title":"Birthday"}"#;
        let redacted = redact_text(json_body);
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("Birthday"));

        assert_eq!(redact_text("username=bob&password=hunter2"), REDACTED);
        assert_eq!(redact_text("Internal Server Error"), "Internal Server Error");
    }
}
