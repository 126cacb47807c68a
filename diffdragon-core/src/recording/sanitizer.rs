use std::collections::HashMap;

use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Header names (lowercase) whose values never reach the recording log.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "openai-api-key",
    "set-cookie",
    "x-github-token",
    "x-hub-signature",
    "x-hub-signature-256",
];

/// JSON object keys whose values are redacted at any depth.
const SENSITIVE_KEYS: &[&str] = &["token", "private_key", "secret", "password", "api_key"];

pub struct Sanitizer;

impl Sanitizer {
    pub fn is_sensitive_header(header_name: &str) -> bool {
        let lower = header_name.to_ascii_lowercase();
        SENSITIVE_HEADERS.contains(&lower.as_str())
    }

    pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let value = if Self::is_sensitive_header(name) {
                    REDACTED.to_string()
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Collect a header map into owned strings, dropping non-UTF-8 values and
    /// redacting sensitive ones.
    pub fn sanitize_header_map(headers: &axum::http::HeaderMap) -> HashMap<String, String> {
        let owned: HashMap<String, String> = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        Self::sanitize_headers(&owned)
    }

    pub fn sanitize_json(value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, val)| {
                        let val = if SENSITIVE_KEYS.contains(&key.as_str()) {
                            Value::String(REDACTED.to_string())
                        } else {
                            Self::sanitize_json(val)
                        };
                        (key.clone(), val)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(Self::sanitize_json).collect()),
            _ => value.clone(),
        }
    }
}
