//! Helpers shared by the provider HTTP clients.

use super::error::ProviderError;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const MAX_PLAIN_ERROR_CHARS: usize = 300;

/// JSON pointers tried, in order, when digging an error message out of a
/// provider payload.
const ERROR_MESSAGE_POINTERS: &[&str] = &[
    "/error/message",
    "/error/raw_message",
    "/error",
    "/detail/0/msg",
    "/detail",
    "/message",
    "/failure_reason",
    "/data/error/message",
];

/// Build the HTTP client shared by all providers.
pub fn build_client(timeout: Option<Duration>) -> Result<Client, ProviderError> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| ProviderError::Connection(format!("Failed to create HTTP client: {}", e)))
}

/// Best-effort extraction of a human readable error from a response body:
/// JSON first, plain text as a fallback.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = first_string(&value, ERROR_MESSAGE_POINTERS) {
            return message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_PLAIN_ERROR_CHARS).collect()
}

/// First non-empty string found at any of `pointers`. Numbers are accepted
/// too, since some providers return numeric ids.
pub fn first_string(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|pointer| match value.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First non-empty string found under any of `keys` directly on `value`.
pub fn first_key(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Turn a response into JSON, mapping non-2xx statuses to
/// [`ProviderError::Api`] with the best message we can find.
pub async fn read_json(response: reqwest::Response) -> Result<Value, ProviderError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message: extract_error_message(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| {
        ProviderError::InvalidResponse(format!("Failed to parse provider response: {}", e))
    })
}

/// Join `base` and `path` without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
