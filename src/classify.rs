//! Error classification for failed requests
//!
//! Server error bodies are untyped JSON. The classifier reads them as a generic
//! map and picks out `message`, `detail`, `error` and `code` when present,
//! falling back to a per-status default message otherwise.

use serde_json::{Map, Value};

use crate::error::ApiError;

/// Message used for every transport-level failure
pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";

/// Default human-readable message for a status code
#[must_use]
pub fn default_message(status: u16) -> String {
    let message = match status {
        400 => "Invalid request. Please check your input.",
        401 => "Authentication failed. Please log in again.",
        403 => "You do not have permission to perform this action.",
        404 => "The requested resource was not found.",
        409 => "This request conflicts with the current state of the resource.",
        422 => "Validation failed. Please check your input.",
        429 => "Too many requests. Please slow down and try again later.",
        500 => "Internal server error. Please try again later.",
        502 => "Bad gateway. The server is temporarily unreachable.",
        503 => "Service unavailable. Please try again later.",
        _ => return format!("Request failed with status {status}."),
    };
    message.to_string()
}

/// Classify a non-2xx response from its status and raw body text
#[must_use]
pub fn classify_response(status: u16, body: &str) -> ApiError {
    let fields = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        });

    let (message, code) = match fields {
        Some(map) => (extract_message(&map), extract_code(&map)),
        None => {
            if !body.is_empty() {
                tracing::trace!(status, "Error body is not a JSON object");
            }
            (None, None)
        }
    };

    ApiError::api(
        status,
        code,
        message.unwrap_or_else(|| default_message(status)),
    )
}

/// Classify a failure that never produced an HTTP response
#[must_use]
pub fn classify_transport(err: &reqwest::Error) -> ApiError {
    tracing::debug!(error = %err, "Transport failure");
    ApiError::network(NETWORK_ERROR_MESSAGE)
}

fn extract_message(map: &Map<String, Value>) -> Option<String> {
    ["message", "detail", "error"]
        .iter()
        .filter_map(|key| map.get(*key))
        .find_map(message_from_value)
}

fn message_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s),
        // validation errors: [{"loc": [...], "msg": "..."}, ...]
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => non_blank(s),
                    Value::Object(obj) => obj
                        .get("msg")
                        .or_else(|| obj.get("message"))
                        .and_then(Value::as_str)
                        .and_then(non_blank),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        _ => None,
    }
}

fn extract_code(map: &Map<String, Value>) -> Option<String> {
    match map.get("code")? {
        Value::String(s) => non_blank(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
