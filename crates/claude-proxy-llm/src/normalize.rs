//! Upstream failure normalization
//!
//! Every non-success upstream response and every transport failure passes
//! through here on its way to the client. Provider-specific overrides are
//! checked before the shared status table.

use claude_proxy_config::ProviderKind;
use http::HeaderMap;
use serde_json::Value;

use crate::error::{ErrorKind, NormalizedError};

const MAX_MESSAGE_LEN: usize = 512;

/// Map an upstream HTTP error response into the canonical taxonomy
///
/// Never fails: bodies that are not JSON, or JSON without a recognizable
/// message, produce a generic message carrying the status.
pub fn normalize(provider: ProviderKind, status: u16, body: &[u8]) -> NormalizedError {
    let message = extract_message(body).unwrap_or_else(|| format!("upstream returned HTTP {status}"));

    let (kind, retryable) = provider_override(provider, status, body).unwrap_or_else(|| classify(status));

    NormalizedError {
        kind,
        upstream_status: Some(status),
        message,
        retryable,
        retry_after: None,
        timed_out: false,
    }
}

/// [`normalize`] plus the `Retry-After` hint from response headers
pub fn normalize_response(provider: ProviderKind, status: u16, headers: &HeaderMap, body: &[u8]) -> NormalizedError {
    let mut error = normalize(provider, status, body);
    error.retry_after = retry_after(headers);
    error
}

/// Map a failure to reach the upstream at all
pub fn transport(error: &reqwest::Error) -> NormalizedError {
    if error.is_timeout() {
        return timeout("upstream request timed out");
    }

    let message = if error.is_connect() {
        "failed to connect to upstream"
    } else {
        "upstream request failed"
    };

    NormalizedError {
        kind: ErrorKind::UpstreamConnection,
        upstream_status: None,
        message: message.to_owned(),
        retryable: true,
        retry_after: None,
        timed_out: false,
    }
}

/// A local deadline expired while waiting on the upstream
pub fn timeout(message: &str) -> NormalizedError {
    NormalizedError {
        kind: ErrorKind::UpstreamConnection,
        upstream_status: None,
        message: message.to_owned(),
        retryable: true,
        retry_after: None,
        timed_out: true,
    }
}

fn provider_override(provider: ProviderKind, status: u16, body: &[u8]) -> Option<(ErrorKind, bool)> {
    match (provider, status) {
        (ProviderKind::Openai | ProviderKind::Vllm, 408) => Some((ErrorKind::UpstreamConnection, true)),
        (ProviderKind::Gemini, 400) if reports_invalid_key(body) => Some((ErrorKind::Auth, false)),
        (ProviderKind::Glm, 529) => Some((ErrorKind::RateLimit, true)),
        _ => None,
    }
}

const fn classify(status: u16) -> (ErrorKind, bool) {
    match status {
        401 | 403 => (ErrorKind::Auth, false),
        429 => (ErrorKind::RateLimit, true),
        500..=599 => (ErrorKind::UpstreamConnection, true),
        _ => (ErrorKind::UpstreamProtocol, false),
    }
}

/// Gemini reports bad keys as 400 with `API_KEY_INVALID` in `error.details[].reason`
fn reports_invalid_key(body: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(body) {
        Ok(json) => json
            .pointer("/error/details")
            .and_then(Value::as_array)
            .is_some_and(|details| {
                details
                    .iter()
                    .any(|detail| detail.get("reason").and_then(Value::as_str) == Some("API_KEY_INVALID"))
            }),
        Err(_) => String::from_utf8_lossy(body).contains("API_KEY_INVALID"),
    }
}

/// Pull a message out of the common error body shapes
///
/// `{"error": {"message": ..}}` (OpenAI, Gemini, Anthropic-style),
/// `{"error": ".."}` (Ollama, vLLM) and `{"message": ..}`.
fn extract_message(body: &[u8]) -> Option<String> {
    let json: Value = serde_json::from_slice(body).ok()?;

    let message = json
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| json.get("error").and_then(Value::as_str))
        .or_else(|| json.get("message").and_then(Value::as_str))?
        .trim();

    if message.is_empty() {
        return None;
    }

    Some(truncate(message))
}

fn truncate(message: &str) -> String {
    match message.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((end, _)) => format!("{}...", &message[..end]),
        None => message.to_owned(),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
