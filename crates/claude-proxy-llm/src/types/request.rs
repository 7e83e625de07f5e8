use serde::{Deserialize, Serialize};

use super::message::{Message, SystemPrompt};
use super::tool::{Tool, ToolChoice};
use crate::error::LlmError;

/// Inbound `POST /v1/messages` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// Canonical model identifier, optionally prefixed with `provider/`
    pub model: String,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Top-level system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Whether to stream the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Tool choice configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Request metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Request metadata
///
/// `provider` is consumed by the gateway. Everything else is forwarded to
/// providers that understand Anthropic metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Upstream provider to route to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Remaining metadata fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessagesRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Whether the request offers the model any tools
    pub fn declares_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|tools| !tools.is_empty())
    }

    /// Provider named in `metadata.provider`
    pub fn metadata_provider(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.provider.as_deref())
            .filter(|provider| !provider.is_empty())
    }

    /// Reject bodies that parse but cannot be served
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.model.trim().is_empty() {
            return Err(LlmError::InvalidRequest("model must not be empty".to_owned()));
        }

        if self.messages.is_empty() {
            return Err(LlmError::InvalidRequest("messages must not be empty".to_owned()));
        }

        if self.max_tokens == Some(0) {
            return Err(LlmError::InvalidRequest("max_tokens must be greater than zero".to_owned()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn minimal_request() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku",
            "messages": [{"role": "user", "content": "hello"}]
        }))
        .unwrap();

        assert!(!request.is_streaming());
        assert!(!request.declares_tools());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn metadata_provider_and_extras() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku",
            "messages": [{"role": "user", "content": "hello"}],
            "metadata": {"provider": "ollama", "user_id": "u-1"}
        }))
        .unwrap();

        assert_eq!(request.metadata_provider(), Some("ollama"));
        assert_eq!(request.metadata.unwrap().extra["user_id"], "u-1");
    }

    #[test]
    fn empty_messages_rejected() {
        let request: MessagesRequest =
            serde_json::from_value(json!({"model": "claude-3-haiku", "messages": []})).unwrap();

        let err = request.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid request: messages must not be empty");
    }

    #[test]
    fn empty_tool_list_is_not_a_tool_request() {
        let request: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku",
            "messages": [{"role": "user", "content": "hello"}],
            "tools": []
        }))
        .unwrap();

        assert!(!request.declares_tools());
    }
}
