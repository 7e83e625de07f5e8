use serde::{Deserialize, Serialize};

use super::message::Role;

/// Canonical stop reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the turn
    EndTurn,
    /// Hit the `max_tokens` limit
    MaxTokens,
    /// Hit a stop sequence
    StopSequence,
    /// Model requested a tool call
    ToolUse,
    /// Generation was cut off by the provider (content filtering, failure)
    Error,
}

/// Token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Generated tokens
    pub output_tokens: u32,
}

/// Output content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    /// Generated text
    Text {
        /// The text string
        text: String,
    },
    /// Tool invocation
    ToolUse {
        /// Tool use identifier
        id: String,
        /// Tool name
        name: String,
        /// Tool input as JSON
        input: serde_json::Value,
    },
}

/// Canonical non-streaming response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Response identifier
    pub id: String,
    /// Always `message`
    #[serde(rename = "type")]
    pub object_type: String,
    /// Always assistant
    pub role: Role,
    /// Output blocks in provider order
    pub content: Vec<ResponseBlock>,
    /// Model id reported to the client
    pub model: String,
    /// Why generation stopped
    pub stop_reason: Option<StopReason>,
    /// Stop sequence that triggered the stop
    pub stop_sequence: Option<String>,
    /// Token usage
    pub usage: Usage,
    /// Transcoding warnings, logged but never serialized
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl MessagesResponse {
    /// Empty assistant message to be filled in by a response transcoder
    pub fn new(id: String, model: String) -> Self {
        Self {
            id,
            object_type: "message".to_owned(),
            role: Role::Assistant,
            content: Vec::new(),
            model,
            stop_reason: None,
            stop_sequence: None,
            usage: Usage::default(),
            warnings: Vec::new(),
        }
    }
}

/// Fresh `msg_` identifier for providers that do not return one
pub fn message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// Fresh `toolu_` identifier for providers that do not return one
pub fn tool_use_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}
