use serde::{Deserialize, Serialize};

use super::message::Role;
use super::response::{ResponseBlock, StopReason, Usage};

/// Canonical streaming event, one per SSE frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of every stream
    MessageStart {
        /// Message shell with the resolved model
        message: StreamMessage,
    },
    /// New content block
    ContentBlockStart {
        /// Block index
        index: u32,
        /// Initial block content
        content_block: StreamContentBlock,
    },
    /// Incremental content within a block
    ContentBlockDelta {
        /// Block index
        index: u32,
        /// Delta content
        delta: BlockDelta,
    },
    /// Block finished
    ContentBlockStop {
        /// Block index
        index: u32,
    },
    /// Final stop reason and usage
    MessageDelta {
        /// Stop reason
        delta: MessageDelta,
        /// Usage totals
        usage: Usage,
    },
    /// Successful end of stream
    MessageStop,
    /// Terminal failure
    Error {
        /// Error details
        error: ErrorDetail,
    },
}

impl StreamEvent {
    /// SSE `event:` name
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Error { .. } => "error",
        }
    }

    /// Content block index, for block-scoped events
    pub const fn index(&self) -> Option<u32> {
        match self {
            Self::ContentBlockStart { index, .. }
            | Self::ContentBlockDelta { index, .. }
            | Self::ContentBlockStop { index } => Some(*index),
            _ => None,
        }
    }

    /// Whether no event may follow this one
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop | Self::Error { .. })
    }
}

/// Message shell carried by `message_start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Response identifier
    pub id: String,
    /// Always `message`
    #[serde(rename = "type")]
    pub object_type: String,
    /// Always assistant
    pub role: Role,
    /// Always empty at start
    pub content: Vec<ResponseBlock>,
    /// Model id reported to the client
    pub model: String,
    /// Always `null` at start
    pub stop_reason: Option<StopReason>,
    /// Always `null` at start
    pub stop_sequence: Option<String>,
    /// Prompt usage, when known up front
    pub usage: Usage,
}

/// Initial block content in `content_block_start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamContentBlock {
    /// Text block
    Text {
        /// Always empty
        text: String,
    },
    /// Tool use block
    ToolUse {
        /// Tool use ID
        id: String,
        /// Tool name
        name: String,
        /// Always an empty object
        input: serde_json::Value,
    },
}

/// Incremental block content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    /// Text fragment
    TextDelta {
        /// Text fragment
        text: String,
    },
    /// Tool input JSON fragment
    InputJsonDelta {
        /// JSON fragment
        partial_json: String,
    },
}

/// Payload of `message_delta`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelta {
    /// Final stop reason
    pub stop_reason: Option<StopReason>,
    /// Stop sequence that triggered the stop
    pub stop_sequence: Option<String>,
}

/// Error payload shared by error events and error response bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error kind, e.g. `rate_limit_error`
    #[serde(rename = "type")]
    pub error_type: String,
    /// Client-safe message
    pub message: String,
}
