use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human turn
    User,
    /// Model turn
    Assistant,
    /// Inline system instruction
    System,
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author
    pub role: Role,
    /// Message content
    pub content: Content,
}

/// Message content, either shorthand text or ordered blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text shorthand
    Text(String),
    /// Ordered content blocks
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// View the content as blocks, wrapping shorthand text in a single block
    pub fn blocks(&self) -> Cow<'_, [ContentBlock]> {
        match self {
            Self::Text(text) => Cow::Owned(vec![ContentBlock::Text { text: text.clone() }]),
            Self::Blocks(blocks) => Cow::Borrowed(blocks),
        }
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Whether any block is a `tool_use` or `tool_result`
    pub fn has_tool_blocks(&self) -> bool {
        let Self::Blocks(blocks) = self else {
            return false;
        };

        blocks
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. }))
    }
}

/// Content block in a canonical message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text {
        /// The text string
        text: String,
    },
    /// Image content
    Image {
        /// Image source
        source: ImageSource,
    },
    /// Tool invocation made by the assistant
    ToolUse {
        /// Tool use identifier
        id: String,
        /// Tool name
        name: String,
        /// Tool input as JSON
        input: serde_json::Value,
    },
    /// Result of a tool invocation, sent back by the user
    ToolResult {
        /// Tool use ID this result responds to
        tool_use_id: String,
        /// Result content
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        /// Whether the tool call errored
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Block type this gateway does not translate (thinking, documents, ...)
    #[serde(other)]
    Unknown,
}

/// Image payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Inline base64 data
    Base64 {
        /// MIME type, e.g. `image/png`
        media_type: String,
        /// Base64-encoded bytes
        data: String,
    },
    /// Remote image
    Url {
        /// Image URL
        url: String,
    },
}

impl ImageSource {
    /// `data:` URI for inline images, the URL otherwise
    pub fn to_uri(&self) -> String {
        match self {
            Self::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
            Self::Url { url } => url.clone(),
        }
    }
}

/// Tool result payload, string shorthand or blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Plain text
    Text(String),
    /// Content blocks (text and images)
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// Text of the result, images omitted
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Top-level system prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Plain text
    Text(String),
    /// Text blocks
    Blocks(Vec<ContentBlock>),
}

impl SystemPrompt {
    /// Text of the prompt, blocks separated by newlines
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
