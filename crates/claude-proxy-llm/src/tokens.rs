//! Local token estimation for `POST /v1/messages/count_tokens`
//!
//! Upstreams tokenize differently, so this is an estimate with the
//! `cl100k_base` encoding. No upstream call is made.

use std::sync::LazyLock;

use serde::Serialize;
use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::types::{ContentBlock, MessagesRequest};

/// Framing tokens added per message (role and separators)
const MESSAGE_OVERHEAD: usize = 3;

/// Rough cost of an image, which is not tokenized
const IMAGE_TOKENS: usize = 1_000;

static ENCODING: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!(error = %e, "failed to load cl100k_base, token counts fall back to a byte estimate");
        None
    }
});

/// `count_tokens` response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenCount {
    pub input_tokens: u32,
}

fn encode_len(text: &str) -> usize {
    match ENCODING.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len().div_ceil(4),
    }
}

fn block_tokens(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } => encode_len(text),
        ContentBlock::Image { .. } => IMAGE_TOKENS,
        ContentBlock::ToolUse { name, input, .. } => encode_len(name) + encode_len(&input.to_string()),
        ContentBlock::ToolResult { content, .. } => content.as_ref().map_or(0, |content| encode_len(&content.text())),
        ContentBlock::Unknown => 0,
    }
}

/// Estimate prompt tokens over system prompt, messages and tool definitions
pub fn count_tokens(request: &MessagesRequest) -> TokenCount {
    let system = request.system.as_ref().map_or(0, |system| encode_len(&system.text()));

    let messages: usize = request
        .messages
        .iter()
        .map(|message| MESSAGE_OVERHEAD + message.content.blocks().iter().map(block_tokens).sum::<usize>())
        .sum();

    let tools: usize = request
        .tools
        .iter()
        .flatten()
        .map(|tool| {
            encode_len(&tool.name)
                + tool.description.as_deref().map_or(0, encode_len)
                + encode_len(&tool.input_schema.to_string())
        })
        .sum();

    TokenCount {
        input_tokens: u32::try_from(system + messages + tools).unwrap_or(u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(value: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn counts_messages_and_system() {
        let short = count_tokens(&request(json!({
            "model": "claude-3-haiku",
            "messages": [{"role": "user", "content": "Hello"}]
        })));

        let longer = count_tokens(&request(json!({
            "model": "claude-3-haiku",
            "system": "You are a careful assistant who answers in full sentences.",
            "messages": [{"role": "user", "content": "Hello"}]
        })));

        assert!(short.input_tokens > 0);
        assert!(longer.input_tokens > short.input_tokens);
    }

    #[test]
    fn tools_add_to_the_count() {
        let messages = json!([{"role": "user", "content": "weather in Paris?"}]);

        let without = count_tokens(&request(json!({"model": "m", "messages": messages})));
        let with = count_tokens(&request(json!({
            "model": "m",
            "messages": messages,
            "tools": [{
                "name": "get_weather",
                "description": "Current weather for a city",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }]
        })));

        assert!(with.input_tokens > without.input_tokens);
    }

    #[test]
    fn identical_requests_count_the_same() {
        let body = json!({"model": "m", "messages": [{"role": "user", "content": "same text"}]});

        assert_eq!(count_tokens(&request(body.clone())), count_tokens(&request(body)));
    }
}
