//! Conversion between canonical types and the `OpenAI` chat completions format
//!
//! vLLM speaks the same protocol with a few differences captured by
//! [`Dialect`].

use std::collections::HashSet;

use serde_json::{Value, json};

use super::{
    cap_stop_sequences, clamp_temperature, flatten_tool_block, input_schema, max_tokens, parse_arguments,
    stop_reason, tool_result_text,
};
use crate::error::LlmError;
use crate::protocol::openai::{
    ChatChunk, ChatContent, ChatMessage, ChatRequest, ChatResponse, ChatTool, ContentPart, FunctionCall,
    FunctionDefinition, ImageUrl, StreamOptions, ToolCall,
};
use crate::stream::{StreamDecoder, UpstreamDelta};
use crate::types::{
    ContentBlock, Message, MessagesRequest, MessagesResponse, ResponseBlock, Role, StopReason, ToolChoice, Usage,
    message_id, tool_use_id,
};

/// Which flavor of the chat completions API the upstream speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Vllm,
}

impl Dialect {
    /// `OpenAI` rejects more than four stop sequences
    const fn stop_limit(self) -> usize {
        match self {
            Self::OpenAi => 4,
            Self::Vllm => usize::MAX,
        }
    }
}

// -- Outbound: canonical request -> chat completions request --

/// Build a chat completions request
///
/// Returns the request plus the canonical parameters that were dropped.
pub fn to_chat_request(
    request: &MessagesRequest,
    model: &str,
    dialect: Dialect,
    tools_enabled: bool,
) -> (ChatRequest, Vec<&'static str>) {
    let mut dropped = Vec::new();

    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system.as_ref().map(crate::types::SystemPrompt::text)
        && !system.trim().is_empty()
    {
        messages.push(text_message("system", system));
    }

    for message in &request.messages {
        match message.role {
            Role::System => messages.push(text_message("system", message.content.text())),
            Role::User => push_user_message(message, tools_enabled, &mut messages, &mut dropped),
            Role::Assistant => messages.push(assistant_message(message, tools_enabled)),
        }
    }

    let top_k = match dialect {
        Dialect::Vllm => request.top_k,
        Dialect::OpenAi => {
            if request.top_k.is_some() {
                dropped.push("top_k");
            }
            None
        }
    };

    let tools = request
        .tools
        .as_ref()
        .filter(|tools| tools_enabled && !tools.is_empty())
        .map(|tools| {
            tools
                .iter()
                .map(|tool| ChatTool {
                    tool_type: "function",
                    function: FunctionDefinition {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: input_schema(&tool.input_schema),
                    },
                })
                .collect::<Vec<_>>()
        });

    let tool_choice = match (&tools, &request.tool_choice) {
        (Some(_), Some(choice)) => Some(tool_choice(choice)),
        (None, Some(_)) => {
            dropped.push("tool_choice");
            None
        }
        _ => None,
    };

    let user = request
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.extra.get("user_id"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let stream = request.is_streaming();

    let chat = ChatRequest {
        model: model.to_owned(),
        messages,
        max_tokens: Some(max_tokens(request)),
        temperature: clamp_temperature(request.temperature, 2.0),
        top_p: request.top_p,
        top_k,
        stop: cap_stop_sequences(request.stop_sequences.as_deref(), dialect.stop_limit(), &mut dropped),
        stream: stream.then_some(true),
        stream_options: stream.then_some(StreamOptions { include_usage: true }),
        tools,
        tool_choice,
        user,
    };

    (chat, dropped)
}

fn text_message(role: &'static str, text: String) -> ChatMessage {
    ChatMessage {
        role,
        content: Some(ChatContent::Text(text)),
        tool_calls: None,
        tool_call_id: None,
    }
}

/// Tool results become `tool` messages ahead of the remaining user content
fn push_user_message(
    message: &Message,
    tools_enabled: bool,
    messages: &mut Vec<ChatMessage>,
    dropped: &mut Vec<&'static str>,
) {
    let mut parts = Vec::new();

    for block in message.content.blocks().iter() {
        match block {
            ContentBlock::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
            ContentBlock::Image { source } => parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url: source.to_uri() },
            }),
            ContentBlock::ToolResult { tool_use_id, .. } if tools_enabled => messages.push(ChatMessage {
                role: "tool",
                content: Some(ChatContent::Text(tool_result_text(block))),
                tool_calls: None,
                tool_call_id: Some(tool_use_id.clone()),
            }),
            ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => {
                if let Some(text) = flatten_tool_block(block) {
                    parts.push(ContentPart::Text { text });
                }
            }
            ContentBlock::Unknown => dropped.push("content_block"),
        }
    }

    let content = match parts.as_slice() {
        [] => return,
        [ContentPart::Text { text }] => ChatContent::Text(text.clone()),
        _ => ChatContent::Parts(parts),
    };

    messages.push(ChatMessage {
        role: "user",
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
    });
}

fn assistant_message(message: &Message, tools_enabled: bool) -> ChatMessage {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in message.content.blocks().iter() {
        match block {
            ContentBlock::Text { text: fragment } => text.push_str(fragment),
            ContentBlock::ToolUse { id, name, input } if tools_enabled => tool_calls.push(ToolCall {
                id: id.clone(),
                tool_type: "function".to_owned(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            other => {
                if let Some(flattened) = flatten_tool_block(other) {
                    text.push_str(&flattened);
                }
            }
        }
    }

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text))
    };

    ChatMessage {
        role: "assistant",
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}

fn tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Any => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Tool { name } => json!({"type": "function", "function": {"name": name}}),
    }
}

// -- Inbound: chat completions response -> canonical response --

fn finish_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "stop" => Some(StopReason::EndTurn),
        "length" => Some(StopReason::MaxTokens),
        "tool_calls" | "function_call" => Some(StopReason::ToolUse),
        "content_filter" => Some(StopReason::Error),
        _ => None,
    }
}

/// Convert a chat completions response
///
/// Text comes before tool calls, in the order the provider returned them.
pub fn from_chat_response(response: ChatResponse, model: &str) -> Result<MessagesResponse, LlmError> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(LlmError::protocol("chat completion response has no choices"));
    };

    let mut out = MessagesResponse::new(message_id(), model.to_owned());

    if let Some(text) = choice.message.content.filter(|text| !text.is_empty()) {
        out.content.push(ResponseBlock::Text { text });
    }

    let tool_calls = choice.message.tool_calls.unwrap_or_default();
    let has_tool_calls = !tool_calls.is_empty();

    for call in tool_calls {
        let input = parse_arguments(&call.function.arguments, &mut out.warnings);
        let id = if call.id.is_empty() { tool_use_id() } else { call.id };

        out.content.push(ResponseBlock::ToolUse {
            id,
            name: call.function.name,
            input,
        });
    }

    out.stop_reason = Some(match choice.finish_reason.as_deref() {
        Some(reason) => stop_reason(reason, finish_reason, &mut out.warnings),
        None if has_tool_calls => StopReason::ToolUse,
        None => StopReason::EndTurn,
    });

    if let Some(usage) = response.usage {
        out.usage = Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        };
    }

    Ok(out)
}

// -- Streaming --

/// Decoder for `data:` frames of a streamed completion
#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    started: bool,
    tool_slots: HashSet<u32>,
}

impl StreamDecoder for ChatStreamDecoder {
    fn decode_stream_chunk(&mut self, data: &str) -> Result<Vec<UpstreamDelta>, LlmError> {
        let data = data.trim();

        if data == "[DONE]" {
            return Ok(vec![UpstreamDelta::Done]);
        }

        let value: Value =
            serde_json::from_str(data).map_err(|e| LlmError::protocol(format!("malformed stream chunk: {e}")))?;

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .unwrap_or("upstream reported an error");
            return Err(LlmError::StreamInterrupted(message.to_owned()));
        }

        let chunk: ChatChunk =
            serde_json::from_value(value).map_err(|e| LlmError::protocol(format!("unexpected stream chunk: {e}")))?;

        let mut deltas = Vec::new();

        if !self.started {
            self.started = true;
            deltas.push(UpstreamDelta::Start {
                id: None,
                input_tokens: None,
            });
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content.filter(|text| !text.is_empty()) {
                deltas.push(UpstreamDelta::Text(text));
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();

                if self.tool_slots.insert(call.index) {
                    deltas.push(UpstreamDelta::ToolStart {
                        slot: call.index,
                        id: call.id.unwrap_or_else(tool_use_id),
                        name: function.name.unwrap_or_default(),
                    });
                }

                if let Some(fragment) = function.arguments.filter(|fragment| !fragment.is_empty()) {
                    deltas.push(UpstreamDelta::ToolArguments {
                        slot: call.index,
                        fragment,
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                deltas.push(UpstreamDelta::Finish {
                    reason: stop_reason(&reason, finish_reason, &mut Vec::new()),
                    stop_sequence: None,
                });
            }
        }

        if let Some(usage) = chunk.usage {
            deltas.push(UpstreamDelta::Usage {
                input_tokens: Some(usage.prompt_tokens),
                output_tokens: Some(usage.completion_tokens),
            });
        }

        Ok(deltas)
    }
}
