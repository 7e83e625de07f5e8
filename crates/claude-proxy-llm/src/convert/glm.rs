//! Conversion for GLM/Z.AI upstreams, which speak the Anthropic Messages API
//!
//! Requests pass through almost unchanged. The work is in stripping what the
//! upstream would reject and reading its responses leniently.

use std::collections::HashSet;

use super::{clamp_temperature, flatten_tool_block, max_tokens, stop_reason, system_text};
use crate::error::LlmError;
use crate::protocol::anthropic::{
    AnthropicResponse, AnthropicResponseBlock, AnthropicStreamContentBlock, AnthropicStreamDelta, AnthropicStreamEvent,
};
use crate::stream::{StreamDecoder, UpstreamDelta};
use crate::types::{
    Content, ContentBlock, Message, MessagesRequest, MessagesResponse, ResponseBlock, Role, StopReason, SystemPrompt,
    Usage, message_id,
};

// -- Outbound --

/// Canonical request rewritten for the upstream
///
/// Inline system messages fold into `system`, untranslatable blocks are
/// removed and `metadata.provider` is stripped.
pub fn to_messages_request(
    request: &MessagesRequest,
    model: &str,
    tools_enabled: bool,
) -> (MessagesRequest, Vec<&'static str>) {
    let mut dropped = Vec::new();

    let messages = request
        .messages
        .iter()
        .filter(|message| message.role != Role::System)
        .filter_map(|message| {
            let blocks: Vec<ContentBlock> = message
                .content
                .blocks()
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Unknown => {
                        dropped.push("content_block");
                        None
                    }
                    ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } if !tools_enabled => {
                        flatten_tool_block(block).map(|text| ContentBlock::Text { text })
                    }
                    other => Some(other.clone()),
                })
                .collect();

            if blocks.is_empty() {
                return None;
            }

            let content = match &message.content {
                Content::Text(text) => Content::Text(text.clone()),
                Content::Blocks(_) => Content::Blocks(blocks),
            };

            Some(Message {
                role: message.role,
                content,
            })
        })
        .collect();

    let metadata = request
        .metadata
        .as_ref()
        .filter(|metadata| !metadata.extra.is_empty())
        .map(|metadata| crate::types::Metadata {
            provider: None,
            extra: metadata.extra.clone(),
        });

    let temperature = clamp_temperature(request.temperature, 1.0);

    let upstream = MessagesRequest {
        model: model.to_owned(),
        messages,
        system: system_text(request).map(SystemPrompt::Text),
        max_tokens: Some(max_tokens(request)),
        temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop_sequences: request.stop_sequences.clone(),
        stream: request.stream,
        tools: request.tools.clone().filter(|_| tools_enabled),
        tool_choice: request.tool_choice.clone().filter(|_| tools_enabled),
        metadata,
    };

    (upstream, dropped)
}

// -- Inbound --

fn anthropic_stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "end_turn" | "pause_turn" => Some(StopReason::EndTurn),
        "max_tokens" | "model_context_window_exceeded" => Some(StopReason::MaxTokens),
        "stop_sequence" => Some(StopReason::StopSequence),
        "tool_use" => Some(StopReason::ToolUse),
        "refusal" | "sensitive" | "network_error" => Some(StopReason::Error),
        _ => None,
    }
}

pub fn from_messages_response(response: AnthropicResponse, model: &str) -> MessagesResponse {
    let id = if response.id.starts_with("msg_") {
        response.id
    } else {
        message_id()
    };

    let mut out = MessagesResponse::new(id, model.to_owned());

    out.content = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            AnthropicResponseBlock::Text { text } => Some(ResponseBlock::Text { text }),
            AnthropicResponseBlock::ToolUse { id, name, input } => Some(ResponseBlock::ToolUse { id, name, input }),
            AnthropicResponseBlock::Other => None,
        })
        .collect();

    out.stop_reason = Some(
        response
            .stop_reason
            .as_deref()
            .map_or(StopReason::EndTurn, |reason| {
                stop_reason(reason, anthropic_stop_reason, &mut out.warnings)
            }),
    );
    out.stop_sequence = response.stop_sequence;
    out.usage = Usage {
        input_tokens: response.usage.input_tokens.unwrap_or(0),
        output_tokens: response.usage.output_tokens.unwrap_or(0),
    };

    out
}

// -- Streaming --

/// Decoder for Anthropic-style SSE events
///
/// Upstream block indices are tracked only to tell text, tool and skipped
/// (thinking) blocks apart; canonical indices are reassigned downstream.
#[derive(Debug, Default)]
pub struct MessagesStreamDecoder {
    text_blocks: HashSet<u32>,
    tool_blocks: HashSet<u32>,
}

impl StreamDecoder for MessagesStreamDecoder {
    fn decode_stream_chunk(&mut self, data: &str) -> Result<Vec<UpstreamDelta>, LlmError> {
        let event: AnthropicStreamEvent =
            serde_json::from_str(data).map_err(|e| LlmError::protocol(format!("malformed stream chunk: {e}")))?;

        let deltas = match event {
            AnthropicStreamEvent::MessageStart { message } => vec![UpstreamDelta::Start {
                id: Some(message.id),
                input_tokens: message.usage.and_then(|usage| usage.input_tokens),
            }],
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                AnthropicStreamContentBlock::Text { text } => {
                    self.text_blocks.insert(index);
                    vec![UpstreamDelta::Text(text)]
                }
                AnthropicStreamContentBlock::ToolUse { id, name } => {
                    self.tool_blocks.insert(index);
                    vec![UpstreamDelta::ToolStart { slot: index, id, name }]
                }
                AnthropicStreamContentBlock::Other => Vec::new(),
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicStreamDelta::TextDelta { text } if self.text_blocks.contains(&index) => {
                    vec![UpstreamDelta::Text(text)]
                }
                AnthropicStreamDelta::InputJsonDelta { partial_json } if self.tool_blocks.contains(&index) => {
                    vec![UpstreamDelta::ToolArguments {
                        slot: index,
                        fragment: partial_json,
                    }]
                }
                _ => Vec::new(),
            },
            AnthropicStreamEvent::ContentBlockStop { index } => {
                if self.text_blocks.remove(&index) {
                    vec![UpstreamDelta::TextStop]
                } else if self.tool_blocks.remove(&index) {
                    vec![UpstreamDelta::ToolStop { slot: index }]
                } else {
                    Vec::new()
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let mut deltas = Vec::with_capacity(2);

                if let Some(reason) = delta.stop_reason {
                    deltas.push(UpstreamDelta::Finish {
                        reason: stop_reason(&reason, anthropic_stop_reason, &mut Vec::new()),
                        stop_sequence: delta.stop_sequence,
                    });
                }

                if let Some(usage) = usage {
                    deltas.push(UpstreamDelta::Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    });
                }

                deltas
            }
            AnthropicStreamEvent::MessageStop => vec![UpstreamDelta::Done],
            AnthropicStreamEvent::Ping => Vec::new(),
            AnthropicStreamEvent::Error { error } => {
                let message = if error.message.is_empty() {
                    error.error_type
                } else {
                    error.message
                };
                return Err(LlmError::StreamInterrupted(message));
            }
        };

        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn request(value: Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn passthrough_request() {
        let request = request(json!({
            "model": "glm/claude-3-5-sonnet",
            "temperature": 1.5,
            "messages": [
                {"role": "system", "content": "Answer tersely."},
                {"role": "user", "content": [
                    {"type": "thinking", "thinking": "..."},
                    {"type": "text", "text": "hi"}
                ]}
            ],
            "metadata": {"provider": "glm", "user_id": "u-1"}
        }));

        let (upstream, dropped) = to_messages_request(&request, "glm-4.6", true);
        let body = serde_json::to_value(&upstream).unwrap();

        assert_eq!(
            body,
            json!({
                "model": "glm-4.6",
                "system": "Answer tersely.",
                "max_tokens": 4096,
                "temperature": 1.0,
                "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
                "metadata": {"user_id": "u-1"}
            })
        );
        assert_eq!(dropped, ["content_block"]);
    }

    #[test]
    fn response_conversion() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "id": "msg_abc",
            "type": "message",
            "role": "assistant",
            "model": "glm-4.6",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "x"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 3}
        }))
        .unwrap();

        let out = from_messages_response(response, "glm-4.6");

        assert_eq!(out.id, "msg_abc");
        assert_eq!(out.content.len(), 2);
        assert_eq!(out.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(out.usage, Usage { input_tokens: 10, output_tokens: 3 });
    }

    #[test]
    fn stream_events() {
        let mut decoder = MessagesStreamDecoder::default();
        let mut decode = |data: &str| decoder.decode_stream_chunk(data).unwrap();

        assert_eq!(
            decode(r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"glm-4.6","usage":{"input_tokens":7,"output_tokens":1}}}"#),
            [UpstreamDelta::Start {
                id: Some("msg_1".into()),
                input_tokens: Some(7)
            }]
        );
        assert!(decode(r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#).is_empty());
        assert!(decode(r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hm"}}"#).is_empty());
        assert!(decode(r#"{"type":"content_block_stop","index":0}"#).is_empty());
        assert_eq!(
            decode(r#"{"type":"content_block_start","index":1,"content_block":{"type":"text","text":""}}"#),
            [UpstreamDelta::Text(String::new())]
        );
        assert_eq!(
            decode(r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Hi"}}"#),
            [UpstreamDelta::Text("Hi".into())]
        );
        assert_eq!(decode(r#"{"type":"content_block_stop","index":1}"#), [UpstreamDelta::TextStop]);
        assert_eq!(
            decode(r#"{"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":15}}"#),
            [
                UpstreamDelta::Finish {
                    reason: StopReason::EndTurn,
                    stop_sequence: None
                },
                UpstreamDelta::Usage {
                    input_tokens: None,
                    output_tokens: Some(15)
                }
            ]
        );
        assert!(decode(r#"{"type":"ping"}"#).is_empty());
        assert_eq!(decode(r#"{"type":"message_stop"}"#), [UpstreamDelta::Done]);
    }

    #[test]
    fn stream_error_event() {
        let mut decoder = MessagesStreamDecoder::default();
        let err = decoder
            .decode_stream_chunk(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();

        assert!(matches!(err, LlmError::StreamInterrupted(m) if m == "Overloaded"));
    }
}
