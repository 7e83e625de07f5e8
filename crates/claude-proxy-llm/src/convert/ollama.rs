//! Conversion between canonical types and the Ollama `/api/chat` format

use serde_json::Value;

use super::{
    cap_stop_sequences, clamp_temperature, flatten_tool_block, input_schema, max_tokens, stop_reason, system_text,
    tool_names, tool_result_text,
};
use crate::error::LlmError;
use crate::protocol::ollama::{ChatRequest, ChatResponse, FunctionCall, FunctionDefinition, Message, Options, Tool, ToolCall};
use crate::stream::{StreamDecoder, UpstreamDelta};
use crate::types::{
    ContentBlock, ImageSource, MessagesRequest, MessagesResponse, ResponseBlock, Role, StopReason, Usage, message_id,
    tool_use_id,
};

// -- Outbound --

/// Build an Ollama chat request; content is flattened to strings
pub fn to_chat_request(request: &MessagesRequest, model: &str, tools_enabled: bool) -> (ChatRequest, Vec<&'static str>) {
    let mut dropped = Vec::new();
    let names = tool_names(&request.messages);

    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = system_text(request) {
        messages.push(message("system", system));
    }

    for source in request.messages.iter().filter(|message| message.role != Role::System) {
        let role = match source.role {
            Role::Assistant => "assistant",
            _ => "user",
        };

        let mut text = String::new();
        let mut images = Vec::new();
        let mut tool_calls = Vec::new();

        for block in source.content.blocks().iter() {
            match block {
                ContentBlock::Text { text: fragment } => text.push_str(fragment),
                ContentBlock::Image {
                    source: ImageSource::Base64 { data, .. },
                } => images.push(data.clone()),
                ContentBlock::Image { .. } => dropped.push("image_url"),
                ContentBlock::ToolUse { name, input, .. } if tools_enabled => tool_calls.push(ToolCall {
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: input.clone(),
                    },
                }),
                ContentBlock::ToolResult { tool_use_id, .. } if tools_enabled => messages.push(Message {
                    role: "tool".to_owned(),
                    content: tool_result_text(block),
                    images: None,
                    tool_calls: None,
                    tool_name: names.get(tool_use_id).cloned(),
                }),
                ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => {
                    if let Some(flattened) = flatten_tool_block(block) {
                        text.push_str(&flattened);
                    }
                }
                ContentBlock::Unknown => dropped.push("content_block"),
            }
        }

        if text.is_empty() && images.is_empty() && tool_calls.is_empty() {
            continue;
        }

        messages.push(Message {
            role: role.to_owned(),
            content: text,
            images: (!images.is_empty()).then_some(images),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_name: None,
        });
    }

    if request.tool_choice.is_some() {
        dropped.push("tool_choice");
    }

    let tools = request
        .tools
        .as_ref()
        .filter(|tools| tools_enabled && !tools.is_empty())
        .map(|tools| {
            tools
                .iter()
                .map(|tool| Tool {
                    tool_type: "function",
                    function: FunctionDefinition {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: input_schema(&tool.input_schema),
                    },
                })
                .collect()
        });

    let options = Options {
        num_predict: Some(max_tokens(request)),
        temperature: clamp_temperature(request.temperature, 2.0),
        top_p: request.top_p,
        top_k: request.top_k,
        stop: cap_stop_sequences(request.stop_sequences.as_deref(), usize::MAX, &mut dropped),
    };

    let chat = ChatRequest {
        model: model.to_owned(),
        messages,
        stream: request.is_streaming(),
        options: Some(options),
        tools,
    };

    (chat, dropped)
}

fn message(role: &str, content: String) -> Message {
    Message {
        role: role.to_owned(),
        content,
        images: None,
        tool_calls: None,
        tool_name: None,
    }
}

// -- Inbound --

fn done_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "stop" | "unload" | "load" => Some(StopReason::EndTurn),
        "length" => Some(StopReason::MaxTokens),
        _ => None,
    }
}

/// Convert a complete (non-streamed) chat response
pub fn from_chat_response(response: ChatResponse, model: &str) -> Result<MessagesResponse, LlmError> {
    if let Some(error) = response.error {
        return Err(LlmError::protocol(error));
    }

    let mut out = MessagesResponse::new(message_id(), model.to_owned());

    let message = response.message.unwrap_or_else(|| self::message("assistant", String::new()));

    if !message.content.is_empty() {
        out.content.push(ResponseBlock::Text { text: message.content });
    }

    let tool_calls = message.tool_calls.unwrap_or_default();
    let has_tool_calls = !tool_calls.is_empty();

    out.content.extend(tool_calls.into_iter().map(|call| ResponseBlock::ToolUse {
        id: tool_use_id(),
        name: call.function.name,
        input: object_or_empty(call.function.arguments),
    }));

    let reason = match response.done_reason.as_deref() {
        Some(reason) => stop_reason(reason, done_reason, &mut out.warnings),
        None => StopReason::EndTurn,
    };

    out.stop_reason = Some(if has_tool_calls && reason == StopReason::EndTurn {
        StopReason::ToolUse
    } else {
        reason
    });

    out.usage = Usage {
        input_tokens: response.prompt_eval_count.unwrap_or(0),
        output_tokens: response.eval_count.unwrap_or(0),
    };

    Ok(out)
}

fn object_or_empty(arguments: Value) -> Value {
    if arguments.is_null() {
        serde_json::json!({})
    } else {
        arguments
    }
}

// -- Streaming --

/// Decoder for NDJSON lines; tool calls always arrive whole
#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    started: bool,
    next_slot: u32,
}

impl StreamDecoder for ChatStreamDecoder {
    fn decode_stream_chunk(&mut self, data: &str) -> Result<Vec<UpstreamDelta>, LlmError> {
        let chunk: ChatResponse =
            serde_json::from_str(data).map_err(|e| LlmError::protocol(format!("malformed stream chunk: {e}")))?;

        if let Some(error) = chunk.error {
            return Err(LlmError::StreamInterrupted(error));
        }

        let mut deltas = Vec::new();

        if !self.started {
            self.started = true;
            deltas.push(UpstreamDelta::Start {
                id: None,
                input_tokens: None,
            });
        }

        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                deltas.push(UpstreamDelta::Text(message.content));
            }

            for call in message.tool_calls.unwrap_or_default() {
                let slot = self.next_slot;
                self.next_slot += 1;

                deltas.push(UpstreamDelta::ToolStart {
                    slot,
                    id: tool_use_id(),
                    name: call.function.name,
                });
                deltas.push(UpstreamDelta::ToolArguments {
                    slot,
                    fragment: object_or_empty(call.function.arguments).to_string(),
                });
                deltas.push(UpstreamDelta::ToolStop { slot });
            }
        }

        if chunk.done {
            let reason = chunk
                .done_reason
                .as_deref()
                .map_or(StopReason::EndTurn, |reason| stop_reason(reason, done_reason, &mut Vec::new()));

            deltas.push(UpstreamDelta::Finish {
                reason,
                stop_sequence: None,
            });
            deltas.push(UpstreamDelta::Usage {
                input_tokens: chunk.prompt_eval_count,
                output_tokens: chunk.eval_count,
            });
            deltas.push(UpstreamDelta::Done);
        }

        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(value: Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn request_shape() {
        let request = request(json!({
            "model": "claude-3-haiku",
            "system": [{"type": "text", "text": "Be brief."}],
            "max_tokens": 100,
            "temperature": 0.2,
            "top_k": 20,
            "stop_sequences": ["\n\n"],
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "Describe"},
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBOR"}},
                {"type": "image", "source": {"type": "url", "url": "https://example.com/cat.png"}}
            ]}]
        }));

        let (chat, dropped) = to_chat_request(&request, "llama2", true);

        insta::assert_json_snapshot!(chat, @r#"
        {
          "model": "llama2",
          "messages": [
            {
              "role": "system",
              "content": "Be brief."
            },
            {
              "role": "user",
              "content": "Describe",
              "images": [
                "iVBOR"
              ]
            }
          ],
          "stream": false,
          "options": {
            "num_predict": 100,
            "temperature": 0.2,
            "top_k": 20,
            "stop": [
              "\n\n"
            ]
          }
        }
        "#);
        assert_eq!(dropped, ["image_url"]);
    }

    #[test]
    fn tool_results_carry_tool_name() {
        let request = request(json!({
            "model": "m",
            "tools": [{"name": "weather", "input_schema": {"type": "object"}}],
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {"city": "Oslo"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "-3C", "is_error": false}
                ]}
            ]
        }));

        let (chat, _) = to_chat_request(&request, "llama3.1", true);
        let body = serde_json::to_value(&chat).unwrap();

        assert_eq!(body["messages"][0]["tool_calls"][0]["function"]["arguments"], json!({"city": "Oslo"}));
        assert_eq!(body["messages"][1], json!({"role": "tool", "content": "-3C", "tool_name": "weather"}));
        assert_eq!(body["tools"][0]["function"]["name"], "weather");
    }

    #[test]
    fn response_conversion() {
        let response: ChatResponse = serde_json::from_value(json!({
            "model": "llama2",
            "message": {"role": "assistant", "content": "Hi there"},
            "done": true,
            "done_reason": "length",
            "prompt_eval_count": 26,
            "eval_count": 298
        }))
        .unwrap();

        let out = from_chat_response(response, "llama2").unwrap();

        assert_eq!(out.content, [ResponseBlock::Text { text: "Hi there".into() }]);
        assert_eq!(out.stop_reason, Some(StopReason::MaxTokens));
        assert_eq!(out.usage, Usage { input_tokens: 26, output_tokens: 298 });
    }

    #[test]
    fn response_tool_calls_stop_for_tool_use() {
        let response: ChatResponse = serde_json::from_value(json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "weather", "arguments": {"city": "Oslo"}}}]
            },
            "done": true,
            "done_reason": "stop"
        }))
        .unwrap();

        let out = from_chat_response(response, "llama3.1").unwrap();

        assert_eq!(out.stop_reason, Some(StopReason::ToolUse));
        let ResponseBlock::ToolUse { id, input, .. } = &out.content[0] else {
            unreachable!("expected tool use");
        };
        assert!(id.starts_with("toolu_"));
        assert_eq!(input, &json!({"city": "Oslo"}));
    }

    #[test]
    fn stream_lines() {
        let mut decoder = ChatStreamDecoder::default();

        let deltas = decoder
            .decode_stream_chunk(r#"{"model":"llama2","message":{"role":"assistant","content":"The"},"done":false}"#)
            .unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[1], UpstreamDelta::Text("The".into()));

        let deltas = decoder
            .decode_stream_chunk(
                r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":3,"eval_count":5}"#,
            )
            .unwrap();
        assert_eq!(
            deltas,
            [
                UpstreamDelta::Finish {
                    reason: StopReason::EndTurn,
                    stop_sequence: None
                },
                UpstreamDelta::Usage {
                    input_tokens: Some(3),
                    output_tokens: Some(5)
                },
                UpstreamDelta::Done
            ]
        );
    }

    #[test]
    fn stream_error_line() {
        let mut decoder = ChatStreamDecoder::default();
        let err = decoder.decode_stream_chunk(r#"{"error":"model 'x' not found"}"#).unwrap_err();

        assert!(matches!(err, LlmError::StreamInterrupted(_)));
    }
}
