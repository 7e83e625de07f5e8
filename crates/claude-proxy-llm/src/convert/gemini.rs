//! Conversion between canonical types and the Gemini `generateContent` format

use serde_json::{Value, json};

use super::{
    cap_stop_sequences, clamp_temperature, flatten_tool_block, input_schema, max_tokens, stop_reason, system_text,
    tool_names, tool_result_text,
};
use crate::error::LlmError;
use crate::protocol::gemini::{
    Content, FunctionCall, FunctionCallingConfig, FunctionDeclaration, FunctionResponse, GenerateRequest,
    GenerateResponse, GenerationConfig, InlineData, Part, Tool, ToolConfig,
};
use crate::stream::{StreamDecoder, UpstreamDelta};
use crate::types::{
    ContentBlock, ImageSource, MessagesRequest, MessagesResponse, ResponseBlock, Role, StopReason, ToolChoice, Usage,
    message_id, tool_use_id,
};

/// Gemini accepts at most five stop sequences
const MAX_STOP_SEQUENCES: usize = 5;

/// Schema keywords Gemini rejects in function parameters
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties"];

// -- Outbound --

pub fn to_generate_request(
    request: &MessagesRequest,
    tools_enabled: bool,
) -> (GenerateRequest, Vec<&'static str>) {
    let mut dropped = Vec::new();
    let names = tool_names(&request.messages);

    let mut contents: Vec<Content> = Vec::with_capacity(request.messages.len());

    for message in request.messages.iter().filter(|message| message.role != Role::System) {
        let role = match message.role {
            Role::Assistant => "model",
            _ => "user",
        };

        let mut parts = Vec::new();

        for block in message.content.blocks().iter() {
            match block {
                ContentBlock::Text { text } if !text.is_empty() => parts.push(Part::text(text.clone())),
                ContentBlock::Text { .. } => {}
                ContentBlock::Image {
                    source: ImageSource::Base64 { media_type, data },
                } => parts.push(Part {
                    inline_data: Some(InlineData {
                        mime_type: media_type.clone(),
                        data: data.clone(),
                    }),
                    ..Part::default()
                }),
                ContentBlock::Image { .. } => dropped.push("image_url"),
                ContentBlock::ToolUse { name, input, .. } if tools_enabled => parts.push(Part {
                    function_call: Some(FunctionCall {
                        name: name.clone(),
                        args: input.clone(),
                    }),
                    ..Part::default()
                }),
                ContentBlock::ToolResult {
                    tool_use_id, is_error, ..
                } if tools_enabled => {
                    let text = tool_result_text(block);
                    let response = if *is_error == Some(true) {
                        json!({ "error": text })
                    } else {
                        json!({ "content": text })
                    };

                    parts.push(Part {
                        function_response: Some(FunctionResponse {
                            name: names.get(tool_use_id).cloned().unwrap_or_else(|| tool_use_id.clone()),
                            response,
                        }),
                        ..Part::default()
                    });
                }
                ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => {
                    if let Some(text) = flatten_tool_block(block) {
                        parts.push(Part::text(text));
                    }
                }
                ContentBlock::Unknown => dropped.push("content_block"),
            }
        }

        if parts.is_empty() {
            continue;
        }

        // Gemini requires alternating turns; merge consecutive same-role messages
        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
            _ => contents.push(Content {
                role: Some(role.to_owned()),
                parts,
            }),
        }
    }

    let system_instruction = system_text(request).map(|text| Content {
        role: None,
        parts: vec![Part::text(text)],
    });

    let tools = request
        .tools
        .as_ref()
        .filter(|tools| tools_enabled && !tools.is_empty())
        .map(|tools| {
            vec![Tool {
                function_declarations: tools
                    .iter()
                    .map(|tool| FunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: Some(sanitize_schema(input_schema(&tool.input_schema))),
                    })
                    .collect(),
            }]
        });

    let tool_config = match (&tools, &request.tool_choice) {
        (Some(_), Some(choice)) => Some(tool_config(choice)),
        (None, Some(_)) => {
            dropped.push("tool_choice");
            None
        }
        _ => None,
    };

    let generation_config = GenerationConfig {
        temperature: clamp_temperature(request.temperature, 2.0),
        top_p: request.top_p,
        top_k: request.top_k,
        max_output_tokens: Some(max_tokens(request)),
        stop_sequences: cap_stop_sequences(request.stop_sequences.as_deref(), MAX_STOP_SEQUENCES, &mut dropped),
    };

    let generate = GenerateRequest {
        contents,
        system_instruction,
        generation_config: Some(generation_config),
        tools,
        tool_config,
    };

    (generate, dropped)
}

fn tool_config(choice: &ToolChoice) -> ToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::Auto => ("AUTO", None),
        ToolChoice::Any => ("ANY", None),
        ToolChoice::None => ("NONE", None),
        ToolChoice::Tool { name } => ("ANY", Some(vec![name.clone()])),
    };

    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode,
            allowed_function_names,
        },
    }
}

/// Strip schema keywords Gemini's OpenAPI subset rejects, recursively
fn sanitize_schema(mut schema: Value) -> Value {
    match &mut schema {
        Value::Object(map) => {
            for key in UNSUPPORTED_SCHEMA_KEYS {
                map.remove(*key);
            }

            for value in map.values_mut() {
                *value = sanitize_schema(value.take());
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                *item = sanitize_schema(item.take());
            }
        }
        _ => {}
    }

    schema
}

// -- Inbound --

fn finish_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "STOP" | "FINISH_REASON_UNSPECIFIED" => Some(StopReason::EndTurn),
        "MAX_TOKENS" => Some(StopReason::MaxTokens),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "MALFORMED_FUNCTION_CALL"
        | "LANGUAGE" | "IMAGE_SAFETY" | "OTHER" => Some(StopReason::Error),
        _ => None,
    }
}

/// Convert a `generateContent` response; only the first candidate is used
pub fn from_generate_response(response: GenerateResponse, model: &str) -> MessagesResponse {
    let id = response.response_id.map_or_else(message_id, |id| format!("msg_{id}"));
    let mut out = MessagesResponse::new(id, model.to_owned());

    if let Some(usage) = response.usage_metadata {
        out.usage = Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        };
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        tracing::warn!("gemini response has no candidates");
        out.warnings.push("response has no candidates".to_owned());
        out.stop_reason = Some(StopReason::Error);
        return out;
    };

    let mut text = String::new();
    let mut has_tool_calls = false;

    for part in candidate.content.parts {
        if part.thought == Some(true) {
            continue;
        }

        if let Some(fragment) = part.text {
            text.push_str(&fragment);
        }

        if let Some(call) = part.function_call {
            if !text.is_empty() {
                out.content.push(ResponseBlock::Text {
                    text: std::mem::take(&mut text),
                });
            }

            has_tool_calls = true;
            out.content.push(ResponseBlock::ToolUse {
                id: tool_use_id(),
                name: call.name,
                input: if call.args.is_null() { json!({}) } else { call.args },
            });
        }
    }

    if !text.is_empty() {
        out.content.push(ResponseBlock::Text { text });
    }

    let reason = candidate
        .finish_reason
        .as_deref()
        .map_or(StopReason::EndTurn, |reason| stop_reason(reason, finish_reason, &mut out.warnings));

    out.stop_reason = Some(if has_tool_calls && reason == StopReason::EndTurn {
        StopReason::ToolUse
    } else {
        reason
    });

    out
}

// -- Streaming --

/// Decoder for `streamGenerateContent?alt=sse`
///
/// Every frame is a partial [`GenerateResponse`]. There is no end marker:
/// the stream ends after a frame carrying a finish reason.
#[derive(Debug, Default)]
pub struct GenerateStreamDecoder {
    started: bool,
    next_slot: u32,
}

impl StreamDecoder for GenerateStreamDecoder {
    fn decode_stream_chunk(&mut self, data: &str) -> Result<Vec<UpstreamDelta>, LlmError> {
        let value: Value =
            serde_json::from_str(data).map_err(|e| LlmError::protocol(format!("malformed stream chunk: {e}")))?;

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream reported an error");
            return Err(LlmError::StreamInterrupted(message.to_owned()));
        }

        let chunk: GenerateResponse =
            serde_json::from_value(value).map_err(|e| LlmError::protocol(format!("unexpected stream chunk: {e}")))?;

        let mut deltas = Vec::new();

        if !self.started {
            self.started = true;
            deltas.push(UpstreamDelta::Start {
                id: None,
                input_tokens: chunk.usage_metadata.map(|usage| usage.prompt_token_count),
            });
        }

        if let Some(candidate) = chunk.candidates.into_iter().next() {
            for part in candidate.content.parts {
                if part.thought == Some(true) {
                    continue;
                }

                if let Some(text) = part.text.filter(|text| !text.is_empty()) {
                    deltas.push(UpstreamDelta::Text(text));
                }

                if let Some(call) = part.function_call {
                    let slot = self.next_slot;
                    self.next_slot += 1;

                    let args = if call.args.is_null() { json!({}) } else { call.args };

                    deltas.push(UpstreamDelta::ToolStart {
                        slot,
                        id: tool_use_id(),
                        name: call.name,
                    });
                    deltas.push(UpstreamDelta::ToolArguments {
                        slot,
                        fragment: args.to_string(),
                    });
                    deltas.push(UpstreamDelta::ToolStop { slot });
                }
            }

            if let Some(reason) = candidate.finish_reason {
                deltas.push(UpstreamDelta::Finish {
                    reason: stop_reason(&reason, finish_reason, &mut Vec::new()),
                    stop_sequence: None,
                });
            }
        }

        if let Some(usage) = chunk.usage_metadata {
            deltas.push(UpstreamDelta::Usage {
                input_tokens: Some(usage.prompt_token_count),
                output_tokens: Some(usage.candidates_token_count),
            });
        }

        Ok(deltas)
    }
}
