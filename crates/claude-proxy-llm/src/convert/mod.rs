//! Conversion between canonical types and provider wire formats
//!
//! Each submodule handles conversions for a specific provider's protocol:
//! canonical request to native body, native response to canonical response,
//! and the stream decoder for the provider's incremental output.

pub mod gemini;
pub mod glm;
pub mod ollama;
pub mod openai;

use std::collections::HashMap;

use crate::types::{ContentBlock, Message, MessagesRequest, Role, StopReason};

/// `max_tokens` sent when the client leaves it unset
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

pub(crate) fn max_tokens(request: &MessagesRequest) -> u32 {
    request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
}

/// Clamp temperature into `[0, max]`
pub(crate) fn clamp_temperature(temperature: Option<f64>, max: f64) -> Option<f64> {
    temperature.map(|value| {
        let clamped = value.clamp(0.0, max);
        if (clamped - value).abs() > f64::EPSILON {
            tracing::debug!(requested = value, clamped, "temperature clamped to provider range");
        }
        clamped
    })
}

/// Keep at most `limit` stop sequences, recording the truncation
pub(crate) fn cap_stop_sequences(
    stop_sequences: Option<&[String]>,
    limit: usize,
    dropped: &mut Vec<&'static str>,
) -> Option<Vec<String>> {
    let stops = stop_sequences.filter(|stops| !stops.is_empty())?;

    if stops.len() > limit {
        dropped.push("stop_sequences");
    }

    Some(stops.iter().take(limit).cloned().collect())
}

/// Top-level system prompt plus inline system messages, in order
pub(crate) fn system_text(request: &MessagesRequest) -> Option<String> {
    let parts: Vec<String> = request
        .system
        .iter()
        .map(crate::types::SystemPrompt::text)
        .chain(
            request
                .messages
                .iter()
                .filter(|message| message.role == Role::System)
                .map(|message| message.content.text()),
        )
        .filter(|text| !text.trim().is_empty())
        .collect();

    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// Tool names by `tool_use` id, for providers that key results by name
pub(crate) fn tool_names(messages: &[Message]) -> HashMap<String, String> {
    messages
        .iter()
        .filter(|message| message.role == Role::Assistant)
        .flat_map(|message| message.content.blocks().into_owned())
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, .. } => Some((id, name)),
            _ => None,
        })
        .collect()
}

/// Plain-text rendering of a tool block for providers without tool support
pub(crate) fn flatten_tool_block(block: &ContentBlock) -> Option<String> {
    match block {
        ContentBlock::ToolUse { name, input, .. } => Some(format!("[Tool call {name}({input})]")),
        ContentBlock::ToolResult {
            tool_use_id, content, ..
        } => {
            let text = content.as_ref().map(crate::types::ToolResultContent::text).unwrap_or_default();
            Some(format!("[Tool result for {tool_use_id}]: {text}"))
        }
        _ => None,
    }
}

/// Text of a tool result, marked when the tool failed
pub(crate) fn tool_result_text(block: &ContentBlock) -> String {
    let ContentBlock::ToolResult { content, is_error, .. } = block else {
        return String::new();
    };

    let text = content.as_ref().map(crate::types::ToolResultContent::text).unwrap_or_default();

    if *is_error == Some(true) {
        format!("Error: {text}")
    } else {
        text
    }
}

/// JSON Schema for a tool, defaulting to an empty object schema
pub(crate) fn input_schema(schema: &serde_json::Value) -> serde_json::Value {
    if schema.is_null() {
        serde_json::json!({"type": "object", "properties": {}})
    } else {
        schema.clone()
    }
}

/// Map a finish reason through a provider table
///
/// Unknown reasons become `end_turn` with a warning instead of failing.
pub(crate) fn stop_reason(
    reason: &str,
    table: fn(&str) -> Option<StopReason>,
    warnings: &mut Vec<String>,
) -> StopReason {
    table(reason).unwrap_or_else(|| {
        tracing::warn!(reason, "unknown upstream finish reason, treating as end_turn");
        warnings.push(format!("unknown finish reason '{reason}'"));
        StopReason::EndTurn
    })
}

/// Parse tool arguments delivered as a JSON string
pub(crate) fn parse_arguments(arguments: &str, warnings: &mut Vec<String>) -> serde_json::Value {
    if arguments.trim().is_empty() {
        return serde_json::json!({});
    }

    serde_json::from_str(arguments).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "tool call arguments are not valid JSON");
        warnings.push("tool call arguments are not valid JSON".to_owned());
        serde_json::Value::String(arguments.to_owned())
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(value: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn temperature_clamping() {
        assert_eq!(clamp_temperature(Some(2.5), 2.0), Some(2.0));
        assert_eq!(clamp_temperature(Some(-1.0), 1.0), Some(0.0));
        assert_eq!(clamp_temperature(Some(0.7), 1.0), Some(0.7));
        assert_eq!(clamp_temperature(None, 1.0), None);
    }

    #[test]
    fn stop_sequences_are_capped() {
        let stops: Vec<String> = (0..6).map(|i| format!("s{i}")).collect();
        let mut dropped = Vec::new();

        let capped = cap_stop_sequences(Some(stops.as_slice()), 4, &mut dropped).unwrap();

        assert_eq!(capped.len(), 4);
        assert_eq!(dropped, ["stop_sequences"]);
    }

    #[test]
    fn system_text_merges_inline_system_messages() {
        let request = request(json!({
            "model": "m",
            "system": "Be brief.",
            "messages": [
                {"role": "system", "content": "Answer in French."},
                {"role": "user", "content": "hi"}
            ]
        }));

        assert_eq!(system_text(&request).unwrap(), "Be brief.\n\nAnswer in French.");
    }

    #[test]
    fn tool_blocks_flatten_to_text() {
        let call = ContentBlock::ToolUse {
            id: "toolu_1".into(),
            name: "weather".into(),
            input: json!({"city": "Paris"}),
        };
        let result: ContentBlock = serde_json::from_value(json!({
            "type": "tool_result", "tool_use_id": "toolu_1", "content": "18C"
        }))
        .unwrap();

        assert_eq!(flatten_tool_block(&call).unwrap(), r#"[Tool call weather({"city":"Paris"})]"#);
        assert_eq!(flatten_tool_block(&result).unwrap(), "[Tool result for toolu_1]: 18C");
    }

    #[test]
    fn unknown_finish_reason_warns() {
        let mut warnings = Vec::new();
        let reason = stop_reason("brand_new_reason", |_| None, &mut warnings);

        assert_eq!(reason, StopReason::EndTurn);
        assert_eq!(warnings, ["unknown finish reason 'brand_new_reason'"]);
    }
}
