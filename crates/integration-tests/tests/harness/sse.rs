//! Parsing of the proxy's SSE output

use serde_json::Value;

/// One `event:` / `data:` pair
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: String,
    pub data: Value,
}

/// Parse a complete SSE body, skipping keep-alive comments
pub fn parse(text: &str) -> Vec<SseEvent> {
    text.split("\n\n")
        .filter_map(|frame| {
            let mut event = None;
            let mut data = None;

            for line in frame.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event = Some(value.trim().to_owned());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = Some(serde_json::from_str(value.trim()).expect("event data is JSON"));
                }
            }

            Some(SseEvent {
                event: event?,
                data: data?,
            })
        })
        .collect()
}

/// Event names in order
pub fn names(events: &[SseEvent]) -> Vec<&str> {
    events.iter().map(|event| event.event.as_str()).collect()
}
