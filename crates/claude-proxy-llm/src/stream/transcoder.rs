use std::collections::BTreeMap;

use claude_proxy_core::HttpError;

use super::UpstreamDelta;
use crate::error::LlmError;
use crate::types::{
    BlockDelta, ErrorDetail, MessageDelta, Role, StopReason, StreamContentBlock, StreamEvent, StreamMessage, Usage,
    message_id,
};

/// Lifecycle of one canonical event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing emitted yet
    Idle,
    /// `message_start` emitted, no content yet
    Started,
    /// At least one content block opened
    Streaming,
    /// `message_stop` emitted
    Finished,
    /// Terminal `error` emitted
    Errored,
}

impl StreamState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }
}

/// Shared state machine turning [`UpstreamDelta`]s into canonical events
///
/// Block indices are assigned here, in the order blocks open. Once the
/// stream reaches a terminal state every further input yields nothing.
#[derive(Debug)]
pub struct StreamTranscoder {
    state: StreamState,
    id: String,
    model: String,
    next_index: u32,
    open_text: Option<u32>,
    /// Open tool blocks by provider slot
    open_tools: BTreeMap<u32, u32>,
    usage: Usage,
    finish: Option<(StopReason, Option<String>)>,
    saw_tool_use: bool,
}

impl StreamTranscoder {
    /// `model` is the resolved provider model reported in `message_start`
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            state: StreamState::Idle,
            id: message_id(),
            model: model.into(),
            next_index: 0,
            open_text: None,
            open_tools: BTreeMap::new(),
            usage: Usage::default(),
            finish: None,
            saw_tool_use: false,
        }
    }

    pub const fn state(&self) -> StreamState {
        self.state
    }

    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Feed one decoded delta
    pub fn push(&mut self, delta: UpstreamDelta) -> Vec<StreamEvent> {
        if self.is_terminal() {
            return Vec::new();
        }

        let mut events = Vec::new();

        match delta {
            UpstreamDelta::Start { id, input_tokens } => {
                if self.state == StreamState::Idle {
                    if let Some(id) = id.filter(|id| id.starts_with("msg_")) {
                        self.id = id;
                    }

                    if let Some(tokens) = input_tokens {
                        self.usage.input_tokens = tokens;
                    }
                }

                self.start(&mut events);
            }
            UpstreamDelta::Text(text) => {
                self.start(&mut events);

                if text.is_empty() {
                    return events;
                }

                let index = match self.open_text {
                    Some(index) => index,
                    None => self.open_block(StreamContentBlock::Text { text: String::new() }, &mut events),
                };
                self.open_text = Some(index);

                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::TextDelta { text },
                });
            }
            UpstreamDelta::ToolStart { slot, id, name } => {
                self.start(&mut events);

                if self.open_tools.contains_key(&slot) {
                    tracing::debug!(slot, "ignoring repeated tool call start");
                    return events;
                }

                self.close_text(&mut events);

                let index = self.open_block(
                    StreamContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::json!({}),
                    },
                    &mut events,
                );

                self.open_tools.insert(slot, index);
                self.saw_tool_use = true;
            }
            UpstreamDelta::ToolArguments { slot, fragment } => {
                self.start(&mut events);

                let Some(&index) = self.open_tools.get(&slot) else {
                    let error = LlmError::protocol(format!("arguments for tool call {slot} arrived before its start"));
                    events.extend(self.fail(&error));
                    return events;
                };

                if !fragment.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: BlockDelta::InputJsonDelta { partial_json: fragment },
                    });
                }
            }
            UpstreamDelta::TextStop => self.close_text(&mut events),
            UpstreamDelta::ToolStop { slot } => {
                if let Some(index) = self.open_tools.remove(&slot) {
                    events.push(StreamEvent::ContentBlockStop { index });
                }
            }
            UpstreamDelta::Finish { reason, stop_sequence } => {
                self.start(&mut events);
                self.finish = Some((reason, stop_sequence));
            }
            UpstreamDelta::Usage {
                input_tokens,
                output_tokens,
            } => {
                if let Some(tokens) = input_tokens {
                    self.usage.input_tokens = tokens;
                }

                if let Some(tokens) = output_tokens {
                    self.usage.output_tokens = tokens;
                }
            }
            UpstreamDelta::Done => events.extend(self.complete()),
        }

        events
    }

    /// Upstream body ended
    ///
    /// Completes normally when a finish reason was seen, otherwise the close
    /// was abnormal and the stream errors.
    pub fn finish_upstream(&mut self) -> Vec<StreamEvent> {
        if self.is_terminal() {
            return Vec::new();
        }

        if self.finish.is_some() {
            return self.complete();
        }

        self.fail(&LlmError::StreamInterrupted(
            "upstream closed the stream before completion".to_owned(),
        ))
    }

    /// Terminate with an `error` event
    pub fn fail(&mut self, error: &LlmError) -> Vec<StreamEvent> {
        if self.is_terminal() {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.start(&mut events);

        events.push(StreamEvent::Error {
            error: ErrorDetail {
                error_type: error.error_type().to_owned(),
                message: error.client_message(),
            },
        });

        self.state = StreamState::Errored;
        events
    }

    fn complete(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.start(&mut events);

        let mut open: Vec<u32> = self.open_tools.values().copied().chain(self.open_text).collect();
        open.sort_unstable();
        events.extend(open.into_iter().map(|index| StreamEvent::ContentBlockStop { index }));
        self.open_tools.clear();
        self.open_text = None;

        let (stop_reason, stop_sequence) = match self.finish.take() {
            Some((StopReason::EndTurn, _)) if self.saw_tool_use => (StopReason::ToolUse, None),
            Some(finish) => finish,
            None if self.saw_tool_use => (StopReason::ToolUse, None),
            None => (StopReason::EndTurn, None),
        };

        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence,
            },
            usage: self.usage,
        });
        events.push(StreamEvent::MessageStop);

        self.state = StreamState::Finished;
        events
    }

    fn start(&mut self, events: &mut Vec<StreamEvent>) {
        if self.state != StreamState::Idle {
            return;
        }

        events.push(StreamEvent::MessageStart {
            message: StreamMessage {
                id: self.id.clone(),
                object_type: "message".to_owned(),
                role: Role::Assistant,
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: self.usage,
            },
        });

        self.state = StreamState::Started;
    }

    fn open_block(&mut self, content_block: StreamContentBlock, events: &mut Vec<StreamEvent>) -> u32 {
        let index = self.next_index;
        self.next_index += 1;

        events.push(StreamEvent::ContentBlockStart { index, content_block });
        self.state = StreamState::Streaming;

        index
    }

    fn close_text(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(index) = self.open_text.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }
}
