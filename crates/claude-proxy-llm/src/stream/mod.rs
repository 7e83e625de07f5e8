//! Streaming transcoder
//!
//! Providers differ only in how a raw upstream chunk decodes into
//! [`UpstreamDelta`] values. Everything after that, block bookkeeping and
//! the canonical event sequence, is the shared [`StreamTranscoder`].

mod framing;
mod pump;
mod transcoder;

pub use framing::{FrameStream, StreamFraming, ndjson_frames, sse_frames};
pub use pump::{EventStream, transcode};
pub use transcoder::{StreamState, StreamTranscoder};

use crate::error::LlmError;
use crate::types::StopReason;

/// Provider-neutral signal decoded from one upstream chunk
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamDelta {
    /// Upstream acknowledged the request
    Start {
        /// Upstream message id, used when it is already a `msg_` id
        id: Option<String>,
        /// Prompt tokens, when reported up front
        input_tokens: Option<u32>,
    },
    /// Text fragment for the current text block
    Text(String),
    /// New tool call; `slot` is the provider's own call index
    ToolStart { slot: u32, id: String, name: String },
    /// Argument JSON fragment for an open tool call
    ToolArguments { slot: u32, fragment: String },
    /// Provider closed the current text block
    TextStop,
    /// Provider closed a tool call
    ToolStop { slot: u32 },
    /// Final stop reason
    Finish {
        reason: StopReason,
        stop_sequence: Option<String>,
    },
    /// Token counts; absent sides leave earlier values untouched
    Usage {
        input_tokens: Option<u32>,
        output_tokens: Option<u32>,
    },
    /// Explicit end-of-stream marker
    Done,
}

/// Decodes one framed upstream chunk into deltas
///
/// Decoders are stateful per stream (tool slots seen, whether the start was
/// announced) and are created fresh for every request.
pub trait StreamDecoder: Send {
    /// Decode one SSE `data:` payload or NDJSON line
    ///
    /// # Errors
    ///
    /// Malformed chunks and in-band upstream error reports; either ends the
    /// stream with a terminal `error` event.
    fn decode_stream_chunk(&mut self, data: &str) -> Result<Vec<UpstreamDelta>, LlmError>;
}
