use std::fmt::Display;
use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt, stream};

use crate::error::LlmError;

/// Framed upstream payloads: SSE `data:` fields or NDJSON lines
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// How a provider frames its streamed body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFraming {
    /// `text/event-stream`
    Sse,
    /// One JSON document per line
    NdJson,
}

impl StreamFraming {
    pub fn frames<S, B, E>(self, body: S) -> FrameStream
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Display + Send + 'static,
    {
        match self {
            Self::Sse => sse_frames(body),
            Self::NdJson => ndjson_frames(body),
        }
    }
}

/// Split an SSE body into event `data` payloads
///
/// Comments and events without data never surface.
pub fn sse_frames<S, B, E>(body: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(body.eventsource().filter_map(|result| async move {
        match result {
            Ok(event) if event.data.trim().is_empty() => None,
            Ok(event) => Some(Ok(event.data)),
            Err(e) => Some(Err(read_error(e))),
        }
    }))
}

/// Longest NDJSON line accepted before the stream is failed
pub const MAX_NDJSON_LINE: usize = 8 * 1024 * 1024;

struct Lines<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline
    scanned: usize,
    max_line: usize,
    exhausted: bool,
}

impl<S> Lines<S> {
    /// Pop the next complete line, scanning only bytes not seen before
    fn next_line(&mut self) -> Option<Vec<u8>> {
        match self.buffer[self.scanned..].iter().position(|byte| *byte == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset;
                self.scanned = 0;
                Some(self.buffer.drain(..=end).collect())
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    fn fail(&mut self, error: LlmError) -> Result<String, LlmError> {
        self.exhausted = true;
        self.buffer = Vec::new();
        self.scanned = 0;
        Err(error)
    }
}

/// Split a body into non-empty lines, tolerating chunks that cut lines
///
/// A line longer than [`MAX_NDJSON_LINE`] fails the stream.
pub fn ndjson_frames<S, B, E>(body: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    bounded_ndjson_frames(body, MAX_NDJSON_LINE)
}

fn bounded_ndjson_frames<S, B, E>(body: S, max_line: usize) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let lines = Lines {
        body: Box::pin(body),
        buffer: Vec::new(),
        scanned: 0,
        max_line,
        exhausted: false,
    };

    Box::pin(stream::unfold(lines, |mut lines| async move {
        loop {
            if let Some(line) = lines.next_line() {
                let line = String::from_utf8_lossy(&line).trim().to_owned();

                if line.is_empty() {
                    continue;
                }

                return Some((Ok(line), lines));
            }

            if lines.exhausted {
                let rest = std::mem::take(&mut lines.buffer);
                lines.scanned = 0;
                let line = String::from_utf8_lossy(&rest).trim().to_owned();

                return (!line.is_empty()).then_some((Ok(line), lines));
            }

            if lines.buffer.len() > lines.max_line {
                let error = LlmError::protocol(format!(
                    "upstream NDJSON line exceeds {} bytes",
                    lines.max_line
                ));
                let item = lines.fail(error);
                return Some((item, lines));
            }

            match lines.body.next().await {
                Some(Ok(chunk)) => lines.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    let item = lines.fail(read_error(e));
                    return Some((item, lines));
                }
                None => lines.exhausted = true,
            }
        }
    }))
}

fn read_error(error: impl Display) -> LlmError {
    LlmError::StreamInterrupted(format!("failed to read upstream stream: {error}"))
}
