use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt, stream};

use super::{FrameStream, StreamDecoder, StreamTranscoder};
use crate::error::LlmError;
use crate::normalize;
use crate::types::StreamEvent;

/// Canonical events for one response; always ends in `message_stop` or `error`
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

struct Pump {
    frames: FrameStream,
    decoder: Box<dyn StreamDecoder>,
    transcoder: StreamTranscoder,
    pending: VecDeque<StreamEvent>,
    idle: Duration,
}

impl Pump {
    fn fail(&mut self, error: &LlmError) {
        tracing::warn!(error = %error, "upstream stream failed");
        self.pending.extend(self.transcoder.fail(error));
    }

    fn decode(&mut self, frame: &str) {
        match self.decoder.decode_stream_chunk(frame) {
            Ok(deltas) => {
                for delta in deltas {
                    self.pending.extend(self.transcoder.push(delta));
                }
            }
            Err(e) => {
                tracing::debug!(frame, "undecodable upstream chunk");
                self.fail(&e);
            }
        }
    }
}

/// Drive frames through a decoder and the state machine
///
/// Pull-based: a frame is read only when the consumer asks for an event and
/// none is pending. Dropping the returned stream drops the upstream body.
/// A gap longer than `idle` between frames errors the stream.
pub fn transcode(
    frames: FrameStream,
    decoder: Box<dyn StreamDecoder>,
    transcoder: StreamTranscoder,
    idle: Duration,
) -> EventStream {
    let pump = Pump {
        frames,
        decoder,
        transcoder,
        pending: VecDeque::new(),
        idle,
    };

    Box::pin(stream::unfold(pump, |mut pump| async move {
        loop {
            if let Some(event) = pump.pending.pop_front() {
                return Some((event, pump));
            }

            if pump.transcoder.is_terminal() {
                return None;
            }

            match tokio::time::timeout(pump.idle, pump.frames.next()).await {
                Err(_) => {
                    let error = LlmError::Upstream(normalize::timeout(&format!(
                        "no data from upstream for {}s",
                        pump.idle.as_secs()
                    )));
                    pump.fail(&error);
                }
                Ok(None) => {
                    let events = pump.transcoder.finish_upstream();
                    pump.pending.extend(events);
                }
                Ok(Some(Err(e))) => pump.fail(&e),
                Ok(Some(Ok(frame))) => pump.decode(&frame),
            }
        }
    }))
}
