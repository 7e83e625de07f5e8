//! Metric names and recording helpers

use std::time::Instant;

use opentelemetry::metrics::{Histogram, Meter};

/// Instrumentation scope for every instrument the gateway creates
pub const METER_NAME: &str = "claude-proxy";

/// Meter from the global provider, a no-op until [`crate::init`] installs one
pub fn meter() -> Meter {
    opentelemetry::global::meter(METER_NAME)
}

/// Record elapsed seconds since `start` on a histogram
pub fn record_duration(histogram: &Histogram<f64>, start: Instant, attributes: &[opentelemetry::KeyValue]) {
    histogram.record(start.elapsed().as_secs_f64(), attributes);
}

/// Upstream calls, by provider and outcome
pub const LLM_REQUEST_COUNT: &str = "llm.request.count";
/// Upstream call latency in seconds, headers plus body for non-streaming calls
pub const LLM_REQUEST_DURATION: &str = "llm.request.duration";
/// Sampling parameters a provider could not take
pub const LLM_TRANSCODE_DROPPED_PARAMS: &str = "llm.transcode.dropped_params";
/// Finished streams, by provider and outcome (`completed` or `errored`)
pub const LLM_STREAM_OUTCOME: &str = "llm.stream.outcome";
