use std::time::Instant;

use claude_proxy_config::ProviderKind;
use claude_proxy_telemetry::metrics::{self, LLM_REQUEST_COUNT, LLM_REQUEST_DURATION, LLM_STREAM_OUTCOME, LLM_TRANSCODE_DROPPED_PARAMS};
use claude_proxy_telemetry::{Counter, Histogram, KeyValue};

/// Instruments recorded by the dispatcher
///
/// Created from the global meter, so they are no-ops unless OTLP export is
/// configured.
#[derive(Clone)]
pub struct LlmMetrics {
    requests: Counter<u64>,
    duration: Histogram<f64>,
    dropped_params: Counter<u64>,
    stream_outcomes: Counter<u64>,
}

impl LlmMetrics {
    pub fn new() -> Self {
        let meter = metrics::meter();

        Self {
            requests: meter
                .u64_counter(LLM_REQUEST_COUNT)
                .with_description("Upstream calls by provider and outcome")
                .build(),
            duration: meter
                .f64_histogram(LLM_REQUEST_DURATION)
                .with_description("Upstream call latency")
                .with_unit("s")
                .build(),
            dropped_params: meter
                .u64_counter(LLM_TRANSCODE_DROPPED_PARAMS)
                .with_description("Canonical parameters a provider could not take")
                .build(),
            stream_outcomes: meter
                .u64_counter(LLM_STREAM_OUTCOME)
                .with_description("Finished streams by outcome")
                .build(),
        }
    }

    pub fn record_request(&self, provider: &str, kind: ProviderKind, outcome: &'static str, start: Instant) {
        let attributes = [
            KeyValue::new("provider", provider.to_owned()),
            KeyValue::new("provider.kind", kind.as_str()),
            KeyValue::new("outcome", outcome),
        ];

        self.requests.add(1, &attributes);
        metrics::record_duration(&self.duration, start, &attributes);
    }

    pub fn record_dropped(&self, provider: &str, dropped: &[&'static str]) {
        for param in dropped {
            self.dropped_params.add(
                1,
                &[
                    KeyValue::new("provider", provider.to_owned()),
                    KeyValue::new("param", *param),
                ],
            );
        }
    }

    pub fn record_stream_outcome(&self, provider: &str, outcome: &'static str) {
        self.stream_outcomes.add(
            1,
            &[
                KeyValue::new("provider", provider.to_owned()),
                KeyValue::new("outcome", outcome),
            ],
        );
    }
}

impl Default for LlmMetrics {
    fn default() -> Self {
        Self::new()
    }
}
