use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use url::Url;

use crate::llm::deserialize_duration;

/// OpenTelemetry export settings
///
/// Without an `otlp` table only local `tracing` output is produced.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Extra resource attributes attached to every span and metric
    #[serde(default)]
    pub resource_attributes: IndexMap<String, String>,
    /// Fraction of root traces sampled, 0.0 to 1.0
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    #[serde(default)]
    pub otlp: Option<OtlpConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            resource_attributes: IndexMap::new(),
            sampling_ratio: default_sampling_ratio(),
            otlp: None,
        }
    }
}

/// OTLP collector connection
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtlpConfig {
    pub endpoint: Url,
    #[serde(default)]
    pub protocol: OtlpProtocol,
    /// How often metrics are pushed
    #[serde(default = "default_metrics_interval", deserialize_with = "deserialize_duration")]
    pub metrics_interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    HttpProto,
}

fn default_service_name() -> String {
    "claude-proxy".to_owned()
}

const fn default_sampling_ratio() -> f64 {
    1.0
}

const fn default_metrics_interval() -> Duration {
    Duration::from_secs(30)
}
