use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::mapping::ModelMapping;

/// Top-level upstream configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Provider used when a request names none
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Provider configurations keyed by name
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
}

/// Connection settings for a single upstream provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Wire protocol spoken by the provider
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Base URL override (each kind has a default)
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Credential sent upstream
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Model used when the canonical model has no mapping entry
    #[serde(default)]
    pub default_model: Option<String>,
    /// `claudeModel:providerModel` pairs, comma separated
    #[serde(default)]
    pub model_mapping: ModelMapping,
    /// Override the kind's default tool-calling support
    #[serde(default)]
    pub tools: Option<bool>,
    /// Upstream timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Supported upstream wire protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI chat completions API
    Openai,
    /// Ollama native `/api/chat`
    Ollama,
    /// vLLM OpenAI-compatible server
    Vllm,
    /// Google Gemini `generateContent`
    Gemini,
    /// GLM / Z.AI Anthropic-compatible endpoint
    Glm,
}

impl ProviderKind {
    /// Name used in logs and error messages
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Ollama => "ollama",
            Self::Vllm => "vllm",
            Self::Gemini => "gemini",
            Self::Glm => "glm",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream timeouts, written as duration strings (`"30s"`, `"5m"`)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// TCP/TLS connect
    #[serde(default = "default_connect", deserialize_with = "deserialize_duration")]
    pub connect: Duration,
    /// Sending the request until response headers arrive
    #[serde(default = "default_first_byte", deserialize_with = "deserialize_duration")]
    pub first_byte: Duration,
    /// Gap allowed between two streamed chunks
    #[serde(default = "default_idle", deserialize_with = "deserialize_duration")]
    pub idle: Duration,
    /// Whole non-streaming exchange
    #[serde(default = "default_request", deserialize_with = "deserialize_duration")]
    pub request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: default_connect(),
            first_byte: default_first_byte(),
            idle: default_idle(),
            request: default_request(),
        }
    }
}

const fn default_connect() -> Duration {
    Duration::from_secs(10)
}

const fn default_first_byte() -> Duration {
    Duration::from_secs(120)
}

const fn default_idle() -> Duration {
    Duration::from_secs(60)
}

const fn default_request() -> Duration {
    Duration::from_secs(600)
}

pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    duration_str::parse(raw.as_str()).map_err(|e| serde::de::Error::custom(format!("invalid duration '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_defaults() {
        let config: ProviderConfig = toml::from_str(r#"type = "ollama""#).unwrap();

        assert_eq!(config.kind, ProviderKind::Ollama);
        assert!(config.base_url.is_none());
        assert!(config.model_mapping.is_empty());
        assert_eq!(config.timeouts.idle, Duration::from_secs(60));
    }

    #[test]
    fn timeouts_parse_duration_strings() {
        let config: ProviderConfig = toml::from_str(
            r#"
            type = "vllm"

            [timeouts]
            connect = "2s"
            idle = "500ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.timeouts.connect, Duration::from_secs(2));
        assert_eq!(config.timeouts.idle, Duration::from_millis(500));
        assert_eq!(config.timeouts.request, Duration::from_secs(600));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let err = toml::from_str::<ProviderConfig>(
            r#"
            type = "vllm"

            [timeouts]
            idle = "soon"
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("invalid duration 'soon'"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(toml::from_str::<ProviderConfig>(r#"type = "bedrock""#).is_err());
    }
}
