//! Provider adapters
//!
//! One [`ProviderAdapter`] per [`ProviderKind`]. Adapters are pure: they
//! build upstream URLs and bodies and decode what comes back, while the
//! dispatcher owns the HTTP client and timeouts.

pub mod gemini;
pub mod glm;
pub mod ollama;
pub mod openai;

use claude_proxy_config::ProviderKind;
use reqwest::RequestBuilder;
use secrecy::SecretString;
use url::Url;

use crate::error::LlmError;
use crate::stream::{StreamDecoder, StreamFraming};
use crate::types::{MessagesRequest, MessagesResponse};

/// Capabilities advertised by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Whether the provider supports streaming responses
    pub streaming: bool,
    /// Whether the provider supports tool/function calling
    pub tool_calling: bool,
}

/// Provider-native request body
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub body: serde_json::Value,
    /// Canonical parameters the provider cannot take, dropped from the body
    pub dropped: Vec<&'static str>,
}

/// Per-provider request, response and stream transcoding
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Used when the provider config sets no `base_url`
    fn default_base_url(&self) -> &'static str;

    /// Upstream URL for a call
    fn endpoint(&self, base_url: &Url, model: &str, stream: bool) -> Result<Url, LlmError>;

    /// Attach credentials
    fn authorize(&self, builder: RequestBuilder, api_key: Option<&SecretString>) -> RequestBuilder;

    /// Build the native body; capability checks have already passed
    fn build_request(&self, request: &MessagesRequest, model: &str) -> Result<ProviderRequest, LlmError>;

    /// Decode a successful non-streaming body
    #[allow(clippy::wrong_self_convention)]
    fn from_provider_response(&self, body: &[u8], model: &str) -> Result<MessagesResponse, LlmError>;

    fn stream_framing(&self) -> StreamFraming;

    /// Fresh decoder for one streamed response
    fn stream_decoder(&self) -> Box<dyn StreamDecoder>;

    /// Check capabilities, then build the native body
    ///
    /// Fails before any upstream I/O when the request needs something the
    /// provider lacks.
    fn to_provider_request(&self, request: &MessagesRequest, model: &str) -> Result<ProviderRequest, LlmError> {
        let capabilities = self.capabilities();

        if request.declares_tools() && !capabilities.tool_calling {
            return Err(LlmError::UnsupportedFeature(format!(
                "provider type '{}' does not support tool calling",
                self.kind()
            )));
        }

        if request.is_streaming() && !capabilities.streaming {
            return Err(LlmError::UnsupportedFeature(format!(
                "provider type '{}' does not support streaming",
                self.kind()
            )));
        }

        self.build_request(request, model)
    }
}

/// Adapter for a configured provider
///
/// `tools` overrides the provider type's default tool capability.
pub fn adapter(kind: ProviderKind, tools: Option<bool>) -> Box<dyn ProviderAdapter> {
    match kind {
        ProviderKind::Openai => Box::new(openai::OpenAiAdapter::openai(tools.unwrap_or(true))),
        ProviderKind::Vllm => Box::new(openai::OpenAiAdapter::vllm(tools.unwrap_or(false))),
        ProviderKind::Ollama => Box::new(ollama::OllamaAdapter::new(tools.unwrap_or(true))),
        ProviderKind::Gemini => Box::new(gemini::GeminiAdapter::new(tools.unwrap_or(true))),
        ProviderKind::Glm => Box::new(glm::GlmAdapter::new(tools.unwrap_or(true))),
    }
}

/// `{base}/{path}`, tolerating a trailing slash on the base
pub(crate) fn join(base_url: &Url, path: &str) -> Result<Url, LlmError> {
    let base = base_url.as_str().trim_end_matches('/');

    Url::parse(&format!("{base}/{path}"))
        .map_err(|e| LlmError::Config(format!("invalid upstream URL for '{base}/{path}': {e}")))
}

/// Serialize a wire request
pub(crate) fn to_body(wire: &impl serde::Serialize) -> Result<serde_json::Value, LlmError> {
    serde_json::to_value(wire).map_err(|e| LlmError::Internal(anyhow::anyhow!("failed to encode upstream request: {e}")))
}

/// Parse a non-streaming upstream body
pub(crate) fn parse_body<'a, T: serde::Deserialize<'a>>(body: &'a [u8], what: &str) -> Result<T, LlmError> {
    serde_json::from_slice(body).map_err(|e| LlmError::protocol(format!("invalid {what} response: {e}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tool_request() -> MessagesRequest {
        serde_json::from_value(json!({
            "model": "claude-3-haiku",
            "messages": [{"role": "user", "content": "weather?"}],
            "tools": [{"name": "weather", "input_schema": {"type": "object"}}]
        }))
        .unwrap()
    }

    #[test]
    fn vllm_rejects_tools_by_default() {
        let err = adapter(ProviderKind::Vllm, None)
            .to_provider_request(&tool_request(), "meta-llama/Llama-3.1-8B-Instruct")
            .unwrap_err();

        assert!(matches!(err, LlmError::UnsupportedFeature(_)));
        assert_eq!(err.to_string(), "unsupported feature: provider type 'vllm' does not support tool calling");
    }

    #[test]
    fn tool_support_can_be_enabled() {
        let request = adapter(ProviderKind::Vllm, Some(true))
            .to_provider_request(&tool_request(), "meta-llama/Llama-3.1-8B-Instruct")
            .unwrap();

        assert_eq!(request.body["tools"][0]["function"]["name"], "weather");
    }

    #[test]
    fn join_tolerates_trailing_slash() {
        let base = Url::parse("http://localhost:11434/").unwrap();
        assert_eq!(join(&base, "api/chat").unwrap().as_str(), "http://localhost:11434/api/chat");
    }
}
