//! GLM/Z.AI adapter over its Anthropic-compatible endpoint

use claude_proxy_config::ProviderKind;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{ProviderAdapter, ProviderCapabilities, ProviderRequest, join, parse_body, to_body};
use crate::convert::glm::{MessagesStreamDecoder, from_messages_response, to_messages_request};
use crate::error::LlmError;
use crate::protocol::anthropic::AnthropicResponse;
use crate::stream::{StreamDecoder, StreamFraming};
use crate::types::{MessagesRequest, MessagesResponse};

const GLM_BASE_URL: &str = "https://api.z.ai/api/anthropic";

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct GlmAdapter {
    tool_calling: bool,
}

impl GlmAdapter {
    pub const fn new(tool_calling: bool) -> Self {
        Self { tool_calling }
    }
}

impl ProviderAdapter for GlmAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Glm
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: self.tool_calling,
        }
    }

    fn default_base_url(&self) -> &'static str {
        GLM_BASE_URL
    }

    fn endpoint(&self, base_url: &Url, _model: &str, _stream: bool) -> Result<Url, LlmError> {
        join(base_url, "v1/messages")
    }

    fn authorize(&self, builder: RequestBuilder, api_key: Option<&SecretString>) -> RequestBuilder {
        let builder = builder.header("anthropic-version", ANTHROPIC_VERSION);

        match api_key {
            Some(key) => builder.header("x-api-key", key.expose_secret()),
            None => builder,
        }
    }

    fn build_request(&self, request: &MessagesRequest, model: &str) -> Result<ProviderRequest, LlmError> {
        let (messages, dropped) = to_messages_request(request, model, self.tool_calling);

        Ok(ProviderRequest {
            body: to_body(&messages)?,
            dropped,
        })
    }

    fn from_provider_response(&self, body: &[u8], model: &str) -> Result<MessagesResponse, LlmError> {
        let response: AnthropicResponse = parse_body(body, "messages")?;
        Ok(from_messages_response(response, model))
    }

    fn stream_framing(&self) -> StreamFraming {
        StreamFraming::Sse
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(MessagesStreamDecoder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint() {
        let adapter = GlmAdapter::new(true);
        let base = Url::parse(adapter.default_base_url()).unwrap();

        assert_eq!(
            adapter.endpoint(&base, "glm-4.6", true).unwrap().as_str(),
            "https://api.z.ai/api/anthropic/v1/messages"
        );
    }
}
