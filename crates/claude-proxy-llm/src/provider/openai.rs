//! OpenAI-compatible adapter, shared by `openai` and `vllm` providers

use claude_proxy_config::ProviderKind;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{ProviderAdapter, ProviderCapabilities, ProviderRequest, join, parse_body, to_body};
use crate::convert::openai::{ChatStreamDecoder, Dialect, from_chat_response, to_chat_request};
use crate::error::LlmError;
use crate::protocol::openai::ChatResponse;
use crate::stream::{StreamDecoder, StreamFraming};
use crate::types::{MessagesRequest, MessagesResponse};

/// Default `OpenAI` API base URL
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default local vLLM server
const VLLM_BASE_URL: &str = "http://localhost:8000/v1";

pub struct OpenAiAdapter {
    dialect: Dialect,
    tool_calling: bool,
}

impl OpenAiAdapter {
    pub const fn openai(tool_calling: bool) -> Self {
        Self {
            dialect: Dialect::OpenAi,
            tool_calling,
        }
    }

    /// vLLM only parses tool calls when the server runs with a tool parser,
    /// so tool support is opt-in
    pub const fn vllm(tool_calling: bool) -> Self {
        Self {
            dialect: Dialect::Vllm,
            tool_calling,
        }
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        match self.dialect {
            Dialect::OpenAi => ProviderKind::Openai,
            Dialect::Vllm => ProviderKind::Vllm,
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: self.tool_calling,
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self.dialect {
            Dialect::OpenAi => OPENAI_BASE_URL,
            Dialect::Vllm => VLLM_BASE_URL,
        }
    }

    fn endpoint(&self, base_url: &Url, _model: &str, _stream: bool) -> Result<Url, LlmError> {
        join(base_url, "chat/completions")
    }

    fn authorize(&self, builder: RequestBuilder, api_key: Option<&SecretString>) -> RequestBuilder {
        match api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    fn build_request(&self, request: &MessagesRequest, model: &str) -> Result<ProviderRequest, LlmError> {
        let (chat, dropped) = to_chat_request(request, model, self.dialect, self.tool_calling);

        Ok(ProviderRequest {
            body: to_body(&chat)?,
            dropped,
        })
    }

    fn from_provider_response(&self, body: &[u8], model: &str) -> Result<MessagesResponse, LlmError> {
        let response: ChatResponse = parse_body(body, "chat completion")?;
        from_chat_response(response, model)
    }

    fn stream_framing(&self) -> StreamFraming {
        StreamFraming::Sse
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(ChatStreamDecoder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints() {
        let adapter = OpenAiAdapter::openai(true);
        let base = Url::parse(adapter.default_base_url()).unwrap();

        assert_eq!(
            adapter.endpoint(&base, "gpt-4o", true).unwrap().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );

        let adapter = OpenAiAdapter::vllm(false);
        let base = Url::parse(adapter.default_base_url()).unwrap();

        assert_eq!(
            adapter.endpoint(&base, "m", false).unwrap().as_str(),
            "http://localhost:8000/v1/chat/completions"
        );
        assert!(!adapter.capabilities().tool_calling);
    }

    #[test]
    fn malformed_body_is_a_protocol_error() {
        let err = OpenAiAdapter::openai(true)
            .from_provider_response(b"<html>", "gpt-4o")
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::UpstreamProtocol);
    }
}
