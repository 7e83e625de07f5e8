//! Ollama native `/api/chat` adapter

use claude_proxy_config::ProviderKind;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{ProviderAdapter, ProviderCapabilities, ProviderRequest, join, parse_body, to_body};
use crate::convert::ollama::{ChatStreamDecoder, from_chat_response, to_chat_request};
use crate::error::LlmError;
use crate::protocol::ollama::ChatResponse;
use crate::stream::{StreamDecoder, StreamFraming};
use crate::types::{MessagesRequest, MessagesResponse};

const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaAdapter {
    tool_calling: bool,
}

impl OllamaAdapter {
    pub const fn new(tool_calling: bool) -> Self {
        Self { tool_calling }
    }
}

impl ProviderAdapter for OllamaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: self.tool_calling,
        }
    }

    fn default_base_url(&self) -> &'static str {
        OLLAMA_BASE_URL
    }

    fn endpoint(&self, base_url: &Url, _model: &str, _stream: bool) -> Result<Url, LlmError> {
        join(base_url, "api/chat")
    }

    // Local servers run without auth; a key is only sent to proxied deployments
    fn authorize(&self, builder: RequestBuilder, api_key: Option<&SecretString>) -> RequestBuilder {
        match api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    fn build_request(&self, request: &MessagesRequest, model: &str) -> Result<ProviderRequest, LlmError> {
        let (chat, dropped) = to_chat_request(request, model, self.tool_calling);

        Ok(ProviderRequest {
            body: to_body(&chat)?,
            dropped,
        })
    }

    fn from_provider_response(&self, body: &[u8], model: &str) -> Result<MessagesResponse, LlmError> {
        let response: ChatResponse = parse_body(body, "ollama chat")?;
        from_chat_response(response, model)
    }

    fn stream_framing(&self) -> StreamFraming {
        StreamFraming::NdJson
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(ChatStreamDecoder::default())
    }
}
