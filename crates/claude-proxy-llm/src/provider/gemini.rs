//! Google Gemini `generateContent` adapter

use claude_proxy_config::ProviderKind;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{ProviderAdapter, ProviderCapabilities, ProviderRequest, join, parse_body, to_body};
use crate::convert::gemini::{GenerateStreamDecoder, from_generate_response, to_generate_request};
use crate::error::LlmError;
use crate::protocol::gemini::GenerateResponse;
use crate::stream::{StreamDecoder, StreamFraming};
use crate::types::{MessagesRequest, MessagesResponse};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter {
    tool_calling: bool,
}

impl GeminiAdapter {
    pub const fn new(tool_calling: bool) -> Self {
        Self { tool_calling }
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: self.tool_calling,
        }
    }

    fn default_base_url(&self) -> &'static str {
        GEMINI_BASE_URL
    }

    /// The model is part of the path and the stream flag picks the method
    fn endpoint(&self, base_url: &Url, model: &str, stream: bool) -> Result<Url, LlmError> {
        let model = model.strip_prefix("models/").unwrap_or(model);

        if stream {
            join(base_url, &format!("models/{model}:streamGenerateContent?alt=sse"))
        } else {
            join(base_url, &format!("models/{model}:generateContent"))
        }
    }

    fn authorize(&self, builder: RequestBuilder, api_key: Option<&SecretString>) -> RequestBuilder {
        match api_key {
            Some(key) => builder.header("x-goog-api-key", key.expose_secret()),
            None => builder,
        }
    }

    fn build_request(&self, request: &MessagesRequest, _model: &str) -> Result<ProviderRequest, LlmError> {
        let (generate, dropped) = to_generate_request(request, self.tool_calling);

        Ok(ProviderRequest {
            body: to_body(&generate)?,
            dropped,
        })
    }

    fn from_provider_response(&self, body: &[u8], model: &str) -> Result<MessagesResponse, LlmError> {
        let response: GenerateResponse = parse_body(body, "gemini generateContent")?;
        Ok(from_generate_response(response, model))
    }

    fn stream_framing(&self) -> StreamFraming {
        StreamFraming::Sse
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(GenerateStreamDecoder::default())
    }
}
