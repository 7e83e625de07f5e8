//! Request dispatch: provider selection, upstream calls and transcoding

use std::sync::Arc;
use std::time::Instant;

use claude_proxy_config::LlmConfig;
use claude_proxy_core::RequestContext;
use futures_util::StreamExt;

use crate::error::LlmError;
use crate::metrics::LlmMetrics;
use crate::normalize;
use crate::provider::ProviderRequest;
use crate::registry::{ProviderRegistry, RegisteredProvider, Selection};
use crate::stream::{self, EventStream, StreamTranscoder};
use crate::types::{MessagesRequest, MessagesResponse, StreamEvent};

/// Shared state for the gateway route handlers
#[derive(Clone)]
pub struct LlmState {
    pub(crate) inner: Arc<LlmStateInner>,
}

pub(crate) struct LlmStateInner {
    pub(crate) registry: ProviderRegistry,
    pub(crate) metrics: LlmMetrics,
}

/// A request that passed selection and capability checks
struct Prepared {
    selection: Selection,
    upstream: ProviderRequest,
}

impl LlmState {
    /// Build the registry and an HTTP client per provider
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self::new(ProviderRegistry::from_config(config)?))
    }

    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            inner: Arc::new(LlmStateInner {
                registry,
                metrics: LlmMetrics::new(),
            }),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    /// Canonical model ids from mapping tables, with their provider
    pub fn list_models(&self) -> Vec<(String, String)> {
        self.inner.registry.models()
    }

    /// Serve a non-streaming request
    pub async fn complete(
        &self,
        mut request: MessagesRequest,
        context: &RequestContext,
    ) -> Result<MessagesResponse, LlmError> {
        request.stream = None;

        let Prepared { selection, upstream } = self.prepare(&request, context)?;
        let provider = &selection.provider;
        let start = Instant::now();

        let result = tokio::time::timeout(provider.timeouts.request, async {
            let response = Self::send(provider, &selection.provider_model, false, &upstream).await?;

            let body = response
                .bytes()
                .await
                .map_err(|e| LlmError::Upstream(normalize::transport(&e)))?;

            provider
                .adapter()
                .from_provider_response(&body, &selection.provider_model)
                .inspect_err(|e| {
                    tracing::warn!(
                        provider = %provider.name,
                        error = %e,
                        body = %String::from_utf8_lossy(&body),
                        "unusable upstream response"
                    );
                })
        })
        .await
        .unwrap_or_else(|_| {
            Err(LlmError::Upstream(normalize::timeout(&format!(
                "upstream did not finish within {}s",
                provider.timeouts.request.as_secs()
            ))))
        });

        let outcome = match &result {
            Ok(response) => {
                for warning in &response.warnings {
                    tracing::warn!(provider = %provider.name, model = %selection.provider_model, warning = %warning, "transcoding warning");
                }

                tracing::info!(
                    provider = %provider.name,
                    model = %selection.provider_model,
                    stop_reason = ?response.stop_reason,
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "completed request"
                );

                "success"
            }
            Err(e) => e.kind().as_str(),
        };

        self.inner
            .metrics
            .record_request(&provider.name, provider.kind, outcome, start);

        result
    }

    /// Serve a streaming request
    ///
    /// Failures before the upstream answers with a success status come back
    /// as `Err`. Once the stream exists, failures become its terminal
    /// `error` event.
    pub async fn complete_stream(
        &self,
        mut request: MessagesRequest,
        context: &RequestContext,
    ) -> Result<EventStream, LlmError> {
        request.stream = Some(true);

        let Prepared { selection, upstream } = self.prepare(&request, context)?;
        let provider = Arc::clone(&selection.provider);
        let start = Instant::now();

        let response = match Self::send(&provider, &selection.provider_model, true, &upstream).await {
            Ok(response) => response,
            Err(e) => {
                self.inner
                    .metrics
                    .record_request(&provider.name, provider.kind, e.kind().as_str(), start);
                return Err(e);
            }
        };

        self.inner
            .metrics
            .record_request(&provider.name, provider.kind, "success", start);

        let adapter = provider.adapter();
        let frames = adapter.stream_framing().frames(response.bytes_stream());
        let transcoder = StreamTranscoder::new(selection.provider_model.clone());
        let events = stream::transcode(frames, adapter.stream_decoder(), transcoder, provider.timeouts.idle);

        let metrics = self.inner.metrics.clone();
        let name = provider.name.clone();

        Ok(Box::pin(events.inspect(move |event| match event {
            StreamEvent::MessageStop => {
                tracing::info!(provider = %name, "stream completed");
                metrics.record_stream_outcome(&name, "completed");
            }
            StreamEvent::Error { error } => {
                tracing::warn!(provider = %name, error_type = %error.error_type, message = %error.message, "stream errored");
                metrics.record_stream_outcome(&name, "errored");
            }
            _ => {}
        })))
    }

    /// Validate, select the provider and build the native body
    ///
    /// Everything here happens before any upstream I/O.
    fn prepare(&self, request: &MessagesRequest, context: &RequestContext) -> Result<Prepared, LlmError> {
        request.validate()?;

        let selection = self.inner.registry.select(context.provider_hint(), request)?;
        let provider = &selection.provider;

        tracing::debug!(
            request_id = %context.request_id,
            provider = %provider.name,
            canonical_model = %selection.canonical_model,
            model = %selection.provider_model,
            stream = request.is_streaming(),
            "dispatching request"
        );

        let upstream = provider
            .adapter()
            .to_provider_request(request, &selection.provider_model)?;

        if !upstream.dropped.is_empty() {
            tracing::info!(
                provider = %provider.name,
                dropped = ?upstream.dropped,
                "parameters not supported by provider were dropped"
            );
            self.inner.metrics.record_dropped(&provider.name, &upstream.dropped);
        }

        Ok(Prepared { selection, upstream })
    }

    /// POST the native body and wait for a success status
    ///
    /// Non-success responses are read and normalized here.
    async fn send(
        provider: &RegisteredProvider,
        model: &str,
        stream: bool,
        upstream: &ProviderRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let adapter = provider.adapter();
        let url = adapter.endpoint(&provider.base_url, model, stream)?;

        let builder = provider.client.post(url).json(&upstream.body);
        let builder = adapter.authorize(builder, provider.api_key.as_ref());

        let response = tokio::time::timeout(provider.timeouts.first_byte, builder.send())
            .await
            .map_err(|_| {
                LlmError::Upstream(normalize::timeout(&format!(
                    "no response from upstream within {}s",
                    provider.timeouts.first_byte.as_secs()
                )))
            })?
            .map_err(|e| {
                tracing::warn!(provider = %provider.name, error = %e, "upstream request failed");
                LlmError::Upstream(normalize::transport(&e))
            })?;

        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = tokio::time::timeout(provider.timeouts.idle, response.bytes())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();

        tracing::warn!(
            provider = %provider.name,
            status = status.as_u16(),
            body = %String::from_utf8_lossy(&body),
            "upstream returned an error"
        );

        Err(normalize::normalize_response(provider.kind, status.as_u16(), &headers, &body).into())
    }
}
