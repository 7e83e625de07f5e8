//! Axum route handlers for the Anthropic Messages API surface

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use claude_proxy_core::{HttpError, RequestContext};
use futures_util::{Stream, StreamExt, future};
use http::HeaderValue;
use serde::Serialize;

use crate::error::LlmError;
use crate::state::LlmState;
use crate::stream::EventStream;
use crate::tokens;
use crate::types::MessagesRequest;

/// Build the gateway router with all endpoints
pub fn llm_router(state: LlmState) -> Router {
    Router::new()
        .route("/v1/messages", routing::post(messages))
        .route("/v1/messages/count_tokens", routing::post(count_tokens))
        .route("/v1/models", routing::get(list_models))
        .with_state(state)
}

/// Handle `POST /v1/messages`
async fn messages(
    State(state): State<LlmState>,
    axum::Extension(context): axum::Extension<RequestContext>,
    payload: Result<Json<MessagesRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(&LlmError::InvalidRequest(rejection.body_text())),
    };

    if request.is_streaming() {
        match state.complete_stream(request, &context).await {
            Ok(events) => stream_response(events).into_response(),
            Err(e) => error_response(&e),
        }
    } else {
        match state.complete(request, &context).await {
            Ok(response) => Json(response).into_response(),
            Err(e) => error_response(&e),
        }
    }
}

/// Handle `POST /v1/messages/count_tokens`
async fn count_tokens(payload: Result<Json<MessagesRequest>, JsonRejection>) -> Response {
    match payload {
        Ok(Json(request)) => Json(tokens::count_tokens(&request)).into_response(),
        Err(rejection) => error_response(&LlmError::InvalidRequest(rejection.body_text())),
    }
}

#[derive(Serialize)]
struct ModelInfo {
    #[serde(rename = "type")]
    object_type: &'static str,
    id: String,
    display_name: String,
    provider: String,
}

#[derive(Serialize)]
struct ModelList {
    data: Vec<ModelInfo>,
    has_more: bool,
    first_id: Option<String>,
    last_id: Option<String>,
}

/// Handle `GET /v1/models`
async fn list_models(State(state): State<LlmState>) -> Response {
    let data: Vec<ModelInfo> = state
        .list_models()
        .into_iter()
        .map(|(id, provider)| ModelInfo {
            object_type: "model",
            display_name: id.clone(),
            id,
            provider,
        })
        .collect();

    let response = ModelList {
        first_id: data.first().map(|model| model.id.clone()),
        last_id: data.last().map(|model| model.id.clone()),
        has_more: false,
        data,
    };

    Json(response).into_response()
}

/// SSE body with one `event: <type>` frame per canonical event
fn stream_response(events: EventStream) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let frames = events
        .map(|event| Frame::encode(event.event_type(), serde_json::to_string(&event)))
        .scan(false, |ended, frame| {
            let next = (!*ended).then(|| {
                *ended = frame.failed;
                Ok::<_, axum::Error>(Event::default().event(frame.event).data(frame.data))
            });
            future::ready(next)
        });

    Sse::new(frames).keep_alive(KeepAlive::default())
}

/// One encoded SSE frame
#[derive(Debug)]
struct Frame {
    event: &'static str,
    data: String,
    /// Encoding failed and the frame is a terminal `error` in its place
    failed: bool,
}

impl Frame {
    fn encode(event: &'static str, data: serde_json::Result<String>) -> Self {
        match data {
            Ok(data) => Self {
                event,
                data,
                failed: false,
            },
            Err(e) => {
                tracing::error!(event, error = %e, "failed to encode stream event");

                let error = LlmError::Internal(anyhow::anyhow!("failed to encode {event} event: {e}"));
                let body = serde_json::json!({
                    "type": "error",
                    "error": {
                        "type": error.error_type(),
                        "message": error.client_message(),
                    },
                });

                Self {
                    event: "error",
                    data: body.to_string(),
                    failed: true,
                }
            }
        }
    }
}

/// Anthropic-style error body, plus `retry-after` when the upstream sent one
fn error_response(error: &LlmError) -> Response {
    let status = error.status_code();

    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), error = %error, "request failed");
    } else {
        tracing::debug!(status = status.as_u16(), error = %error, "request rejected");
    }

    let body = serde_json::json!({
        "type": "error",
        "error": {
            "type": error.error_type(),
            "message": error.client_message(),
        },
        "retryable": error.retryable(),
    });

    let mut response = (status, Json(body)).into_response();

    if let Some(seconds) = error.retry_after() {
        response
            .headers_mut()
            .insert(http::header::RETRY_AFTER, HeaderValue::from(seconds));
    }

    response
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::error::{ErrorKind, NormalizedError};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn rate_limit_error_body() {
        let error = LlmError::Upstream(NormalizedError {
            kind: ErrorKind::RateLimit,
            upstream_status: Some(429),
            message: "rate_limited".to_owned(),
            retryable: true,
            retry_after: Some(30),
            timed_out: false,
        });

        let response = error_response(&error);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[http::header::RETRY_AFTER], "30");

        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "type": "error",
                "error": {"type": "rate_limit_error", "message": "rate_limited"},
                "retryable": true
            })
        );
    }

    #[test]
    fn encoding_failure_becomes_terminal_error_frame() {
        let ok = Frame::encode("message_stop", Ok(r#"{"type":"message_stop"}"#.to_owned()));
        assert!(!ok.failed);
        assert_eq!(ok.event, "message_stop");

        let cause = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let frame = Frame::encode("content_block_delta", Err(cause));

        assert!(frame.failed);
        assert_eq!(frame.event, "error");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&frame.data).unwrap(),
            serde_json::json!({
                "type": "error",
                "error": {"type": "internal_error", "message": "an internal error occurred"}
            })
        );
    }

    #[tokio::test]
    async fn config_error_body() {
        let response = error_response(&LlmError::Config("unknown provider 'bedrock'".to_owned()));

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(http::header::RETRY_AFTER).is_none());

        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "config_error");
        assert_eq!(body["error"]["message"], "configuration error: unknown provider 'bedrock'");
        assert_eq!(body["retryable"], false);
    }
}
