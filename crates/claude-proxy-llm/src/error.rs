use claude_proxy_core::HttpError;
use http::StatusCode;
use thiserror::Error;

/// Canonical error taxonomy exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Provider or model could not be resolved
    Config,
    /// Request uses a capability the provider lacks
    UnsupportedFeature,
    /// Inbound body is malformed
    InvalidRequest,
    /// Upstream rejected the credentials
    Auth,
    /// Upstream is throttling
    RateLimit,
    /// Network failure, timeout or upstream 5xx
    UpstreamConnection,
    /// Upstream answered with something we cannot use
    UpstreamProtocol,
    /// Stream ended abnormally after it started
    StreamInterrupted,
    /// Bug or unexpected local failure
    Internal,
}

impl ErrorKind {
    /// Wire name used in error bodies and `error` stream events
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config_error",
            Self::UnsupportedFeature => "unsupported_feature_error",
            Self::InvalidRequest => "invalid_request_error",
            Self::Auth => "authentication_error",
            Self::RateLimit => "rate_limit_error",
            Self::UpstreamConnection => "upstream_connection_error",
            Self::UpstreamProtocol => "upstream_protocol_error",
            Self::StreamInterrupted => "stream_interrupted_error",
            Self::Internal => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream failure mapped into the canonical taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct NormalizedError {
    pub kind: ErrorKind,
    /// HTTP status returned by the provider, absent for transport failures
    pub upstream_status: Option<u16>,
    /// Client-safe message
    pub message: String,
    pub retryable: bool,
    /// Seconds to wait, from the upstream `Retry-After` header
    pub retry_after: Option<u64>,
    /// Set when a timeout, not a refusal, caused the failure
    pub timed_out: bool,
}

impl NormalizedError {
    /// Status reported to the client
    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Auth => self
                .upstream_status
                .filter(|status| matches!(status, 401 | 403))
                .and_then(|status| StatusCode::from_u16(status).ok())
                .unwrap_or(StatusCode::UNAUTHORIZED),
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamConnection if self.timed_out => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Config | ErrorKind::UnsupportedFeature | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::UpstreamConnection | ErrorKind::UpstreamProtocol | ErrorKind::StreamInterrupted => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

/// Errors raised while serving a gateway request
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider or model resolution failed
    #[error("configuration error: {0}")]
    Config(String),

    /// Request needs a capability the selected provider lacks
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Client sent a malformed or invalid request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream call failed
    #[error(transparent)]
    Upstream(#[from] NormalizedError),

    /// Stream ended abnormally after it started
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LlmError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::UnsupportedFeature(_) => ErrorKind::UnsupportedFeature,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Upstream(e) => e.kind,
            Self::StreamInterrupted(_) => ErrorKind::StreamInterrupted,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Malformed upstream payload
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Upstream(NormalizedError {
            kind: ErrorKind::UpstreamProtocol,
            upstream_status: None,
            message: message.into(),
            retryable: false,
            retry_after: None,
            timed_out: false,
        })
    }
}

impl HttpError for LlmError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::UnsupportedFeature(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(e) => e.status_code(),
            Self::StreamInterrupted(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        self.kind().as_str()
    }

    fn client_message(&self) -> String {
        match self {
            Self::Upstream(e) => e.message.clone(),
            Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Upstream(e) => e.retryable,
            Self::StreamInterrupted(_) => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Upstream(e) => e.retry_after,
            _ => None,
        }
    }
}
