use http::StatusCode;

/// Domain error that knows how it should be reported over HTTP
///
/// The route layer turns implementors into Anthropic-style error bodies, so
/// domain crates never depend on axum response types for their errors.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error type (e.g. `rate_limit_error`)
    fn error_type(&self) -> &str;

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;

    /// Whether retrying the same request may succeed
    fn retryable(&self) -> bool {
        false
    }

    /// Seconds the client should wait before retrying
    fn retry_after(&self) -> Option<u64> {
        None
    }
}
