use http::HeaderMap;

/// Header selecting the upstream provider by name
pub const PROVIDER_HEADER: &str = "x-claude-proxy-provider";

/// Header carrying a caller-supplied request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request data collected by the server middleware
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// HTTP request parts (method, URI, headers, extensions)
    pub parts: http::request::Parts,
    /// Caller-supplied `x-request-id`, or a fresh UUID
    pub request_id: String,
}

impl RequestContext {
    /// Build a context from incoming request parts
    pub fn from_parts(parts: http::request::Parts) -> Self {
        let request_id = header_str(&parts.headers, REQUEST_ID_HEADER)
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_owned);

        Self { parts, request_id }
    }

    /// Access request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Provider explicitly requested through [`PROVIDER_HEADER`]
    pub fn provider_hint(&self) -> Option<&str> {
        header_str(&self.parts.headers, PROVIDER_HEADER)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
