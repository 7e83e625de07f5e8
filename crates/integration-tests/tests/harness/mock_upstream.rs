//! Mock provider backend for integration tests
//!
//! Answers every path with one scripted reply and records what it received,
//! so tests can assert on the upstream URL, credentials and body.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use futures_util::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

/// Interval between keep-alive comments on a hanging SSE body
const TRICKLE_INTERVAL: Duration = Duration::from_millis(50);

/// Scripted upstream reply
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    content_type: &'static str,
    headers: Vec<(&'static str, String)>,
    chunks: Vec<String>,
    /// Keep the body open after the last chunk, writing SSE comments
    hang: bool,
    /// Wait before sending response headers
    delay: Option<Duration>,
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status: StatusCode::from_u16(status).expect("valid status"),
            content_type: "application/json",
            headers: Vec::new(),
            chunks: vec![body.to_string()],
            hang: false,
            delay: None,
        }
    }

    /// SSE body with one `data:` frame per payload
    pub fn sse<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            status: StatusCode::OK,
            content_type: "text/event-stream",
            headers: Vec::new(),
            chunks: frames
                .into_iter()
                .map(|frame| format!("data: {}\n\n", frame.as_ref()))
                .collect(),
            hang: false,
            delay: None,
        }
    }

    /// Newline-delimited JSON body
    pub fn ndjson(lines: &[serde_json::Value]) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/x-ndjson",
            headers: Vec::new(),
            chunks: lines.iter().map(|line| format!("{line}\n")).collect(),
            hang: false,
            delay: None,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_owned()));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Never finish the body; only meaningful for SSE replies
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// One request as seen by the mock
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Path and query
    pub uri: String,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

struct MockState {
    reply: Reply,
    request_count: AtomicU32,
    requests: Mutex<Vec<Recorded>>,
    body_dropped: AtomicBool,
}

/// Mock upstream that answers every request with the same reply
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

impl MockUpstream {
    /// Start the mock server, returning immediately
    pub async fn start(reply: Reply) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            reply,
            request_count: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            body_dropped: AtomicBool::new(false),
        });

        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as a provider
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Base URL with a `/v1` suffix, for OpenAI-compatible providers
    pub fn v1_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Number of requests received
    pub fn request_count(&self) -> u32 {
        self.state.request_count.load(Ordering::SeqCst)
    }

    /// The most recent request
    pub fn last_request(&self) -> Recorded {
        self.state
            .requests
            .lock()
            .expect("mock state lock")
            .last()
            .cloned()
            .expect("mock received a request")
    }

    /// Whether the server has dropped a response body, i.e. the proxy went away
    pub fn body_dropped(&self) -> bool {
        self.state.body_dropped.load(Ordering::SeqCst)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Flags the mock when the response body is dropped
struct DropFlag(Arc<MockState>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.body_dropped.store(true, Ordering::SeqCst);
    }
}

async fn handle(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    state.request_count.fetch_add(1, Ordering::SeqCst);

    state.requests.lock().expect("mock state lock").push(Recorded {
        uri: uri.path_and_query().map(ToString::to_string).unwrap_or_default(),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
    });

    let reply = state.reply.clone();

    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }

    let flag = DropFlag(Arc::clone(&state));

    let chunks = stream::iter(reply.chunks.into_iter().map(Bytes::from));

    let body = if reply.hang {
        let trickle = stream::unfold((), |()| async {
            tokio::time::sleep(TRICKLE_INTERVAL).await;
            Some((Bytes::from_static(b": keep-alive\n\n"), ()))
        });

        Body::from_stream(chunks.chain(trickle).map(move |chunk| {
            let _ = &flag;
            Ok::<_, Infallible>(chunk)
        }))
    } else {
        Body::from_stream(chunks.map(move |chunk| {
            let _ = &flag;
            Ok::<_, Infallible>(chunk)
        }))
    };

    let mut builder = Response::builder()
        .status(reply.status)
        .header("content-type", reply.content_type);

    for (name, value) in reply.headers {
        builder = builder.header(name, value);
    }

    builder.body(body).expect("valid mock response")
}
