//! HTTP server assembly for claude-proxy

mod request_context;

use std::net::SocketAddr;

use axum::Router;
use claude_proxy_config::Config;
use claude_proxy_llm::LlmState;
use tower_http::trace::TraceLayer;

/// Address used when neither the config file nor the command line sets one
const DEFAULT_LISTEN_ADDRESS: ([u8; 4], u16) = ([127, 0, 0, 1], 8082);

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
}

impl Server {
    /// Build the server from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the provider registry cannot be built
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(DEFAULT_LISTEN_ADDRESS));

        let llm_state = LlmState::from_config(&config.llm)?;

        tracing::info!(providers = llm_state.registry().len(), "provider registry ready");

        let mut app = Router::new();

        if config.server.health.enabled {
            app = app.route(&config.server.health.path, axum::routing::get(|| async { "ok" }));
        }

        app = app.merge(claude_proxy_llm::llm_router(llm_state));

        // Request context (innermost, runs just before handlers)
        app = app.layer(axum::middleware::from_fn(request_context::request_context_middleware));

        app = app.layer(TraceLayer::new_for_http());

        Ok(Self {
            router: app,
            listen_address,
        })
    }

    /// Get the configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}
