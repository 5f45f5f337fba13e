//! Proxy Server - Axum HTTP server

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::proxy::handlers::{generate, status};
use crate::proxy::rate_limit::RateLimiter;
use crate::proxy::upstream::UpstreamClient;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>,
    pub upstream: Arc<UpstreamClient>,
    /// Server-held upstream credential, read once at startup
    pub api_key: Option<Arc<str>>,
    pub stream_idle_timeout: Duration,
}

impl AppState {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        upstream: UpstreamClient,
        api_key: Option<String>,
        stream_idle_timeout: Duration,
    ) -> Self {
        Self {
            rate_limiter,
            upstream: Arc::new(upstream),
            api_key: api_key.map(Arc::from),
            stream_idle_timeout,
        }
    }
}

/// Routes plus middleware, without binding a socket
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(status::handle_health))
        .route("/api/rate-limit", get(status::handle_rate_limit))
        .route("/api/generate", post(generate::handle_generate))
        .route("/v1/responses", post(generate::handle_generate))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}

/// Proxy server instance
pub struct ProxyServer {
    host: String,
    port: u16,
    max_body_bytes: usize,
    state: AppState,
}

impl ProxyServer {
    pub fn new(config: &Config, api_key: Option<String>, rate_limiter: Arc<RateLimiter>) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(
            &config.upstream.base_url,
            config.timeouts.connect(),
            config.timeouts.request(),
        )?;

        let state = AppState::new(rate_limiter, upstream, api_key, config.timeouts.stream_idle());

        Ok(Self {
            host: config.server.bind_host().to_string(),
            port: config.server.port,
            max_body_bytes: config.server.max_body_bytes(),
            state,
        })
    }

    /// Run the proxy server (blocking)
    pub async fn run(self) -> anyhow::Result<()> {
        if self.state.api_key.is_none() {
            tracing::warn!(
                "No server API key set; generation requests need an Authorization header"
            );
        }

        let app = create_router(self.state, self.max_body_bytes);

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("Proxy server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
