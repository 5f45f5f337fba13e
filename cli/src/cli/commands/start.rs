use std::sync::Arc;

use imagegen_core::config::{Config, API_KEY_ENV};
use imagegen_core::proxy::{ProxyServer, RateLimiter};

pub async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Imagegen Proxy...");
    tracing::info!("  Port: {}", config.server.port);
    tracing::info!("  Host: {}", config.server.bind_host());
    tracing::info!("  Upstream: {}", config.upstream.base_url);
    tracing::info!(
        "  Rate limit: {} image requests per {}s",
        config.rate_limit.max_requests,
        config.rate_limit.window_secs
    );

    // Read once; later changes to the environment are not picked up
    let api_key = config.resolve_api_key();
    if api_key.is_none() {
        tracing::warn!("{} is not set and the config has no upstream.api_key.", API_KEY_ENV);
        tracing::warn!("Generation requests will fail unless clients send their own key.");
    }

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        config.rate_limit.window(),
    ));

    let server = ProxyServer::new(&config, api_key, rate_limiter)?;

    tracing::info!("Proxy server starting on http://{}:{}", config.server.bind_host(), config.server.port);
    tracing::info!("Press Ctrl+C to stop");

    // Run server (blocks until shutdown)
    server.run().await?;

    Ok(())
}
