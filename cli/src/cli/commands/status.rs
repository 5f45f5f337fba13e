use imagegen_core::config::{default_config_path, Config, API_KEY_ENV};
use serde_json::Value;

use super::server_url;

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let base = server_url(config);

    println!("Imagegen Proxy Status");
    println!("=====================");
    println!();
    println!("Configuration:");
    println!("  Config file: {:?}", default_config_path());
    println!("  Upstream: {}", config.upstream.base_url);
    println!(
        "  API key: {}",
        if config.resolve_api_key().is_some() { "configured" } else { "missing" }
    );
    println!();
    println!("Server settings:");
    println!("  Host: {}", config.server.bind_host());
    println!("  Port: {}", config.server.port);
    println!(
        "  Rate limit: {} requests / {}s",
        config.rate_limit.max_requests, config.rate_limit.window_secs
    );
    println!();

    match reqwest::get(format!("{}/health", base)).await {
        Ok(resp) if resp.status().is_success() => {
            println!("Server: RUNNING ✓");
        }
        _ => {
            println!("Server: NOT RUNNING");
            if config.resolve_api_key().is_none() {
                println!("  (set {} before starting)", API_KEY_ENV);
            }
            return Ok(());
        }
    }

    let usage: Value = reqwest::get(format!("{}/api/rate-limit", base))
        .await?
        .error_for_status()?
        .json()
        .await?;

    println!();
    println!("Usage:");
    println!("  Used: {} / {} ({}%)", usage["used"], usage["limit"], usage["percentageUsed"]);
    println!("  Remaining: {}", usage["remaining"]);
    println!("  Resets: {}", usage["resetTime"].as_str().unwrap_or("-"));

    Ok(())
}
