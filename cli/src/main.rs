use clap::Parser;

mod cli;

use cli::{Cli, Commands};
use imagegen_core::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = load_config(cli.config.clone())?;
    let mut config = loaded.config;

    // Initialize logging, RUST_LOG adds to the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("imagegen_proxy={}", config.logging.level).parse()?)
                .add_directive(format!("imagegen_core={}", config.logging.level).parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    match &loaded.source {
        Some(path) => tracing::info!("Loaded config from {:?}", path),
        None => tracing::info!("No config file found, using defaults"),
    }

    match cli.command {
        Commands::Start { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            cli::commands::start::run(config).await?;
        }
        Commands::Status => {
            cli::commands::status::run(&config).await?;
        }
        Commands::Generate(args) => {
            cli::commands::generate::run(&config, args).await?;
        }
    }

    Ok(())
}
