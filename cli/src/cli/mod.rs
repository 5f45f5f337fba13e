pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imagegen-proxy")]
#[command(author, version, about = "Image generation proxy - keeps the API key on the server and rate limits generation")]
pub struct Cli {
    /// Path to config file (checked in order: local config.toml, ~/.config/imagegen-proxy/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Start {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configuration and the usage of a running proxy
    Status,

    /// Generate an image through a running proxy
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// What to draw, or how to change the previous image
    pub prompt: String,

    #[arg(short, long, default_value = "gpt-4.1-mini")]
    pub model: String,

    /// e.g. 1024x1024, 1536x1024, auto
    #[arg(long)]
    pub size: Option<String>,

    /// low, medium, high or auto
    #[arg(long)]
    pub quality: Option<String>,

    /// transparent, opaque or auto
    #[arg(long)]
    pub background: Option<String>,

    /// png, jpeg or webp
    #[arg(long)]
    pub format: Option<String>,

    /// 0-100, jpeg and webp only
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub compression: Option<u8>,

    /// Stream and show this many partial frames (0 disables streaming)
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub partial_images: u8,

    /// Write partial frames next to the output file
    #[arg(long)]
    pub save_partials: bool,

    /// Continue from an earlier response to edit its image
    #[arg(long)]
    pub previous_response_id: Option<String>,

    /// Where to write the image (default: image.<format>)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Proxy base URL (default: from config)
    #[arg(long)]
    pub server: Option<String>,

    /// Upstream key to send when the proxy holds none
    #[arg(long)]
    pub api_key: Option<String>,
}
