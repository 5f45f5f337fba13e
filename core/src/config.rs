use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the upstream API credential
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Proxy server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub allow_lan_access: bool,

    /// Request body limit in megabytes (images travel base64-encoded)
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allow_lan_access: false,
            max_body_mb: default_max_body_mb(),
        }
    }
}

impl ServerConfig {
    pub fn bind_host(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            &self.host
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Used only when the environment does not provide a key
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,

    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,

    #[serde(default = "default_stream_idle_secs")]
    pub stream_idle_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_secs: default_request_secs(),
            connect_secs: default_connect_secs(),
            stream_idle_secs: default_stream_idle_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_secs(self.stream_idle_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_max_body_mb() -> usize { 50 }
fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_max_requests() -> usize { 40 }
fn default_window_secs() -> u64 { 3600 }
fn default_request_secs() -> u64 { 120 }
fn default_connect_secs() -> u64 { 20 }
fn default_stream_idle_secs() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Resolve the server-held upstream credential.
    ///
    /// The environment wins over the config file; empty values count as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        let from_env = std::env::var(API_KEY_ENV).ok();
        pick_api_key(from_env, self.upstream.api_key.clone())
    }
}

fn pick_api_key(from_env: Option<String>, from_file: Option<String>) -> Option<String> {
    from_env
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .or_else(|| {
            from_file
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
        })
}

/// Get default config file path
/// Uses ~/.config/imagegen-proxy/config.toml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("imagegen-proxy")
        .join("config.toml")
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// A loaded configuration and the file it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// `None` when no file was found and defaults are in use
    pub source: Option<PathBuf>,
}

/// Load config from file, or return defaults if not found.
///
/// Loading order:
/// 1. Specified path (if provided, must exist)
/// 2. ./config.toml (if exists)
/// 3. default_config_path()
///
/// A file that exists but does not parse is an error, never skipped.
/// Runs before logging is set up, so the caller reports `source`.
pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<LoadedConfig> {
    load_config_from(path, Path::new("config.toml"), &default_config_path())
}

fn load_config_from(
    explicit: Option<PathBuf>,
    local: &Path,
    default: &Path,
) -> anyhow::Result<LoadedConfig> {
    if let Some(config_path) = explicit {
        if !config_path.exists() {
            anyhow::bail!("Specified config file not found: {:?}", config_path);
        }
        let config = read_config(&config_path)?;
        return Ok(LoadedConfig { config, source: Some(config_path) });
    }

    for candidate in [local, default] {
        if candidate.exists() {
            let config = read_config(candidate)?;
            return Ok(LoadedConfig {
                config,
                source: Some(candidate.to_path_buf()),
            });
        }
    }

    Ok(LoadedConfig { config: Config::default(), source: None })
}
