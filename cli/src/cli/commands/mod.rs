pub mod generate;
pub mod start;
pub mod status;

use imagegen_core::config::Config;

/// Base URL of the proxy described by `config`
pub fn server_url(config: &Config) -> String {
    let host = match config.server.bind_host() {
        "0.0.0.0" => "127.0.0.1",
        host => host,
    };
    format!("http://{}:{}", host, config.server.port)
}
