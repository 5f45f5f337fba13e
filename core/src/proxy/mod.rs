//! Proxy module - rate-limited pass-through to the image generation API

pub mod clock;
pub mod error;
pub mod handlers;
pub mod mappers;
pub mod rate_limit;
pub mod relay;
pub mod server;
pub mod upstream;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ProxyError;
pub use rate_limit::{RateLimitStatus, RateLimiter, UsageStats};
pub use relay::{relay_stream, RelayOutcome, RelaySink, StreamRelay};
pub use server::{create_router, AppState, ProxyServer};
pub use upstream::UpstreamClient;
