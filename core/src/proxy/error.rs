//! Client-visible proxy errors
//!
//! Every variant except `Upstream` renders as
//! `{"error": {"message", "type", "code"}}`. Upstream failures are passed
//! through with the upstream's own status and body.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::proxy::rate_limit::UsageStats;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid request body: {0}")]
    InvalidRequest(String),

    #[error("Rate limit exceeded")]
    RateLimited {
        stats: UsageStats,
        retry_after_secs: u64,
    },

    #[error("No API key configured. Set OPENAI_API_KEY on the server or send an Authorization: Bearer header.")]
    Unauthorized,

    #[error("Upstream returned {status}")]
    Upstream {
        status: StatusCode,
        body: Bytes,
        content_type: Option<HeaderValue>,
    },

    #[error("Upstream reported success but no image was generated")]
    NoResult,

    #[error("Upstream did not respond within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Upstream request failed: {0}")]
    Network(String),

    #[error("Upstream stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::Upstream { status, .. } => *status,
            ProxyError::NoResult => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Network(_) | ProxyError::StreamInterrupted(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable `type`
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::RateLimited { .. } => "rate_limit_exceeded",
            ProxyError::Unauthorized => "authentication_error",
            ProxyError::NoResult => "no_result",
            ProxyError::Upstream { .. }
            | ProxyError::Timeout(_)
            | ProxyError::Network(_)
            | ProxyError::StreamInterrupted(_) => "upstream_error",
        }
    }

    pub fn code(&self) -> Option<&'static str> {
        match self {
            ProxyError::InvalidRequest(_) => Some("invalid_json"),
            ProxyError::RateLimited { .. } => Some("rate_limit_exceeded"),
            ProxyError::Unauthorized => Some("missing_api_key"),
            ProxyError::Upstream { .. } => None,
            ProxyError::NoResult => Some("no_image_generated"),
            ProxyError::Timeout(_) => Some("upstream_timeout"),
            ProxyError::Network(_) => Some("upstream_unreachable"),
            ProxyError::StreamInterrupted(_) => Some("stream_interrupted"),
        }
    }

    fn message(&self) -> String {
        match self {
            ProxyError::RateLimited { stats, .. } => format!(
                "Rate limit exceeded: {} of {} image requests used. Try again after {}.",
                stats.used,
                stats.limit,
                stats.reset_time.to_rfc3339()
            ),
            other => other.to_string(),
        }
    }

    /// `{"error": {...}}` plus `rateLimit` on the rate limit path
    pub fn error_body(&self) -> Value {
        let mut error = json!({
            "message": self.message(),
            "type": self.error_type(),
        });
        if let Some(code) = self.code() {
            error["code"] = json!(code);
        }

        let mut body = json!({ "error": error });
        if let ProxyError::RateLimited { stats, .. } = self {
            body["rateLimit"] = json!(stats);
        }
        body
    }

    /// Error frame appended to an event stream whose headers are already sent
    pub fn to_sse_record(&self) -> Bytes {
        Bytes::from(format!("data: {}\n\n", self.error_body()))
    }

    /// Label for logs
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "request",
            ProxyError::RateLimited { .. } => "rate_limited",
            ProxyError::Unauthorized => "unauthorized",
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::NoResult => "no_result",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::Network(_) | ProxyError::StreamInterrupted(_) => "network",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::Upstream { status, body, content_type } => {
                let content_type = content_type
                    .unwrap_or_else(|| HeaderValue::from_static("application/json"));
                (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
            }
            ProxyError::RateLimited { retry_after_secs, .. } => {
                let body = self.error_body();
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    Json(body),
                )
                    .into_response()
            }
            other => (other.status(), Json(other.error_body())).into_response(),
        }
    }
}
