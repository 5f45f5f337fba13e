//! Health and rate limit status

use axum::{extract::State, response::Json};
use serde_json::{json, Value};

use crate::proxy::rate_limit::RateLimitStatus;
use crate::proxy::server::AppState;

/// Handle GET /api/rate-limit
pub async fn handle_rate_limit(State(state): State<AppState>) -> Json<RateLimitStatus> {
    Json(state.rate_limiter.status())
}

/// Handle GET /health
pub async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
