//! Generation handler
//! Handles POST /api/generate (and its /v1/responses alias)

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::proxy::error::ProxyError;
use crate::proxy::mappers::{extract_completed_image, requests_image_generation, wants_stream};
use crate::proxy::relay::{relay_stream, LogSink, StreamRelay};
use crate::proxy::server::AppState;

pub async fn handle_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let trace_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();

    let request: Value = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
    let is_image = requests_image_generation(&request);
    let stream = wants_stream(&request);

    if is_image && !state.rate_limiter.try_admit() {
        let stats = state.rate_limiter.usage_stats();
        let retry_after_secs = state.rate_limiter.retry_after_secs(&stats);
        warn!(
            "[{}] Rate limited | {}/{} used | resets {}",
            trace_id, stats.used, stats.limit, stats.reset_time
        );
        return Err(ProxyError::RateLimited { stats, retry_after_secs });
    }

    let credential = resolve_credential(state.api_key.as_deref(), &headers)
        .ok_or(ProxyError::Unauthorized)?;

    info!(
        "[{}] Generate request | Model: {} | Image: {} | Stream: {} | Chained: {}",
        trace_id,
        request.get("model").and_then(|v| v.as_str()).unwrap_or("-"),
        is_image,
        stream,
        request.get("previous_response_id").is_some_and(|v| !v.is_null()),
    );

    // The exact client bytes go upstream, previous_response_id included
    let response = state
        .upstream
        .create_response(&credential, body)
        .await
        .inspect_err(|e| error!("[{}] Upstream call failed ({}): {}", trace_id, e.category(), e))?;

    if !response.status().is_success() {
        let err = state.upstream.into_upstream_error(response).await;
        error!("[{}] Upstream error ({}): {}", trace_id, err.category(), err);
        return Err(err);
    }

    if stream {
        let relay = StreamRelay::new()
            .require_image(is_image)
            .with_sink(LogSink::new(trace_id.clone()));
        let records = relay_stream(
            response.bytes_stream(),
            relay,
            state.stream_idle_timeout,
            trace_id,
        );

        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(records),
        )
            .into_response());
    }

    let bytes = state.upstream.read_body(response).await?;
    let image = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .and_then(|json| extract_completed_image(&json));

    match image {
        Some(image) => {
            info!(
                "[{}] Completed | Response: {} | {} bytes b64",
                trace_id,
                image.response_id.as_deref().unwrap_or("-"),
                image.image_b64.len()
            );
            Ok(json_response(bytes))
        }
        None if is_image => {
            error!("[{}] Upstream succeeded without an image", trace_id);
            Err(ProxyError::NoResult)
        }
        // Not an image request, nothing to extract
        None => Ok(json_response(bytes)),
    }
}

fn json_response(bytes: Bytes) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        bytes,
    )
        .into_response()
}

/// Server-held key first, then the caller's `Authorization: Bearer` header
pub fn resolve_credential(server_key: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(key) = server_key.filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
}

/// The scheme name is case-insensitive
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}
