//! Integration tests for the HTTP proxy
//!
//! The router is driven with `oneshot`; the upstream image API is a wiremock server.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::TimeZone;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

use imagegen_core::proxy::{create_router, AppState, ManualClock, RateLimiter, UpstreamClient};

// =============================================================================
// Test Fixtures
// =============================================================================

struct TestProxy {
    app: Router,
    limiter: Arc<RateLimiter>,
    clock: Arc<ManualClock>,
}

fn build_proxy(base_url: &str, capacity: usize, api_key: Option<&str>, timeout: Duration) -> TestProxy {
    let start = chrono::Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let limiter = Arc::new(RateLimiter::with_clock(
        capacity,
        Duration::from_secs(3600),
        clock.clone(),
    ));
    let upstream = UpstreamClient::new(base_url, Duration::from_secs(2), timeout).unwrap();
    let state = AppState::new(
        limiter.clone(),
        upstream,
        api_key.map(str::to_string),
        Duration::from_secs(5),
    );

    TestProxy {
        app: create_router(state, 1024 * 1024),
        limiter,
        clock,
    }
}

fn proxy_for(server: &MockServer, capacity: usize) -> TestProxy {
    build_proxy(&server.uri(), capacity, Some("sk-server"), Duration::from_secs(5))
}

fn image_request() -> Value {
    json!({
        "model": "gpt-4.1-mini",
        "input": "A watercolor lighthouse at dusk",
        "tools": [{"type": "image_generation", "size": "1024x1024", "quality": "high"}]
    })
}

fn chat_request() -> Value {
    json!({"model": "gpt-4.1-mini", "input": "Describe a lighthouse"})
}

fn image_response(id: &str) -> Value {
    json!({
        "id": id,
        "object": "response",
        "status": "completed",
        "output": [
            {"type": "image_generation_call", "id": "ig_1", "status": "completed", "result": "aW1hZ2U=", "revised_prompt": "A watercolor lighthouse"}
        ]
    })
}

fn post(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn mount_image_ok(server: &MockServer, id: &str) {
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response(id)))
        .mount(server)
        .await;
}

// =============================================================================
// Status Endpoint Tests
// =============================================================================

mod status_endpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_status_and_timestamp() {
        let proxy = build_proxy("http://127.0.0.1:9", 5, None, Duration::from_secs(1));
        let (status, json) = send_json(&proxy.app, get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_endpoint_reports_usage() {
        let proxy = build_proxy("http://127.0.0.1:9", 4, None, Duration::from_secs(1));
        proxy.limiter.try_admit();

        let (status, json) = send_json(&proxy.app, get("/api/rate-limit")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["used"], 1);
        assert_eq!(json["remaining"], 3);
        assert_eq!(json["limit"], 4);
        assert_eq!(json["windowHours"], 1.0);
        assert_eq!(json["percentageUsed"], 25);
        assert_eq!(json["resetTime"], "2026-05-01T10:00:00Z");
    }

    #[tokio::test]
    async fn test_status_endpoints_do_not_consume_quota() {
        let proxy = build_proxy("http://127.0.0.1:9", 1, None, Duration::from_secs(1));
        for _ in 0..5 {
            send(&proxy.app, get("/api/rate-limit")).await;
            send(&proxy.app, get("/health")).await;
        }
        assert_eq!(proxy.limiter.usage_stats().used, 0);
    }
}

// =============================================================================
// Admission Tests
// =============================================================================

mod admission_tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limited_request_never_reaches_upstream() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(image_response("resp_1")))
            .expect(2)
            .mount(&server)
            .await;

        let proxy = proxy_for(&server, 2);
        for _ in 0..2 {
            let (status, _, _) = send(&proxy.app, post("/api/generate", &image_request())).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, headers, body) = send(&proxy.app, post("/api/generate", &image_request())).await;
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["error"]["type"], "rate_limit_exceeded");
        assert_eq!(json["rateLimit"]["used"], 2);
        assert_eq!(json["rateLimit"]["remaining"], 0);
        assert_eq!(json["rateLimit"]["limit"], 2);
        assert_eq!(json["rateLimit"]["resetTime"], "2026-05-01T10:00:00Z");
        assert_eq!(headers[header::RETRY_AFTER], "3600");
    }

    #[tokio::test]
    async fn test_quota_returns_after_window() {
        let server = MockServer::start().await;
        mount_image_ok(&server, "resp_1").await;
        let proxy = proxy_for(&server, 1);

        let (status, _, _) = send(&proxy.app, post("/api/generate", &image_request())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = send(&proxy.app, post("/api/generate", &image_request())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        proxy.clock.advance(Duration::from_secs(3601));
        let (status, _, _) = send(&proxy.app, post("/api/generate", &image_request())).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_non_image_requests_bypass_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "resp_text", "output": []})))
            .mount(&server)
            .await;

        let proxy = proxy_for(&server, 1);
        for _ in 0..1000 {
            let (status, _, _) = send(&proxy.app, post("/api/generate", &chat_request())).await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(proxy.limiter.usage_stats().used, 0);
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected_without_admission() {
        let proxy = build_proxy("http://127.0.0.1:9", 1, Some("sk"), Duration::from_secs(1));
        let request = Request::builder()
            .method("POST")
            .uri("/api/generate")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, json) = send_json(&proxy.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "invalid_request_error");
        assert_eq!(proxy.limiter.usage_stats().used, 0);
    }
}

// =============================================================================
// Credential Tests
// =============================================================================

mod credential_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_credential_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let proxy = build_proxy(&server.uri(), 5, None, Duration::from_secs(5));
        let (status, json) = send_json(&proxy.app, post("/api/generate", &image_request())).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["type"], "authentication_error");
        assert_eq!(json["error"]["code"], "missing_api_key");
        // Admission happens before credential resolution and is not refunded
        assert_eq!(proxy.limiter.usage_stats().used, 1);
    }

    #[tokio::test]
    async fn test_server_key_sent_upstream() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/responses"))
            .and(matchers::header("authorization", "Bearer sk-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(image_response("resp_1")))
            .expect(1)
            .mount(&server)
            .await;

        let proxy = proxy_for(&server, 5);
        let mut request = post("/api/generate", &image_request());
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer sk-client".parse().unwrap());

        let (status, _, _) = send(&proxy.app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_client_key_used_when_server_has_none() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::header("authorization", "Bearer sk-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(image_response("resp_1")))
            .expect(1)
            .mount(&server)
            .await;

        let proxy = build_proxy(&server.uri(), 5, None, Duration::from_secs(5));
        let mut request = post("/api/generate", &image_request());
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer sk-client".parse().unwrap());

        let (status, _, _) = send(&proxy.app, request).await;
        assert_eq!(status, StatusCode::OK);
    }
}

// =============================================================================
// Buffered Mode Tests
// =============================================================================

mod buffered_tests {
    use super::*;

    #[tokio::test]
    async fn test_success_returns_upstream_body() {
        let server = MockServer::start().await;
        mount_image_ok(&server, "resp_abc").await;
        let proxy = proxy_for(&server, 5);

        let (status, json) = send_json(&proxy.app, post("/api/generate", &image_request())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, image_response("resp_abc"));
    }

    #[tokio::test]
    async fn test_upstream_error_passed_through_verbatim() {
        let server = MockServer::start().await;
        let upstream_body = json!({
            "error": {
                "message": "Your organization must be verified to use this model.",
                "type": "invalid_request_error",
                "code": "organization_not_verified"
            }
        });
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(upstream_body.clone()))
            .mount(&server)
            .await;

        let proxy = proxy_for(&server, 5);
        let (status, json) = send_json(&proxy.app, post("/api/generate", &image_request())).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json, upstream_body);
        // No refund on upstream failure
        assert_eq!(proxy.limiter.usage_stats().used, 1);
    }

    #[tokio::test]
    async fn test_success_without_image_is_no_result() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp_empty",
                "output": [{"type": "message", "content": [{"type": "output_text", "text": "I can't draw that."}]}]
            })))
            .mount(&server)
            .await;

        let proxy = proxy_for(&server, 5);
        let (status, json) = send_json(&proxy.app, post("/api/generate", &image_request())).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["type"], "no_result");
        assert_eq!(json["error"]["code"], "no_image_generated");
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(image_response("resp_slow"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let proxy = build_proxy(&server.uri(), 5, Some("sk"), Duration::from_millis(200));
        let (status, json) = send_json(&proxy.app, post("/api/generate", &image_request())).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["error"]["type"], "upstream_error");
        assert_eq!(json["error"]["code"], "upstream_timeout");
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        // Nothing listens on the discard port
        let proxy = build_proxy("http://127.0.0.1:9", 5, Some("sk"), Duration::from_secs(5));
        let (status, json) = send_json(&proxy.app, post("/api/generate", &image_request())).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["code"], "upstream_unreachable");
    }
}

// =============================================================================
// Streaming Mode Tests
// =============================================================================

mod streaming_tests {
    use super::*;

    fn sse_body() -> String {
        let records = [
            json!({"type": "response.created", "response": {"id": "resp_s1"}}),
            json!({"type": "response.image_generation_call.partial_image", "partial_image_index": 0, "partial_image_b64": "UDA="}),
            json!({"type": "response.image_generation_call.partial_image", "partial_image_index": 1, "partial_image_b64": "UDE="}),
            json!({"type": "response.completed", "response": image_response("resp_s1")}),
        ];
        records.iter().map(|r| format!("data: {}\n\n", r)).collect()
    }

    fn streaming_request() -> Value {
        let mut body = image_request();
        body["stream"] = json!(true);
        body["tools"][0]["partial_images"] = json!(2);
        body
    }

    #[tokio::test]
    async fn test_stream_relayed_unchanged() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(), "text/event-stream"))
            .mount(&server)
            .await;

        let proxy = proxy_for(&server, 5);
        let (status, headers, body) = send(&proxy.app, post("/api/generate", &streaming_request())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(std::str::from_utf8(&body).unwrap(), sse_body());
        assert_eq!(proxy.limiter.usage_stats().used, 1);
    }

    #[tokio::test]
    async fn test_stream_without_completion_ends_with_error_record() {
        let server = MockServer::start().await;
        let partial_only = format!(
            "data: {}\n\n",
            json!({"type": "response.image_generation_call.partial_image", "partial_image_index": 0, "partial_image_b64": "UDA="})
        );
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(partial_only.clone(), "text/event-stream"))
            .mount(&server)
            .await;

        let proxy = proxy_for(&server, 5);
        let (status, _, body) = send(&proxy.app, post("/api/generate", &streaming_request())).await;
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(text.starts_with(&partial_only));
        let last = text.trim_end().rsplit("\n\n").next().unwrap();
        let json: Value = serde_json::from_str(last.strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(json["error"]["type"], "no_result");
    }

    #[tokio::test]
    async fn test_text_stream_bypasses_rate_limit_and_passes_through() {
        let server = MockServer::start().await;
        let text_stream: String = [
            json!({"type": "response.created", "response": {"id": "resp_t1"}}),
            json!({"type": "response.output_text.delta", "delta": "A tall"}),
            json!({"type": "response.output_text.delta", "delta": " lighthouse"}),
            json!({"type": "response.completed", "response": {
                "id": "resp_t1",
                "status": "completed",
                "output": [{"type": "message", "content": [{"type": "output_text", "text": "A tall lighthouse"}]}]
            }}),
        ]
        .iter()
        .map(|r| format!("data: {}\n\n", r))
        .collect();
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(text_stream.clone(), "text/event-stream"))
            .mount(&server)
            .await;

        let proxy = proxy_for(&server, 1);
        let mut request = chat_request();
        request["stream"] = json!(true);

        for _ in 0..3 {
            let (status, _, body) = send(&proxy.app, post("/api/generate", &request)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(std::str::from_utf8(&body).unwrap(), text_stream);
        }
        assert_eq!(proxy.limiter.usage_stats().used, 0);
    }

    #[tokio::test]
    async fn test_stream_upstream_error_is_not_streamed() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached", "type": "requests", "code": "rate_limit_exceeded"}
            })))
            .mount(&server)
            .await;

        let proxy = proxy_for(&server, 5);
        let (status, json) = send_json(&proxy.app, post("/api/generate", &streaming_request())).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["error"]["type"], "requests");
    }
}

// =============================================================================
// Conversation Chaining Tests
// =============================================================================

mod chaining_tests {
    use super::*;
    use imagegen_core::conversation::ConversationState;
    use imagegen_core::proxy::mappers::extract_completed_image;

    #[tokio::test]
    async fn test_previous_response_id_forwarded_unchanged() {
        let server = MockServer::start().await;
        mount_image_ok(&server, "resp_turn1").await;
        let proxy = proxy_for(&server, 5);

        let (_, first) = send_json(&proxy.app, post("/api/generate", &image_request())).await;
        let completed = extract_completed_image(&first).unwrap();

        let mut state = ConversationState::new();
        state.record(&completed);

        let mut follow_up = json!({
            "model": "gpt-4.1-mini",
            "input": "Now add a full moon",
            "tools": [{"type": "image_generation"}]
        });
        state.apply(&mut follow_up);
        let (status, _) = send_json(&proxy.app, post("/api/generate", &follow_up)).await;
        assert_eq!(status, StatusCode::OK);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].body, follow_up.to_string().into_bytes());

        let forwarded: Value = serde_json::from_slice(&received[1].body).unwrap();
        assert_eq!(forwarded["previous_response_id"], "resp_turn1");
        assert_eq!(proxy.limiter.usage_stats().used, 2);
    }

    #[tokio::test]
    async fn test_responses_alias_route() {
        let server = MockServer::start().await;
        mount_image_ok(&server, "resp_alias").await;
        let proxy = proxy_for(&server, 5);

        let (status, json) = send_json(&proxy.app, post("/v1/responses", &image_request())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], "resp_alias");
    }
}
