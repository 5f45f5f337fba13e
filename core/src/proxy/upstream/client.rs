//! Upstream client for the image generation Responses API

use bytes::Bytes;
use reqwest::{header, Client, Response};
use tokio::time::Duration;

use crate::proxy::error::ProxyError;

const USER_AGENT: &str = concat!("imagegen-proxy/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct UpstreamClient {
    http_client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl UpstreamClient {
    /// No overall client timeout: streams may legitimately run for minutes.
    /// `request_timeout` bounds the wait for response headers and buffered bodies.
    pub fn new(base_url: &str, connect_timeout: Duration, request_timeout: Duration) -> reqwest::Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url)
    }

    /// POST the client's body to `/responses` unchanged, with the resolved credential.
    /// Non-success statuses are returned as `Ok`; callers decide how to surface them.
    pub async fn create_response(&self, credential: &str, body: Bytes) -> Result<Response, ProxyError> {
        let url = self.responses_url();
        let send = self
            .http_client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(credential)
            .body(body)
            .send();

        match tokio::time::timeout(self.request_timeout, send).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) if e.is_timeout() => Err(ProxyError::Timeout(self.request_timeout)),
            Ok(Err(e)) => {
                tracing::debug!("Request to {} failed: {}", url, e);
                Err(ProxyError::Network(e.to_string()))
            }
            Err(_) => Err(ProxyError::Timeout(self.request_timeout)),
        }
    }

    /// Read a whole response body under the request timeout
    pub async fn read_body(&self, response: Response) -> Result<Bytes, ProxyError> {
        match tokio::time::timeout(self.request_timeout, response.bytes()).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(ProxyError::Network(format!("Failed to read body: {}", e))),
            Err(_) => Err(ProxyError::Timeout(self.request_timeout)),
        }
    }

    /// Turn a non-success response into a verbatim pass-through error
    pub async fn into_upstream_error(&self, response: Response) -> ProxyError {
        let status = axum::http::StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(axum::http::StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| axum::http::HeaderValue::from_bytes(v.as_bytes()).ok());

        match self.read_body(response).await {
            Ok(body) => ProxyError::Upstream { status, body, content_type },
            Err(e) => e,
        }
    }
}
