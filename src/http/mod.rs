//! # HTTP Transport
//!
//! The single HTTP client shared by token renewal and the uplink.
//!
//! Calls never overlap: the scheduler awaits each request before issuing the
//! next. Each request and its response are scoped to one call, so the
//! underlying connection is released on every exit path.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// HTTP transport failures (no status line was obtained)
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be built
    #[error("Invalid request: {0}")]
    Request(String),

    /// Connection, TLS or timeout failure
    #[error("Request failed: {0}")]
    Send(String),

    /// The response body could not be read
    #[error("Failed to read response body: {0}")]
    Body(String),
}

/// Status and body of a completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal POST-only HTTP client
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST `body` to `url` with the given headers
    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client, optionally with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialised
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.client.post(url).body(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                TransportError::Request(e.to_string())
            } else {
                TransportError::Send(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| TransportError::Body(e.to_string()))?;
        debug!("POST {} -> {} ({} bytes)", url, status, body.len());

        Ok(HttpResponse { status, body })
    }
}

/// Truncate a response body for diagnostics, on a character boundary
pub fn truncate_body(body: &str, limit: usize) -> String {
    match body.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
