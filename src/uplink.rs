//! # Uplink Publisher
//!
//! Publishes telemetry documents to the messaging endpoint with bearer
//! authentication.
//!
//! One call is one attempt: the token is freshened, the document is POSTed
//! and the result is classified. Failed uplinks are never retransmitted.

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::{TokenCache, TokenStatus};
use crate::http::{truncate_body, HttpTransport};
use crate::telemetry::TelemetryMessage;

/// Default diagnostic body length
pub const DEFAULT_BODY_LIMIT: usize = 256;

/// Result of one publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkOutcome {
    /// The endpoint accepted the document (2xx)
    Ok(u16),
    /// No usable bearer token; nothing was sent
    Unauthenticated,
    /// The endpoint refused the token (401/403); the token was invalidated
    Unauthorized(u16),
    /// Any other status
    Rejected(u16),
    /// No status line was obtained, or the document could not be encoded
    Transport(String),
}

impl UplinkOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, UplinkOutcome::Ok(_))
    }
}

/// Publisher owning the token cache and the shared transport
pub struct Publisher {
    transport: Arc<dyn HttpTransport>,
    tokens: TokenCache,
    endpoint_uri: String,
    body_limit: usize,
}

impl Publisher {
    /// Create a publisher; `tokens` must share `transport`
    pub fn new(transport: Arc<dyn HttpTransport>, tokens: TokenCache, endpoint_uri: &str) -> Self {
        Self {
            transport,
            tokens,
            endpoint_uri: endpoint_uri.to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Publish one document
    pub async fn publish(&mut self, message: &TelemetryMessage) -> UplinkOutcome {
        if self.tokens.ensure_fresh().await == TokenStatus::RefreshFailed {
            debug!("Continuing with previously issued token, if still valid");
        }

        let bearer = match self.tokens.bearer(Instant::now()) {
            Some(token) => format!("Bearer {}", token),
            None => {
                warn!("No valid bearer token, skipping uplink");
                return UplinkOutcome::Unauthenticated;
            }
        };

        let body = match message.to_json() {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode telemetry: {}", e);
                return UplinkOutcome::Transport(e.to_string());
            }
        };

        debug!("Publishing {} bytes to {}", body.len(), self.endpoint_uri);

        let result = self
            .transport
            .post(
                &self.endpoint_uri,
                &[("Authorization", bearer.as_str()), ("Content-Type", "application/json")],
                body,
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!("Uplink failed: {}", e);
                return UplinkOutcome::Transport(e.to_string());
            }
        };

        let status = response.status;
        if response.is_success() {
            info!("Telemetry published ({})", status);
            return UplinkOutcome::Ok(status);
        }

        let body = truncate_body(&response.body, self.body_limit);
        match status {
            401 | 403 => {
                warn!("Uplink refused token ({}): {}", status, body);
                self.tokens.invalidate();
                UplinkOutcome::Unauthorized(status)
            }
            _ => {
                warn!("Uplink rejected ({}): {}", status, body);
                UplinkOutcome::Rejected(status)
            }
        }
    }
}
