//! # Token Cache
//!
//! Holds the bearer token used by the uplink and renews it through the
//! OAuth 2.0 client-credentials flow.
//!
//! ## Renewal Rule
//!
//! The token is renewed when the cache is empty or when
//! `now >= expiry_deadline - renewal_margin`. The margin defaults to 60 s so
//! a token is never presented in its final minute.
//!
//! A failed renewal leaves the previous token in place: it may still be
//! within its nominal validity, and the uplink falls back to it. The cache
//! never retries on its own; the next publish attempt renews again.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::config::AuthCredentials;
use crate::http::{truncate_body, HttpTransport, TransportError};

/// Default lead time before expiry at which the token is renewed
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(60);

/// Default diagnostic body length
const DEFAULT_BODY_LIMIT: usize = 256;

/// Why a token renewal produced no token
#[derive(Debug, Error)]
pub enum RenewalError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("status {status} with unusable body ({reason}): {body}")]
    Body {
        status: u16,
        reason: String,
        body: String,
    },
}

/// Outcome of [`TokenCache::ensure_fresh`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// The cached token is fresh, either already or after renewal
    Ok,
    /// Renewal was needed and failed; the previous token (if any) is kept
    RefreshFailed,
}

/// A bearer token and its absolute expiry on the monotonic clock
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub expiry_deadline: Instant,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &format_args!("<{} chars>", self.value.len()))
            .field("expiry_deadline", &self.expiry_deadline)
            .finish()
    }
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Bearer token cache
pub struct TokenCache {
    transport: Arc<dyn HttpTransport>,
    credentials: AuthCredentials,
    renewal_margin: Duration,
    body_limit: usize,
    token: Option<Token>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("credentials", &self.credentials)
            .field("renewal_margin", &self.renewal_margin)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    /// Create an empty cache
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: AuthCredentials) -> Self {
        Self {
            transport,
            credentials,
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
            body_limit: DEFAULT_BODY_LIMIT,
            token: None,
        }
    }

    /// Override the renewal margin
    pub fn with_renewal_margin(mut self, margin: Duration) -> Self {
        self.renewal_margin = margin;
        self
    }

    /// Override the diagnostic body length
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Whether a renewal is due at `now`
    pub fn needs_renewal(&self, now: Instant) -> bool {
        match &self.token {
            None => true,
            Some(token) => {
                let renew_at = token
                    .expiry_deadline
                    .checked_sub(self.renewal_margin)
                    .unwrap_or(token.expiry_deadline);
                now >= renew_at || now >= token.expiry_deadline
            }
        }
    }

    /// Renew the token if it is missing or close to expiry
    pub async fn ensure_fresh(&mut self) -> TokenStatus {
        if !self.needs_renewal(Instant::now()) {
            return TokenStatus::Ok;
        }

        info!("Requesting new bearer token");
        match self.renew().await {
            Ok(token) => {
                info!(
                    "Bearer token obtained ({} chars, valid for {}s)",
                    token.value.len(),
                    token.expiry_deadline.saturating_duration_since(Instant::now()).as_secs()
                );
                self.token = Some(token);
                TokenStatus::Ok
            }
            Err(reason) => {
                warn!("Token refresh failed: {}", reason);
                TokenStatus::RefreshFailed
            }
        }
    }

    /// One client-credentials exchange
    pub(crate) async fn renew(&self) -> Result<Token, RenewalError> {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("client_secret", &self.credentials.client_secret)
            .append_pair("resource", &self.credentials.resource)
            .finish();

        let response = self
            .transport
            .post(
                &self.credentials.token_endpoint_uri,
                &[("Content-Type", "application/x-www-form-urlencoded")],
                body.into_bytes(),
            )
            .await?;

        let now = Instant::now();
        let status = response.status;

        if !response.is_success() {
            return Err(RenewalError::Status {
                status,
                body: truncate_body(&response.body, self.body_limit),
            });
        }

        let unusable = |reason: String| RenewalError::Body {
            status,
            reason,
            body: truncate_body(&response.body, self.body_limit),
        };

        let parsed: TokenResponse =
            serde_json::from_str(&response.body).map_err(|e| unusable(e.to_string()))?;

        if parsed.access_token.is_empty() {
            return Err(unusable("empty access_token".to_string()));
        }
        if parsed.expires_in == 0 {
            return Err(unusable("expires_in of 0".to_string()));
        }

        debug!("Token endpoint answered {} (expires_in={})", status, parsed.expires_in);

        Ok(Token {
            value: parsed.access_token,
            expiry_deadline: now + Duration::from_millis(parsed.expires_in.saturating_mul(1000)),
        })
    }

    /// Token usable as a bearer at `now`: present and not past its deadline
    pub fn bearer(&self, now: Instant) -> Option<&str> {
        self.token
            .as_ref()
            .filter(|token| now < token.expiry_deadline)
            .map(|token| token.value.as_str())
    }

    /// Current token, usable or not
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    /// Drop the cached token so the next call renews
    pub fn invalidate(&mut self) {
        if self.token.take().is_some() {
            debug!("Bearer token invalidated");
        }
    }
}
