//! Client side of the signing boundary
//!
//! The pipeline depends only on [`SponsorClient`]. In-process deployments
//! hand it the coordinator directly; remote ones use [`HttpSponsorClient`].

use super::wire::{CosignError, CosignErrorCode, SignedPayload, SigningRequest, SigningResponse};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SponsorError {
    /// The sponsor answered with a typed rejection
    #[error("Sponsor rejected request: {0}")]
    Rejected(CosignError),

    /// The sponsor could not be reached
    #[error("Sponsor transport error: {0}")]
    Transport(String),

    #[error("Invalid sponsor response: {0}")]
    InvalidResponse(String),
}

impl SponsorError {
    pub fn code(&self) -> Option<CosignErrorCode> {
        match self {
            SponsorError::Rejected(err) => Some(err.code),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SponsorError::Rejected(err) => err.code.is_retryable(),
            SponsorError::Transport(_) => true,
            SponsorError::InvalidResponse(_) => false,
        }
    }
}

impl From<CosignError> for SponsorError {
    fn from(err: CosignError) -> Self {
        SponsorError::Rejected(err)
    }
}

#[async_trait]
pub trait SponsorClient: Send + Sync {
    /// Ask the sponsor to validate and co-sign
    async fn cosign(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError>;

    /// Co-sign, then let the sponsor submit. The payload carries a
    /// submission identifier only when the sponsor's submission succeeded.
    async fn cosign_and_submit(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError>;
}

/// JSON-over-HTTP sponsor client
pub struct HttpSponsorClient {
    http: Client,
    base_url: String,
}

impl HttpSponsorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SponsorError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| SponsorError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, request), fields(base_url = %self.base_url))]
    async fn post(&self, path: &str, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| SponsorError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SponsorError::Transport(e.to_string()))?;
        debug!(%status, bytes = body.len(), "Sponsor responded");

        // Rejections carry a typed body regardless of the HTTP status
        match serde_json::from_str::<SigningResponse>(&body) {
            Ok(parsed) => parsed.into_result().map_err(SponsorError::Rejected),
            Err(_) if status == StatusCode::TOO_MANY_REQUESTS => Err(SponsorError::Rejected(
                CosignError::rate_limited("sponsor returned HTTP 429"),
            )),
            Err(_) if status.is_server_error() => {
                warn!(%status, "Sponsor server error");
                Err(SponsorError::Transport(format!("sponsor returned HTTP {status}")))
            }
            Err(e) => Err(SponsorError::InvalidResponse(format!(
                "HTTP {status}: {e}"
            ))),
        }
    }
}

#[async_trait]
impl SponsorClient for HttpSponsorClient {
    async fn cosign(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        self.post("/v1/cosign", request).await
    }

    async fn cosign_and_submit(&self, request: &SigningRequest) -> Result<SignedPayload, SponsorError> {
        self.post("/v1/cosign-and-submit", request).await
    }
}

impl std::fmt::Debug for HttpSponsorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSponsorClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
