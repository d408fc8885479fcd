//! Entitlement store client
//!
//! The entitlement store is a remote service that owns entitlement,
//! credential, and usage-record persistence. The gateway consumes it
//! through two HTTP operations: `verify` (admission) and `track` (usage
//! metering). Quota arithmetic lives entirely on the store side as an
//! atomic increment-if-under-limit; the gateway never read-modify-writes
//! the counter.

use crate::config::StoreConfig;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Entitlement store call failure
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure (connect, DNS, timeout, body decode)
    #[error("entitlement store request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The store answered with a non-success status
    #[error("entitlement store returned status {0}")]
    Status(StatusCode),
}

/// Input to the verify operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub api_key: String,
    pub service_id: String,
    pub endpoint: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Store-side admission decision for one credential/service pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub allowed: bool,
    #[serde(default)]
    pub entitlement_id: Option<String>,
    #[serde(default)]
    pub quota_remaining: Option<i64>,
    #[serde(default)]
    pub quota_limit: Option<i64>,
    #[serde(default)]
    pub rate_limit_remaining: Option<i64>,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// One completed, admitted call reported back to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub entitlement_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    /// Upstream response latency in milliseconds
    pub response_time: u64,
    pub bytes_transferred: u64,
}

/// Acknowledgement of a track call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// HTTP client for the entitlement store, shared by the admission
/// validator and the usage tracker.
#[derive(Debug, Clone)]
pub struct EntitlementClient {
    http: reqwest::Client,
    verify_url: String,
    track_url: String,
    verify_timeout: Duration,
    track_timeout: Duration,
}

impl EntitlementClient {
    pub fn new(config: &StoreConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            verify_url: config.verify_url.clone(),
            track_url: config.track_url.clone(),
            verify_timeout: Duration::from_millis(config.timeout_ms),
            track_timeout: Duration::from_millis(config.track_timeout_ms),
        })
    }

    /// Ask the store whether a call may proceed.
    pub async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, StoreError> {
        let response = self
            .http
            .post(&self.verify_url)
            .timeout(self.verify_timeout)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }

        Ok(response.json::<VerifyResponse>().await?)
    }

    /// Report a completed, admitted call so the quota counter advances.
    pub async fn track(&self, request: &TrackRequest) -> Result<TrackResponse, StoreError> {
        let response = self
            .http
            .post(&self.track_url)
            .timeout(self.track_timeout)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }

        Ok(response.json::<TrackResponse>().await?)
    }
}
