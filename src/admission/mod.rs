//! Admission control
//!
//! Maps the entitlement store's verify reply into a request-scoped
//! `AdmissionDecision`. The store evaluates the ordered policy (unknown
//! key, inactive, expired, quota) and answers with a reason code; this
//! module owns the gateway-side taxonomy, HTTP status mapping, and the
//! fail-closed behavior when the store is unreachable or talks nonsense.

use crate::extract::CredentialError;
use crate::store::{EntitlementClient, StoreError, VerifyRequest, VerifyResponse};
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::warn;

/// Why a request was denied (or failed past admission)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingCredential,
    MalformedCredential,
    EntitlementNotFound,
    EntitlementInactive,
    EntitlementExpired,
    QuotaExceeded,
    RateLimited,
    ValidationError,
    UpstreamError,
}

impl DenyReason {
    /// Machine-readable code carried in deny responses
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::MissingCredential => "MISSING_CREDENTIAL",
            DenyReason::MalformedCredential => "MALFORMED_CREDENTIAL",
            DenyReason::EntitlementNotFound => "ENTITLEMENT_NOT_FOUND",
            DenyReason::EntitlementInactive => "ENTITLEMENT_INACTIVE",
            DenyReason::EntitlementExpired => "ENTITLEMENT_EXPIRED",
            DenyReason::QuotaExceeded => "QUOTA_EXCEEDED",
            DenyReason::RateLimited => "RATE_LIMITED",
            DenyReason::ValidationError => "VALIDATION_ERROR",
            DenyReason::UpstreamError => "UPSTREAM_ERROR",
        }
    }

    /// HTTP status for the synthesized response
    pub fn status(&self) -> StatusCode {
        match self {
            DenyReason::MissingCredential
            | DenyReason::MalformedCredential
            | DenyReason::EntitlementNotFound => StatusCode::UNAUTHORIZED,
            DenyReason::EntitlementInactive
            | DenyReason::EntitlementExpired
            | DenyReason::QuotaExceeded
            | DenyReason::ValidationError => StatusCode::FORBIDDEN,
            DenyReason::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            DenyReason::UpstreamError => StatusCode::BAD_GATEWAY,
        }
    }

    /// Human-readable message for the response body
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::MissingCredential => "Missing API key",
            DenyReason::MalformedCredential => "Malformed API key",
            DenyReason::EntitlementNotFound => "No entitlement found for this API key",
            DenyReason::EntitlementInactive => "Entitlement is inactive",
            DenyReason::EntitlementExpired => "Entitlement has expired",
            DenyReason::QuotaExceeded => "Quota exhausted for this billing window",
            DenyReason::RateLimited => "Rate limit exceeded",
            DenyReason::ValidationError => "Unable to validate API key",
            DenyReason::UpstreamError => "Upstream service unavailable",
        }
    }

    /// Parse a store-provided reason code
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "ENTITLEMENT_NOT_FOUND" => Some(DenyReason::EntitlementNotFound),
            "ENTITLEMENT_INACTIVE" => Some(DenyReason::EntitlementInactive),
            "ENTITLEMENT_EXPIRED" => Some(DenyReason::EntitlementExpired),
            "QUOTA_EXCEEDED" => Some(DenyReason::QuotaExceeded),
            "RATE_LIMITED" => Some(DenyReason::RateLimited),
            _ => None,
        }
    }
}

impl From<CredentialError> for DenyReason {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Missing => DenyReason::MissingCredential,
            CredentialError::Malformed => DenyReason::MalformedCredential,
        }
    }
}

/// Transient, request-scoped admission result. Never persisted.
#[derive(Debug, Clone)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub entitlement_id: Option<String>,
    pub quota_remaining: Option<i64>,
    pub quota_limit: Option<i64>,
    pub rate_limit_remaining: Option<i64>,
    pub deny_reason: Option<DenyReason>,
}

impl AdmissionDecision {
    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            entitlement_id: None,
            quota_remaining: None,
            quota_limit: None,
            rate_limit_remaining: None,
            deny_reason: Some(reason),
        }
    }
}

/// Validates requests against the entitlement store
#[derive(Debug, Clone)]
pub struct AdmissionValidator {
    store: Arc<EntitlementClient>,
    service_id: String,
    fail_open: bool,
}

impl AdmissionValidator {
    pub fn new(store: Arc<EntitlementClient>, service_id: String, fail_open: bool) -> Self {
        Self {
            store,
            service_id,
            fail_open,
        }
    }

    /// One verify round trip, mapped into a decision. Store outages and
    /// malformed replies deny with `VALIDATION_ERROR` unless fail-open is
    /// configured.
    pub async fn validate(
        &self,
        credential: &str,
        endpoint: &str,
        method: &str,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> AdmissionDecision {
        let request = VerifyRequest {
            api_key: credential.to_string(),
            service_id: self.service_id.clone(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            client_ip,
            user_agent,
        };

        match self.store.verify(&request).await {
            Ok(response) => map_verify_response(response),
            Err(err) => self.on_store_failure(err),
        }
    }

    fn on_store_failure(&self, err: StoreError) -> AdmissionDecision {
        if self.fail_open {
            warn!(error = %err, "entitlement store unreachable, allowing request (fail-open)");
            AdmissionDecision {
                allowed: true,
                entitlement_id: None,
                quota_remaining: None,
                quota_limit: None,
                rate_limit_remaining: None,
                deny_reason: None,
            }
        } else {
            warn!(error = %err, "entitlement store unreachable, denying request (fail-closed)");
            AdmissionDecision::deny(DenyReason::ValidationError)
        }
    }
}

/// Map the store's verify reply. An allowed reply without quota numbers is
/// still an allow; a denied reply with an unrecognized (or absent) code is
/// treated as a validation error rather than trusted blindly.
fn map_verify_response(response: VerifyResponse) -> AdmissionDecision {
    if response.allowed {
        return AdmissionDecision {
            allowed: true,
            entitlement_id: response.entitlement_id,
            quota_remaining: response.quota_remaining,
            quota_limit: response.quota_limit,
            rate_limit_remaining: response.rate_limit_remaining,
            deny_reason: None,
        };
    }

    let reason = response
        .error_code
        .as_deref()
        .and_then(DenyReason::from_code)
        .unwrap_or(DenyReason::ValidationError);

    AdmissionDecision {
        allowed: false,
        entitlement_id: response.entitlement_id,
        quota_remaining: response.quota_remaining,
        quota_limit: response.quota_limit,
        rate_limit_remaining: response.rate_limit_remaining,
        deny_reason: Some(reason),
    }
}
