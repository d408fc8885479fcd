//! API key extraction
//!
//! Pulls the caller's credential out of request headers and performs a
//! cheap local format check so malformed keys are rejected without a
//! round trip to the entitlement store.

use crate::config::AuthConfig;
use axum::http::HeaderMap;
use thiserror::Error;

/// Credential extraction failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// No `Authorization: Bearer` header and no API key header present
    #[error("Missing API key")]
    Missing,
    /// A credential was presented but does not match the expected shape
    #[error("Malformed API key")]
    Malformed,
}

impl CredentialError {
    /// Machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            CredentialError::Missing => "MISSING_CREDENTIAL",
            CredentialError::Malformed => "MALFORMED_CREDENTIAL",
        }
    }
}

/// Extracts and format-checks caller credentials
#[derive(Debug, Clone)]
pub struct KeyExtractor {
    prefix: String,
    suffix_len: usize,
    api_key_header: String,
}

impl KeyExtractor {
    pub fn new(auth: &AuthConfig) -> Self {
        Self {
            prefix: auth.key_prefix.clone(),
            suffix_len: auth.key_suffix_len,
            api_key_header: auth.api_key_header.clone(),
        }
    }

    /// Extract the credential from the request headers.
    ///
    /// `Authorization: Bearer <token>` wins over the dedicated API key
    /// header when both are present.
    pub fn extract(&self, headers: &HeaderMap) -> Result<String, CredentialError> {
        // An empty bearer counts as absent, so a dedicated header
        // alongside it still gets consulted
        let from_bearer = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let from_header = || {
            headers
                .get(self.api_key_header.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let presented = from_bearer
            .or_else(from_header)
            .ok_or(CredentialError::Missing)?;

        if !self.is_well_formed(presented) {
            return Err(CredentialError::Malformed);
        }

        Ok(presented.to_string())
    }

    /// Expected shape: fixed environment prefix + fixed-length
    /// alphanumeric suffix.
    fn is_well_formed(&self, key: &str) -> bool {
        let Some(suffix) = key.strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        suffix.len() == self.suffix_len && suffix.chars().all(|c| c.is_ascii_alphanumeric())
    }
}
