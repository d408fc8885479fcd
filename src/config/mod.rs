//! Configuration module for the gateway service
//!
//! This module handles loading and parsing configuration from TOML files.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout: default_timeout(),
        }
    }
}

/// Upstream (provider service) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL the gateway forwards admitted requests to
    #[serde(default)]
    pub base_url: String,
    /// Service identifier presented to the entitlement store on verify
    #[serde(default)]
    pub service_id: String,
    /// Forwarding timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Entitlement store configuration
///
/// The store is a remote service consumed through two HTTP operations:
/// `verify` (admission) and `track` (usage metering). The store owns the
/// quota counter; the gateway never mutates it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Full URL of the verify operation
    #[serde(default)]
    pub verify_url: String,
    /// Full URL of the track operation
    #[serde(default)]
    pub track_url: String,
    /// Timeout for verify calls, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    /// Timeout for track calls, in milliseconds (short, off the hot path)
    #[serde(default = "default_track_timeout_ms")]
    pub track_timeout_ms: u64,
    /// Allow requests through when the store is unreachable.
    ///
    /// Default is false (fail closed): a store outage denies with
    /// `VALIDATION_ERROR` rather than granting unlimited access. Operators
    /// who prioritize availability over strict quota correctness can flip
    /// this consciously.
    #[serde(default)]
    pub fail_open: bool,
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_track_timeout_ms() -> u64 {
    2000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            verify_url: String::new(),
            track_url: String::new(),
            timeout_ms: default_store_timeout_ms(),
            track_timeout_ms: default_track_timeout_ms(),
            fail_open: false,
        }
    }
}

/// API key extraction and format configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected environment prefix (e.g. "mk_live_")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Expected length of the random suffix after the prefix
    #[serde(default = "default_key_suffix_len")]
    pub key_suffix_len: usize,
    /// Dedicated API key header, checked after `Authorization: Bearer`
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

fn default_key_prefix() -> String {
    "mk_live_".to_string()
}

fn default_key_suffix_len() -> usize {
    32
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            key_suffix_len: default_key_suffix_len(),
            api_key_header: default_api_key_header(),
        }
    }
}

/// Per-credential fixed-window rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether the in-process rate limiter is enabled
    #[serde(default)]
    pub enabled: bool,
    /// Window length in seconds
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
    /// Maximum requests per credential per window
    #[serde(default = "default_rate_max")]
    pub max_requests: u32,
}

fn default_rate_window() -> u64 {
    60
}

fn default_rate_max() -> u32 {
    100
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_secs: default_rate_window(),
            max_requests: default_rate_max(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path to expose metrics
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Whether health check is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path for health check endpoint
    #[serde(default = "default_health_path")]
    pub path: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_health_path(),
        }
    }
}

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Entitlement store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// API key format configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Rate limit configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Health check configuration
    #[serde(default)]
    pub health: HealthConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.base_url.is_empty() {
            anyhow::bail!("upstream.base_url must be set");
        }
        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "upstream.base_url '{}' must be an http(s) URL",
                self.upstream.base_url
            );
        }
        if self.upstream.service_id.is_empty() {
            anyhow::bail!("upstream.service_id must be set");
        }
        if self.store.verify_url.is_empty() {
            anyhow::bail!("store.verify_url must be set");
        }
        if self.store.track_url.is_empty() {
            anyhow::bail!("store.track_url must be set");
        }
        if self.auth.key_suffix_len == 0 {
            anyhow::bail!("auth.key_suffix_len must be greater than zero");
        }
        if self.rate_limit.enabled {
            if self.rate_limit.window_secs == 0 {
                anyhow::bail!("rate_limit.window_secs must be greater than zero");
            }
            if self.rate_limit.max_requests == 0 {
                anyhow::bail!("rate_limit.max_requests must be greater than zero");
            }
        }
        Ok(())
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
