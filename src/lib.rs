//! Metergate - An entitlement-gated API gateway
//!
//! Metergate sits in front of a provider's upstream service and:
//! - Extracts and format-checks caller API keys
//! - Validates each request against a purchased entitlement (quota,
//!   validity window, active flag) via a remote entitlement store
//! - Forwards admitted requests to the configured upstream
//! - Meters consumption off the response path (fire-and-forget tracking)
//! - Exposes Prometheus metrics and a health endpoint

pub mod admission;
pub mod config;
pub mod extract;
pub mod forward;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod ratelimit;
pub mod store;
pub mod track;

pub use config::GatewayConfig;
pub use pipeline::{GatewayPipeline, GatewayState};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
