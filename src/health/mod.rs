//! Health check module

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Health checker service
#[derive(Clone)]
pub struct HealthChecker {
    start_time: Instant,
    ready: Arc<AtomicBool>,
    version: String,
}

impl HealthChecker {
    /// Starts not ready; callers flip `set_ready` once wiring succeeds
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Liveness: healthy whenever the process is running
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            version: self.version.clone(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Readiness: reflects the ready flag
    pub fn readiness(&self) -> HealthResponse {
        let status = if self.ready.load(Ordering::Relaxed) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        HealthResponse {
            status,
            version: self.version.clone(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness() {
        let checker = HealthChecker::new();
        let health = checker.liveness();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(!health.version.is_empty());
    }

    #[test]
    fn test_readiness_starts_unhealthy_and_toggles() {
        let checker = HealthChecker::new();
        assert_eq!(checker.readiness().status, HealthStatus::Unhealthy);

        checker.set_ready(true);
        assert_eq!(checker.readiness().status, HealthStatus::Healthy);

        checker.set_ready(false);
        assert_eq!(checker.readiness().status, HealthStatus::Unhealthy);
    }
}
