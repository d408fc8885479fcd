//! Usage tracking
//!
//! Reports completed, admitted calls back to the entitlement store so the
//! quota counter advances. Tracking is dispatched as an independent task
//! after the response has been determined and is never awaited on the
//! response path. A tracking failure is logged and dropped: best-effort,
//! not at-least-once, and never revises the response already sent.

use crate::metrics::GatewayMetrics;
use crate::store::{EntitlementClient, TrackRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The immutable fact describing one admitted, completed call
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub entitlement_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time: Duration,
    pub bytes_transferred: u64,
}

/// Fire-and-forget reporter of usage facts
#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<EntitlementClient>,
    metrics: Arc<GatewayMetrics>,
}

impl UsageTracker {
    pub fn new(store: Arc<EntitlementClient>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Spawn the track call and return immediately. The spawned task owns
    /// its own timeout (configured on the store client) and shares nothing
    /// with the request that produced the event.
    pub fn dispatch(&self, event: UsageEvent) {
        let store = self.store.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let request = TrackRequest {
                entitlement_id: event.entitlement_id.clone(),
                endpoint: event.endpoint,
                method: event.method,
                status_code: event.status_code,
                response_time: event.response_time.as_millis() as u64,
                bytes_transferred: event.bytes_transferred,
            };

            match store.track(&request).await {
                Ok(ack) if ack.success => {
                    debug!(
                        entitlement_id = %event.entitlement_id,
                        status = event.status_code,
                        "usage tracked"
                    );
                }
                Ok(ack) => {
                    warn!(
                        entitlement_id = %event.entitlement_id,
                        error = ack.error.as_deref().unwrap_or("unknown"),
                        "usage tracking rejected by store, dropping"
                    );
                    metrics.record_track_failure();
                }
                Err(e) => {
                    warn!(
                        entitlement_id = %event.entitlement_id,
                        error = %e,
                        "usage tracking failed, dropping"
                    );
                    metrics.record_track_failure();
                }
            }
        });
    }
}
