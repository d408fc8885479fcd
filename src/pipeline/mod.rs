//! Gateway pipeline
//!
//! Per-request orchestration: extract the API key, validate admission
//! against the entitlement store, forward admitted requests upstream,
//! dispatch usage tracking off the response path, and synthesize deny
//! responses. Every response (allow and deny) carries quota and rate-limit
//! headers derived from the last known admission decision.
//!
//! The pipeline is exposed two ways: as an axum handler suitable for
//! embedding in a host router (`gateway_handler` + `Router::fallback`),
//! and as a standalone listener (`serve`).

use crate::admission::{AdmissionDecision, AdmissionValidator, DenyReason};
use crate::config::GatewayConfig;
use crate::extract::KeyExtractor;
use crate::forward::{is_hop_by_hop_header, UpstreamForwarder};
use crate::health::{HealthChecker, HealthStatus};
use crate::metrics::GatewayMetrics;
use crate::ratelimit::FixedWindowLimiter;
use crate::store::EntitlementClient;
use crate::track::{UsageEvent, UsageTracker};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_QUOTA_REMAINING: &str = "x-quota-remaining";
const HEADER_QUOTA_LIMIT: &str = "x-quota-limit";
const HEADER_RESPONSE_TIME: &str = "x-response-time";

/// The request pipeline: extract -> validate -> forward -> track
pub struct GatewayPipeline {
    extractor: KeyExtractor,
    validator: AdmissionValidator,
    forwarder: UpstreamForwarder,
    tracker: UsageTracker,
    limiter: Option<FixedWindowLimiter>,
    metrics: Arc<GatewayMetrics>,
}

impl GatewayPipeline {
    pub fn from_config(
        config: &GatewayConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(EntitlementClient::new(&config.store)?);

        let limiter = if config.rate_limit.enabled {
            Some(FixedWindowLimiter::new(
                Duration::from_secs(config.rate_limit.window_secs),
                config.rate_limit.max_requests,
            ))
        } else {
            None
        };

        Ok(Self {
            extractor: KeyExtractor::new(&config.auth),
            validator: AdmissionValidator::new(
                store.clone(),
                config.upstream.service_id.clone(),
                config.store.fail_open,
            ),
            forwarder: UpstreamForwarder::new(
                &config.upstream.base_url,
                Duration::from_secs(config.upstream.timeout_secs),
            )?,
            tracker: UsageTracker::new(store, metrics.clone()),
            limiter,
            metrics,
        })
    }

    /// Run one request through the pipeline to a final response. All
    /// failures resolve locally into a synthesized response; nothing is
    /// re-thrown to the caller.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string());
        let user_agent = req
            .headers()
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // Key extraction: local only, no network
        let credential = match self.extractor.extract(req.headers()) {
            Ok(key) => key,
            Err(e) => {
                let reason = DenyReason::from(e);
                return self.deny(reason, None, &method, &path, start);
            }
        };

        // In-process fixed-window rate limit, checked before the verify
        // round trip so hot callers don't hammer the store
        let rate_remaining = match &self.limiter {
            Some(limiter) => {
                let verdict = limiter.check(&credential);
                if !verdict.allowed {
                    return self.deny(DenyReason::RateLimited, None, &method, &path, start);
                }
                Some(i64::from(verdict.remaining))
            }
            None => None,
        };

        // Admission: one verify round trip, fail-closed on store trouble
        let mut decision = self
            .validator
            .validate(&credential, &path, &method, client_ip.clone(), user_agent)
            .await;
        if rate_remaining.is_some() {
            decision.rate_limit_remaining = rate_remaining;
        }

        if !decision.allowed {
            let reason = decision.deny_reason.unwrap_or(DenyReason::ValidationError);
            return self.deny(reason, Some(&decision), &method, &path, start);
        }

        // Forward to the upstream. A transport failure is gateway-origin
        // and never billable; an upstream 4xx/5xx is a forwarded call.
        let outcome = match self
            .forwarder
            .forward(req, &credential, client_ip.as_deref())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(method = %method, path = %path, error = %e, "upstream forward failed");
                return self.deny(DenyReason::UpstreamError, Some(&decision), &method, &path, start);
            }
        };

        // Dispatch tracking and return without waiting for it
        match &decision.entitlement_id {
            Some(entitlement_id) => {
                self.tracker.dispatch(UsageEvent {
                    entitlement_id: entitlement_id.clone(),
                    endpoint: path.clone(),
                    method: method.clone(),
                    status_code: outcome.status.as_u16(),
                    response_time: outcome.elapsed,
                    bytes_transferred: outcome.body.len() as u64,
                });
            }
            None => {
                // Fail-open admissions resolve no entitlement to bill
                debug!(path = %path, "no entitlement id resolved, skipping usage tracking");
            }
        }

        self.metrics
            .record_request(&method, &path, outcome.status.as_u16(), start.elapsed());

        let mut builder = Response::builder().status(outcome.status);
        if let Some(headers) = builder.headers_mut() {
            for (key, value) in outcome.headers.iter() {
                if !is_hop_by_hop_header(key.as_str()) {
                    headers.insert(key.clone(), value.clone());
                }
            }
        }
        let mut response = builder
            .body(Body::from(outcome.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());

        apply_entitlement_headers(response.headers_mut(), Some(&decision));
        if let Ok(value) = format!("{}ms", outcome.elapsed.as_millis()).parse() {
            response
                .headers_mut()
                .insert(HEADER_RESPONSE_TIME, value);
        }

        response
    }

    /// Synthesize a deny (or gateway-origin error) response
    fn deny(
        &self,
        reason: DenyReason,
        decision: Option<&AdmissionDecision>,
        method: &str,
        path: &str,
        start: Instant,
    ) -> Response<Body> {
        let status = reason.status();
        // Upstream transport failures are gateway-origin errors, not
        // admission denials
        if reason != DenyReason::UpstreamError {
            self.metrics.record_denial(reason.code());
        }
        self.metrics
            .record_request(method, path, status.as_u16(), start.elapsed());

        let mut body = serde_json::json!({
            "error": reason.message(),
            "errorCode": reason.code(),
        });
        if let Some(decision) = decision {
            if let Some(remaining) = decision.quota_remaining {
                body["quotaRemaining"] = remaining.into();
            }
            if let Some(limit) = decision.quota_limit {
                body["quotaLimit"] = limit.into();
            }
        }

        let mut response = (status, Json(body)).into_response();
        apply_entitlement_headers(response.headers_mut(), decision);
        response
    }
}

/// Attach the quota/rate headers every gateway response carries. Unknown
/// values report zero so callers always see the three headers.
fn apply_entitlement_headers(
    headers: &mut axum::http::HeaderMap,
    decision: Option<&AdmissionDecision>,
) {
    let rate = decision.and_then(|d| d.rate_limit_remaining).unwrap_or(0);
    let quota = decision.and_then(|d| d.quota_remaining).unwrap_or(0);
    let limit = decision.and_then(|d| d.quota_limit).unwrap_or(0);

    for (name, value) in [
        (HEADER_RATE_LIMIT_REMAINING, rate),
        (HEADER_QUOTA_REMAINING, quota),
        (HEADER_QUOTA_LIMIT, limit),
    ] {
        if let Ok(value) = value.to_string().parse() {
            headers.insert(name, value);
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<GatewayPipeline>,
    pub metrics: Arc<GatewayMetrics>,
    pub health: Arc<HealthChecker>,
    pub config: GatewayConfig,
}

impl GatewayState {
    pub fn from_config(config: GatewayConfig) -> anyhow::Result<Self> {
        let metrics = Arc::new(GatewayMetrics::new());
        let health = Arc::new(HealthChecker::new());
        let pipeline = Arc::new(GatewayPipeline::from_config(&config, metrics.clone())?);
        // Pipeline construction succeeded: store client, forwarder, and
        // limiter are all wired
        health.set_ready(true);
        Ok(Self {
            pipeline,
            metrics,
            health,
            config,
        })
    }
}

/// Gateway handler - runs the pipeline on every unmatched request.
/// Hosts embedding the gateway can mount this as their router's fallback.
pub async fn gateway_handler(
    State(state): State<GatewayState>,
    req: Request<Body>,
) -> Response<Body> {
    state.pipeline.handle(req).await
}

/// Health check handler (liveness)
async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health.liveness()))
}

/// Readiness handler: 503 until the pipeline is wired
async fn readiness_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let health = state.health.readiness();
    let status = if health.status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

/// Metrics handler
async fn metrics_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.prometheus_output())
}

/// Build the full application router: health and metrics endpoints plus
/// the pipeline as the fallback for everything else.
pub fn app(state: GatewayState) -> Router {
    let mut router = Router::new();
    if state.config.health.enabled {
        let ready_path = format!("{}/ready", state.config.health.path.trim_end_matches('/'));
        router = router
            .route(&state.config.health.path, get(health_handler))
            .route(&ready_path, get(readiness_handler));
    }
    if state.config.metrics.enabled {
        router = router.route(&state.config.metrics.path, get(metrics_handler));
    }
    router
        .fallback(gateway_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the gateway as a standalone listener
pub async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    let state = GatewayState::from_config(config.clone())?;
    let router = app(state);

    let addr: SocketAddr = config.server_addr().parse()?;
    info!("Starting gateway server on {}", addr);
    info!("Forwarding to upstream {}", config.upstream.base_url);
    info!("Service id: {}", config.upstream.service_id);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
