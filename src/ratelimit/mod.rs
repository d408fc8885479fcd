//! Per-credential fixed-window rate limiting
//!
//! The configuration surface declares a rate-limit window and maximum; this
//! module enforces them with a fixed window per credential, held
//! in-process. Counts are per gateway instance and reset when the window
//! rolls over. Quota correctness never depends on this limiter; the
//! entitlement store's atomic counter remains authoritative.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateVerdict {
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
}

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window limiter keyed by credential
pub struct FixedWindowLimiter {
    window: Duration,
    max_requests: u32,
    slots: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request against the credential's current window.
    pub fn check(&self, credential: &str) -> RateVerdict {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        // Drop rolled-over windows instead of letting the map grow one
        // entry per distinct credential ever seen; the format check is
        // local-only, so unauthenticated callers can cycle well-formed
        // keys at will
        slots.retain(|_, window| now.duration_since(window.started) < self.window);

        let window = slots.entry(credential.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if window.count >= self.max_requests {
            return RateVerdict {
                allowed: false,
                remaining: 0,
            };
        }

        window.count += 1;
        RateVerdict {
            allowed: true,
            remaining: self.max_requests - window.count,
        }
    }

    /// Number of credentials currently holding a live window
    pub fn tracked_credentials(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
