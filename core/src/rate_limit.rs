//! Client-side throttling driven by server rate-limit headers.
//!
//! # Design
//! The limiter owns three fields behind one async mutex. `update` copies
//! values from response headers; `wait_if_needed` gates the next call.
//! The lock is released before sleeping, so concurrent waiters each compute
//! their own deadline and `update` is never blocked by a sleeping caller.
//! Dropping a `wait_if_needed` future cancels the wait.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::http::Headers;

pub const LIMIT_HEADER: &str = "X-Ratelimit-Allowed";
pub const AVAILABLE_HEADER: &str = "X-Ratelimit-Available";
pub const USED_HEADER: &str = "X-Ratelimit-Used";
pub const EXPIRY_HEADER: &str = "X-Ratelimit-Expiry";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub reset_at: Option<SystemTime>,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    state: Mutex<RateLimitState>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> RateLimitState {
        *self.state.lock().await
    }

    /// Refresh state from the headers of a response.
    pub async fn update(&self, headers: &Headers) {
        let mut state = self.state.lock().await;

        if let Some(limit) = headers.int(LIMIT_HEADER) {
            state.limit = Some(limit);
        }
        if let Some(available) = headers.int(AVAILABLE_HEADER) {
            state.remaining = Some(available.max(0));
        } else if let (Some(limit), Some(used)) = (state.limit, headers.int(USED_HEADER)) {
            state.remaining = Some((limit - used).max(0));
        }
        if let Some(expiry_ms) = headers.int(EXPIRY_HEADER) {
            state.reset_at = u64::try_from(expiry_ms)
                .ok()
                .map(|ms| UNIX_EPOCH + Duration::from_millis(ms));
        }

        debug!(
            limit = ?state.limit,
            remaining = ?state.remaining,
            "Rate limit updated."
        );
    }

    /// Suspend until the reset deadline when the quota is exhausted, then
    /// take one unit of the remaining quota.
    pub async fn wait_if_needed(&self) {
        let delay = {
            let mut state = self.state.lock().await;
            let now = SystemTime::now();
            if let Some(reset_at) = state.reset_at {
                if now >= reset_at && state.limit.is_some() {
                    state.remaining = state.limit;
                }
            }
            match (state.remaining, state.reset_at) {
                (Some(remaining), Some(reset_at)) if remaining <= 0 => {
                    reset_at.duration_since(now).ok()
                }
                _ => None,
            }
        };

        if let Some(delay) = delay {
            info!(delay_ms = delay.as_millis() as u64, "Rate limit exhausted, waiting for reset.");
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if let Some(remaining) = state.remaining.filter(|r| *r > 0) {
            state.remaining = Some(remaining - 1);
        }
    }
}
