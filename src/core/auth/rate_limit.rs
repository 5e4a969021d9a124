// src/core/auth/rate_limit.rs

//! Per-remote-address sliding-window rate limiting, wired into the router
//! just after session validation. One mutex-guarded map; stale timestamps
//! are trimmed on every check rather than by a separate sweep, so the map
//! never grows past the number of distinct addresses seen within a window.

use crate::config::AuthConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Default)]
struct Window {
    timestamps: Vec<Instant>,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    window: Duration,
    max_requests: usize,
}

impl RateLimiter {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window: Duration::from_secs(config.rate_limit_window_secs),
            max_requests: config.rate_limit_max_requests,
        }
    }

    /// Returns `true` if `addr` is within its budget (and records this
    /// request), `false` if the request should be rejected with 429. Stale
    /// timestamps are trimmed on every check, always before releasing the
    /// lock, so the map never outgrows the number of addresses seen within
    /// the current window.
    pub async fn check(&self, addr: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows.entry(addr.to_string()).or_default();
        window.timestamps.retain(|t| now.duration_since(*t) < self.window);

        if window.timestamps.len() >= self.max_requests {
            false
        } else {
            window.timestamps.push(now);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig {
            rate_limit_window_secs: 60,
            rate_limit_max_requests: 100,
            ..AuthConfig::default()
        }
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(&test_config());
        for _ in 0..100 {
            assert!(limiter.check("10.0.0.1").await);
        }
        assert!(!limiter.check("10.0.0.1").await);
    }

    #[tokio::test]
    async fn separate_addresses_have_independent_budgets() {
        let limiter = RateLimiter::new(&test_config());
        for _ in 0..100 {
            assert!(limiter.check("10.0.0.1").await);
        }
        assert!(limiter.check("10.0.0.2").await);
    }

    #[tokio::test]
    async fn respects_a_smaller_configured_budget() {
        let limiter = RateLimiter::new(&AuthConfig {
            rate_limit_max_requests: 3,
            ..test_config()
        });
        assert!(limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);
    }
}
