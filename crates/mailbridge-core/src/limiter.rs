//! HTTP-facing token buckets.
//!
//! Fixed one-minute windows per client key. A check returns the header
//! values the HTTP collaborator emits (`X-RateLimit-Limit`, `-Remaining`,
//! `-Reset`) and, on denial, the `Retry-After` seconds. The email-ops
//! limiter's denials are bridged into the admission queues' cooldown by
//! the service layer.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::time::{Duration, Instant};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Window limit.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Seconds until the window resets.
    pub reset_secs: u64,
    /// `Retry-After` seconds; present only on denial.
    pub retry_after: Option<u64>,
}

impl Decision {
    /// The three rate-limit headers every limited endpoint emits.
    #[must_use]
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_secs.to_string()),
        ]
    }
}

struct Window {
    started: Instant,
    count: u32,
}

/// A fixed-window rate limiter keyed by client identity.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` requests per `window`.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request for `key` and decides whether it may proceed.
    pub fn check(&self, key: &str) -> Decision {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // Opportunistic cleanup keeps the map bounded by active clients.
        if windows.len() > 1024 {
            windows.retain(|_, w| now.duration_since(w.started) < self.window);
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        let reset_in = self.window - now.duration_since(window.started);
        let reset_secs = reset_in.as_secs().max(1);

        if window.count < self.limit {
            window.count += 1;
            Decision {
                allowed: true,
                limit: self.limit,
                remaining: self.limit - window.count,
                reset_secs,
                retry_after: None,
            }
        } else {
            Decision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_secs,
                retry_after: Some(reset_secs),
            }
        }
    }
}

/// The three limiters the HTTP surface consults.
pub struct LimiterSet {
    /// General API traffic: 100/min.
    pub general: RateLimiter,
    /// Email operations: 30/min; denials feed IMAP back-pressure.
    pub email_ops: RateLimiter,
    /// Auth attempts: 10/min.
    pub auth: RateLimiter,
}

impl Default for LimiterSet {
    fn default() -> Self {
        let minute = Duration::from_secs(60);
        Self {
            general: RateLimiter::new(100, minute),
            email_ops: RateLimiter::new(30, minute),
            auth: RateLimiter::new(10, minute),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("client");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.check("client");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_a_minute() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("client").allowed);
        assert!(!limiter.check("client").allowed);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("client").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
        assert!(!limiter.check("a").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn headers_shape() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let decision = limiter.check("client");
        let headers = decision.headers();
        assert_eq!(headers[0], ("X-RateLimit-Limit", "5".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "4".to_string()));
        assert_eq!(headers[2].0, "X-RateLimit-Reset");
    }

    #[test]
    fn default_set_matches_policy() {
        let set = LimiterSet::default();
        assert_eq!(set.general.limit, 100);
        assert_eq!(set.email_ops.limit, 30);
        assert_eq!(set.auth.limit, 10);
    }
}
