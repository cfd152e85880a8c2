//! Per-host request pacing

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Paces requests per host: one request per period, no bursts. Hosts are
/// paced independently, so a slow feed host never delays another.
#[derive(Clone)]
pub struct HostRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl HostRateLimiter {
    /// `requests_per_second` is validated positive by config loading
    pub fn new(requests_per_second: f64) -> Self {
        let quota = Duration::try_from_secs_f64(1.0 / requests_per_second)
            .ok()
            .and_then(Quota::with_period)
            .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)));

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Wait until `host` may be contacted again
    pub async fn wait(&self, host: &str) {
        let key = host.to_string();
        if self.limiter.check_key(&key).is_ok() {
            return;
        }

        trace!(host, "Rate limiting");
        self.limiter.until_key_ready(&key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_host_is_spaced() {
        let limiter = HostRateLimiter::new(10.0);

        let start = std::time::Instant::now();
        limiter.wait("blog.example.com").await;
        limiter.wait("blog.example.com").await;
        limiter.wait("blog.example.com").await;

        // Two full periods of 100ms
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn test_hosts_are_paced_independently() {
        let limiter = HostRateLimiter::new(0.5);

        let start = std::time::Instant::now();
        limiter.wait("a.example.com").await;
        limiter.wait("b.example.com").await;
        assert!(start.elapsed() < Duration::from_millis(500));

        assert!(limiter
            .limiter
            .check_key(&"a.example.com".to_string())
            .is_err());
        assert!(limiter
            .limiter
            .check_key(&"c.example.com".to_string())
            .is_ok());
    }
}
