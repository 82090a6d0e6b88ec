//! Per-identity fixed-window rate limiting.
//!
//! The check and the increment happen under one write lock, so concurrent
//! requests from one identity can never both take the last slot.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug)]
struct Bucket {
    window_start: Instant,
    count: u32,
}

impl Bucket {
    fn fresh(now: Instant) -> Self {
        Self { window_start: now, count: 0 }
    }

    fn roll(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            *self = Self::fresh(now);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub window_secs: u64,
    pub resets_in_secs: u64,
}

pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Bucket>>,
    quota: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(quota: u32, window: Duration) -> Self {
        Self { buckets: RwLock::new(HashMap::new()), quota: quota.max(1), window }
    }

    pub async fn admit(&self, identity: &str) -> Admission {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(identity.to_string()).or_insert_with(|| Bucket::fresh(now));
        bucket.roll(now, self.window);

        if bucket.count >= self.quota {
            let retry_after = (bucket.window_start + self.window).saturating_duration_since(now);
            warn!(
                event_name = "agent.rate_limit.denied",
                identity,
                limit = self.quota,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
            return Admission::Denied { retry_after };
        }

        bucket.count += 1;
        let remaining = self.quota - bucket.count;
        debug!(event_name = "agent.rate_limit.admitted", identity, remaining, "request admitted");
        Admission::Allowed { remaining }
    }

    /// Read-only view; does not consume a slot.
    pub async fn status(&self, identity: &str) -> RateLimitStatus {
        let now = Instant::now();
        let buckets = self.buckets.read().await;
        let (used, resets_in) = match buckets.get(identity) {
            Some(bucket) if now.duration_since(bucket.window_start) < self.window => (
                bucket.count,
                (bucket.window_start + self.window).saturating_duration_since(now),
            ),
            _ => (0, Duration::ZERO),
        };

        RateLimitStatus {
            limit: self.quota,
            remaining: self.quota.saturating_sub(used),
            window_secs: self.window.as_secs(),
            resets_in_secs: resets_in.as_secs(),
        }
    }

    /// Drops buckets whose window has elapsed. A dropped bucket is
    /// indistinguishable from a reset one, so this never changes admissions.
    pub async fn collect_idle(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.window_start) < self.window);
        before - buckets.len()
    }

    pub async fn tracked_identities(&self) -> usize {
        self.buckets.read().await.len()
    }

    pub async fn clear(&self) {
        self.buckets.write().await.clear();
    }
}
