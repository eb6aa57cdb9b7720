//! Per-vendor sliding-window admission control.
//!
//! Every worker, in every process, shares one window per vendor through a
//! [`WindowStore`]. A check admits the caller iff fewer than `max_requests`
//! admissions happened within the trailing `window`.
//!
//! Rejected checks do not consume capacity: only admitted calls leave a marker.

pub mod window;
#[cfg(feature = "redis")]
pub mod redis;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{Span, debug};

use fulfill_core::Vendor;

pub use window::{InMemoryWindowStore, WindowSnapshot, WindowStore};
#[cfg(feature = "redis")]
pub use self::redis::RedisWindowStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit storage error: {0}")]
    Storage(String),
}

/// Capacity of one vendor's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(1000))
    }
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Admitted calls inside the window, this one included when allowed.
    /// Rejected checks leave no marker, so with a limit of 10 the 11th check
    /// reports 10, as does every further rejection until a marker expires.
    pub current_count: u32,
    pub limit: u32,
    /// When a rejected caller can expect capacity again (oldest marker leaves
    /// the window). For an admitted call, when its own marker expires.
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Time left until `window_reset_at`, zero if already passed.
    pub fn retry_after(&self) -> Duration {
        (self.window_reset_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Sliding-window rate limiter keyed by vendor.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    default_limit: RateLimit,
    limits: HashMap<Vendor, RateLimit>,
    span: Span,
}

impl core::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_limit", &self.default_limit)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, default_limit: RateLimit) -> Self {
        Self {
            store,
            default_limit,
            limits: HashMap::new(),
            span: Span::none(),
        }
    }

    /// In-process limiter with the same limit for every vendor.
    pub fn in_memory(default_limit: RateLimit) -> Self {
        Self::new(Arc::new(InMemoryWindowStore::new()), default_limit)
    }

    /// Override the limit of one vendor.
    pub fn with_limit(mut self, vendor: Vendor, limit: RateLimit) -> Self {
        self.limits.insert(vendor, limit);
        self
    }

    /// Parent span for this limiter's log events.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn limit_for(&self, vendor: Vendor) -> RateLimit {
        self.limits.get(&vendor).copied().unwrap_or(self.default_limit)
    }

    pub fn key(vendor: Vendor) -> String {
        format!("rate_limit:{vendor}")
    }

    /// Atomically evict, count and (if there is room) record this call.
    pub async fn check(&self, vendor: Vendor) -> Result<RateLimitDecision, RateLimitError> {
        let limit = self.limit_for(vendor);
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let snapshot = self
            .store
            .try_acquire(&Self::key(vendor), now_ms, limit.window_ms(), limit.max_requests)
            .await?;

        let reset_base_ms = if snapshot.admitted {
            now_ms
        } else {
            snapshot.oldest_ms.unwrap_or(now_ms)
        };
        let window_reset_at = Utc
            .timestamp_millis_opt(reset_base_ms.saturating_add(limit.window_ms()))
            .single()
            .unwrap_or(now);

        let decision = RateLimitDecision {
            allowed: snapshot.admitted,
            current_count: snapshot.count,
            limit: limit.max_requests,
            window_reset_at,
        };

        if !decision.allowed {
            debug!(
                parent: &self.span,
                vendor = %vendor,
                current_count = decision.current_count,
                limit = decision.limit,
                reset_in_ms = decision.retry_after().as_millis() as u64,
                "rate limit reached"
            );
        }
        Ok(decision)
    }

    /// Capacity left in the current window; does not record a call.
    pub async fn remaining(&self, vendor: Vendor) -> Result<u32, RateLimitError> {
        let limit = self.limit_for(vendor);
        let count = self
            .store
            .count(&Self::key(vendor), Utc::now().timestamp_millis(), limit.window_ms())
            .await?;
        Ok(limit.max_requests.saturating_sub(count))
    }

    /// Check; when rejected, sleep until the window resets and check once more.
    ///
    /// The returned decision is the last check's. A caller that still gets
    /// `allowed == false` should back off through its own retry mechanism.
    pub async fn wait_for_availability(
        &self,
        vendor: Vendor,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let first = self.check(vendor).await?;
        if first.allowed {
            return Ok(first);
        }

        let wait = first.retry_after();
        debug!(
            parent: &self.span,
            vendor = %vendor,
            wait_ms = wait.as_millis() as u64,
            "waiting for rate limit window"
        );
        tokio::time::sleep(wait).await;
        self.check(vendor).await
    }
}
