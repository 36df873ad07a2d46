//! Dual-window rate limiter for anonymous clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::failover::FailoverStore;
use super::policy::{CounterKey, RateLimitPolicy, WindowKind, WindowPolicy};
use super::store::WindowHit;

/// Default namespace for counter keys.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

/// The outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left before the tighter window denies
    pub remaining: u64,
    /// When the denying window resets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
    /// Human readable explanation of a denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Decision {
    fn allow(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_time: None,
            message: None,
        }
    }

    fn deny(reset_time: DateTime<Utc>, message: String) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_time: Some(reset_time),
            message: Some(message),
        }
    }

    /// Seconds until the denying window resets, rounded up.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        self.reset_time.map(|reset| {
            let millis = (reset - now).num_milliseconds().max(0) as u64;
            millis.div_ceil(1000)
        })
    }
}

/// Usage of a single window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
}

impl WindowUsage {
    fn unlimited(sentinel: u64) -> Self {
        Self {
            used: 0,
            limit: sentinel,
            remaining: sentinel,
        }
    }
}

/// Current usage of both windows, as shown to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageStatus {
    pub hourly: WindowUsage,
    pub daily: WindowUsage,
}

/// Throttles anonymous clients against an hourly and a daily fixed window.
///
/// The limiter keeps no state of its own; every count lives in the store, so
/// a single instance can serve concurrent requests without locking.
pub struct RateLimiter {
    store: Arc<FailoverStore>,
    policy: RateLimitPolicy,
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter with the default key prefix and the system clock.
    pub fn new(store: Arc<FailoverStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Use a different namespace for counter keys.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Read time from `clock` when computing reset times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The configured window policy.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Current time on the limiter's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The counter store backing this limiter.
    pub fn store(&self) -> &Arc<FailoverStore> {
        &self.store
    }

    /// Count a request from `client_id` and decide whether it may proceed.
    ///
    /// Authenticated callers (`user_id` present) are never limited and never
    /// counted. For anonymous callers the hourly window is evaluated first; a
    /// request it denies is not counted against the daily window.
    ///
    /// Every anonymous call increments at least one counter, so call this
    /// exactly once per inbound request.
    pub async fn check(&self, client_id: &str, user_id: Option<&str>) -> Decision {
        if let Some(user_id) = user_id {
            trace!(user_id = %user_id, "Authenticated request, skipping rate limit");
            return Decision::allow(self.policy.unlimited_remaining);
        }

        let hourly = self.count(client_id, WindowKind::Hour).await;
        let hourly_remaining = self.policy.hourly.remaining(hourly.count);

        if hourly.count > self.policy.hourly.limit {
            let minutes = hourly.ttl.as_secs().div_ceil(60);
            info!(
                client = %client_id,
                count = hourly.count,
                limit = self.policy.hourly.limit,
                "Hourly rate limit exceeded"
            );
            return Decision::deny(
                self.reset_time(hourly.ttl),
                format!(
                    "Hourly limit exceeded. {} analyses remaining. Try again in {} minutes.",
                    hourly_remaining, minutes
                ),
            );
        }

        let daily = self.count(client_id, WindowKind::Day).await;
        let daily_remaining = self.policy.daily.remaining(daily.count);

        if daily.count > self.policy.daily.limit {
            info!(
                client = %client_id,
                count = daily.count,
                limit = self.policy.daily.limit,
                "Daily rate limit exceeded"
            );
            return Decision::deny(
                self.reset_time(daily.ttl),
                "Daily limit exceeded. Try again tomorrow or sign up for unlimited analyses."
                    .to_string(),
            );
        }

        Decision::allow(hourly_remaining.min(daily_remaining))
    }

    /// Report the usage of both windows without counting anything.
    pub async fn status(&self, client_id: &str, user_id: Option<&str>) -> UsageStatus {
        if user_id.is_some() {
            let unlimited = WindowUsage::unlimited(self.policy.unlimited_remaining);
            return UsageStatus {
                hourly: unlimited,
                daily: unlimited,
            };
        }

        UsageStatus {
            hourly: self.usage(client_id, WindowKind::Hour).await,
            daily: self.usage(client_id, WindowKind::Day).await,
        }
    }

    async fn count(&self, client_id: &str, kind: WindowKind) -> WindowHit {
        let window = self.window(kind);
        let key = self.key(client_id, kind);
        let hit = self.store.hit_window(&key, window.window_seconds).await;

        debug!(
            key = %key,
            count = hit.count,
            limit = window.limit,
            ttl_secs = hit.ttl.as_secs(),
            "Counted request"
        );
        hit
    }

    async fn usage(&self, client_id: &str, kind: WindowKind) -> WindowUsage {
        let window = self.window(kind);
        let used = self.store.read(&self.key(client_id, kind)).await;

        WindowUsage {
            used,
            limit: window.limit,
            remaining: window.remaining(used),
        }
    }

    fn window(&self, kind: WindowKind) -> &WindowPolicy {
        self.policy.window(kind)
    }

    fn key(&self, client_id: &str, kind: WindowKind) -> String {
        CounterKey::new(&self.key_prefix, client_id, kind).to_store_key()
    }

    fn reset_time(&self, ttl: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
