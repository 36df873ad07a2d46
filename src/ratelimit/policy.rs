//! Window policies and counter keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Remaining count reported to callers that are exempt from limiting.
pub const UNLIMITED_REMAINING: u64 = 999;

/// Longest window a policy may configure: one leap year.
pub const MAX_WINDOW_SECONDS: u64 = 366 * 86_400;

/// The fixed windows a client is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Per-hour window
    Hour,
    /// Per-day window
    Day,
}

impl WindowKind {
    /// The tag used as the last segment of a counter key.
    pub fn tag(&self) -> &'static str {
        match self {
            WindowKind::Hour => "hour",
            WindowKind::Day => "day",
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Limit and length of a single fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    /// Requests admitted per window
    pub limit: u64,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl WindowPolicy {
    /// Create a new window policy.
    pub const fn new(limit: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Quota left after `used` requests have been counted.
    pub fn remaining(&self, used: u64) -> u64 {
        self.limit.saturating_sub(used)
    }
}

/// The hourly and daily windows applied to anonymous clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default = "default_hourly")]
    pub hourly: WindowPolicy,

    #[serde(default = "default_daily")]
    pub daily: WindowPolicy,

    /// Sentinel reported as `remaining` for authenticated users
    #[serde(default = "default_unlimited")]
    pub unlimited_remaining: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            hourly: default_hourly(),
            daily: default_daily(),
            unlimited_remaining: default_unlimited(),
        }
    }
}

impl RateLimitPolicy {
    /// Policy for a given window kind.
    pub fn window(&self, kind: WindowKind) -> &WindowPolicy {
        match kind {
            WindowKind::Hour => &self.hourly,
            WindowKind::Day => &self.daily,
        }
    }
}

fn default_hourly() -> WindowPolicy {
    WindowPolicy::new(3, 3600)
}

fn default_daily() -> WindowPolicy {
    WindowPolicy::new(10, 86400)
}

fn default_unlimited() -> u64 {
    UNLIMITED_REMAINING
}

/// A key that identifies one client's counter for one window.
///
/// Rendered as `<prefix>:<client>:<window>`, e.g. `rate_limit:203.0.113.7:hour`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Key namespace
    pub prefix: String,
    /// The client identifier (usually an IP address)
    pub client: String,
    /// Which window this counter belongs to
    pub window: WindowKind,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(prefix: &str, client: &str, window: WindowKind) -> Self {
        Self {
            prefix: prefix.to_string(),
            client: client.to_string(),
            window,
        }
    }

    /// Convert the key to the string stored in the counter store.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}:{}", self.prefix, self.client, self.window.tag())
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}
