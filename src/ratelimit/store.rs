//! Counter store trait shared by the networked and in-process backends.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a counter store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for counter store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of counting one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Counter value after the increment
    pub count: u64,
    /// Time until the window resets
    pub ttl: Duration,
}

/// An atomically incrementable key/counter store with per-key expiry.
///
/// Counters are only ever incremented. A counter disappears when its expiry
/// passes and starts again from zero on the next increment.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the backend should be tried at all for the next operation.
    fn is_available(&self) -> bool {
        true
    }

    /// Increment `key` by one and report the new value together with the
    /// remaining TTL, `None` when no expiry has been set yet.
    async fn increment_and_get_ttl(&self, key: &str) -> StoreResult<(u64, Option<Duration>)>;

    /// Read the current value without incrementing. Missing keys read as zero.
    async fn get(&self, key: &str) -> StoreResult<u64>;

    /// Set the expiry of `key`. Called only when the key has none yet.
    async fn set_expiry(&self, key: &str, seconds: u64) -> StoreResult<()>;

    /// Count one request against a window of `window_seconds`.
    ///
    /// The first increment in a fresh window starts the window's expiry.
    async fn hit(&self, key: &str, window_seconds: u64) -> StoreResult<WindowHit> {
        let (count, ttl) = self.increment_and_get_ttl(key).await?;

        let ttl = match ttl {
            Some(ttl) => ttl,
            None => {
                self.set_expiry(key, window_seconds).await?;
                Duration::from_secs(window_seconds)
            }
        };

        Ok(WindowHit { count, ttl })
    }
}
