//! Redis-backed counter store.
//!
//! The increment and the TTL read travel in one `MULTI`/`EXEC` pipeline, so
//! concurrent requests for the same client never lose an update. The
//! connection is opened lazily and an established connection manager
//! reconnects by itself. After a connection failure or timeout the store
//! reports itself unavailable for a short backoff, so callers skip it instead
//! of waiting out the timeout on every request while Redis is down.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, trace};

use super::store::{CounterStore, StoreError, StoreResult};

/// Counter store on a Redis server.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
    reconnect_backoff: Duration,
    last_failure: Mutex<Option<Instant>>,
}

/// Default time the store is skipped after a connection failure.
const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.connection.initialized())
            .field("timeout", &self.timeout)
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Create a store for `url` without touching the network.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be parsed.
    pub fn open(url: &str, timeout: Duration) -> StoreResult<Self> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            timeout,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            last_failure: Mutex::new(None),
        })
    }

    /// Skip the store for `backoff` after a connection failure.
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Create a store and establish its connection right away.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the server cannot be reached
    /// within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> StoreResult<Self> {
        let store = Self::open(url, timeout)?;
        store.connection().await?;
        Ok(store)
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        let conn = self
            .bounded(self.connection.get_or_try_init(|| {
                debug!("Opening Redis connection");
                ConnectionManager::new(self.client.clone())
            }))
            .await?;
        Ok(conn.clone())
    }

    /// Run a Redis future under the configured timeout and track whether
    /// the server is reachable.
    async fn bounded<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => {
                self.mark_reachable();
                Ok(value)
            }
            Ok(Err(e)) => {
                if is_connection_error(&e) {
                    self.mark_unreachable();
                }
                Err(StoreError::from(e))
            }
            Err(_) => {
                self.mark_unreachable();
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }

    fn mark_reachable(&self) {
        if self.last_failure.lock().take().is_some() {
            info!("Redis reachable again");
        }
    }

    fn mark_unreachable(&self) {
        *self.last_failure.lock() = Some(Instant::now());
    }
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
}

#[async_trait]
impl CounterStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_available(&self) -> bool {
        self.last_failure
            .lock()
            .map_or(true, |at| at.elapsed() >= self.reconnect_backoff)
    }

    async fn increment_and_get_ttl(&self, key: &str) -> StoreResult<(u64, Option<Duration>)> {
        let mut conn = self.connection().await?;

        let (count, ttl): (u64, i64) = self
            .bounded(
                redis::pipe()
                    .atomic()
                    .incr(key, 1)
                    .ttl(key)
                    .query_async(&mut conn),
            )
            .await?;

        trace!(key = %key, count = count, ttl = ttl, "Incremented Redis counter");

        // TTL answers -1 for a key without expiry
        let ttl = u64::try_from(ttl).ok().map(Duration::from_secs);
        Ok((count, ttl))
    }

    async fn get(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection().await?;
        let value: Option<u64> = self.bounded(conn.get::<_, Option<u64>>(key)).await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_expiry(&self, key: &str, seconds: u64) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        self.bounded(conn.expire::<_, ()>(key, seconds)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_bad_url() {
        let result = RedisStore::open("not a url", Duration::from_millis(100));
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_errors() {
        // Nothing listens on port 1
        let store =
            RedisStore::open("redis://127.0.0.1:1/", Duration::from_millis(200)).unwrap();

        assert!(!store.is_connected());
        assert!(store.increment_and_get_ttl("k").await.is_err());
        assert!(store.get("k").await.is_err());
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_skipped_during_backoff() {
        let store = RedisStore::open("redis://127.0.0.1:1/", Duration::from_millis(200))
            .unwrap()
            .with_reconnect_backoff(Duration::from_millis(100));
        assert!(store.is_available());

        assert!(store.get("k").await.is_err());
        assert!(!store.is_available());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.is_available());
    }
}
