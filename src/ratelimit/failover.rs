//! Counter store that prefers a networked backend and falls back to memory.
//!
//! The backend is chosen per call: the primary is used whenever it is
//! configured and reports itself available, and any error it returns sends
//! that single call to the in-process store. Nothing about a failure is
//! remembered for later calls.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::memory::MemoryStore;
use super::store::{CounterStore, StoreResult, WindowHit};

/// Primary store with per-call failover to a [`MemoryStore`].
///
/// Operations on this store never return an error.
pub struct FailoverStore {
    primary: Option<Arc<dyn CounterStore>>,
    fallback: Arc<MemoryStore>,
}

impl FailoverStore {
    /// Create a failover store. `None` runs on the fallback permanently.
    pub fn new(primary: Option<Arc<dyn CounterStore>>, fallback: Arc<MemoryStore>) -> Self {
        Self { primary, fallback }
    }

    /// Create a store that only ever uses process memory.
    pub fn memory_only(fallback: Arc<MemoryStore>) -> Self {
        Self::new(None, fallback)
    }

    /// Whether a primary store is configured.
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// The in-process fallback store.
    pub fn fallback(&self) -> &Arc<MemoryStore> {
        &self.fallback
    }

    /// Count one request against a window on a single backend, so the
    /// increment and the expiry never end up split across two stores.
    pub async fn hit_window(&self, key: &str, window_seconds: u64) -> WindowHit {
        if let Some(primary) = self.available_primary() {
            match primary.hit(key, window_seconds).await {
                Ok(hit) => return hit,
                Err(e) => log_failover(primary.as_ref(), "hit", key, &e),
            }
        }
        self.fallback.count_hit(key, window_seconds)
    }

    /// Read a counter without incrementing it.
    pub async fn read(&self, key: &str) -> u64 {
        if let Some(primary) = self.available_primary() {
            match primary.get(key).await {
                Ok(count) => return count,
                Err(e) => log_failover(primary.as_ref(), "get", key, &e),
            }
        }
        self.fallback.read(key)
    }

    fn available_primary(&self) -> Option<&Arc<dyn CounterStore>> {
        self.primary.as_ref().filter(|store| store.is_available())
    }
}

fn log_failover(
    store: &dyn CounterStore,
    operation: &str,
    key: &str,
    error: &dyn std::fmt::Display,
) {
    warn!(
        store = store.name(),
        operation = operation,
        key = %key,
        error = %error,
        "Counter store failed, using in-memory fallback"
    );
}

#[async_trait]
impl CounterStore for FailoverStore {
    fn name(&self) -> &'static str {
        "failover"
    }

    async fn increment_and_get_ttl(&self, key: &str) -> StoreResult<(u64, Option<Duration>)> {
        if let Some(primary) = self.available_primary() {
            match primary.increment_and_get_ttl(key).await {
                Ok(result) => return Ok(result),
                Err(e) => log_failover(primary.as_ref(), "increment", key, &e),
            }
        }
        Ok(self.fallback.increment(key))
    }

    async fn get(&self, key: &str) -> StoreResult<u64> {
        Ok(self.read(key).await)
    }

    async fn set_expiry(&self, key: &str, seconds: u64) -> StoreResult<()> {
        if let Some(primary) = self.available_primary() {
            match primary.set_expiry(key, seconds).await {
                Ok(()) => return Ok(()),
                Err(e) => log_failover(primary.as_ref(), "expire", key, &e),
            }
        }
        self.fallback.expire(key, seconds);
        Ok(())
    }

    async fn hit(&self, key: &str, window_seconds: u64) -> StoreResult<WindowHit> {
        Ok(self.hit_window(key, window_seconds).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::store::StoreError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// A primary that fails every call and counts how often it was tried.
    #[derive(Default)]
    struct BrokenStore {
        calls: AtomicUsize,
        available: bool,
    }

    impl BrokenStore {
        fn available() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                available: true,
            }
        }

        fn fail<T>(&self) -> StoreResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[async_trait]
    impl CounterStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn increment_and_get_ttl(&self, _key: &str) -> StoreResult<(u64, Option<Duration>)> {
            self.fail()
        }

        async fn get(&self, _key: &str) -> StoreResult<u64> {
            self.fail()
        }

        async fn set_expiry(&self, _key: &str, _seconds: u64) -> StoreResult<()> {
            self.fail()
        }
    }

    /// A working primary whose next call fails when armed.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_next: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> StoreResult<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Timeout(Duration::from_millis(1000)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn increment_and_get_ttl(&self, key: &str) -> StoreResult<(u64, Option<Duration>)> {
            self.check()?;
            self.inner.increment_and_get_ttl(key).await
        }

        async fn get(&self, key: &str) -> StoreResult<u64> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set_expiry(&self, key: &str, seconds: u64) -> StoreResult<()> {
            self.check()?;
            self.inner.set_expiry(key, seconds).await
        }
    }

    #[tokio::test]
    async fn test_memory_only() {
        let store = FailoverStore::memory_only(Arc::new(MemoryStore::new()));
        assert!(!store.has_primary());

        let hit = store.hit("k", 60).await.unwrap();
        assert_eq!(hit.count, 1);
        assert_eq!(store.get("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failing_primary_uses_fallback_every_call() {
        let primary = Arc::new(BrokenStore::available());
        let fallback = Arc::new(MemoryStore::new());
        let store =
            FailoverStore::new(Some(primary.clone() as Arc<dyn CounterStore>), fallback.clone());

        assert_eq!(store.hit_window("k", 60).await.count, 1);
        assert_eq!(store.hit_window("k", 60).await.count, 2);
        assert_eq!(store.read("k").await, 2);

        // No sticky state: the primary is retried on every call
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fallback.read("k"), 2);
    }

    #[tokio::test]
    async fn test_unavailable_primary_is_skipped() {
        let primary = Arc::new(BrokenStore::default());
        let store = FailoverStore::new(
            Some(primary.clone() as Arc<dyn CounterStore>),
            Arc::new(MemoryStore::new()),
        );

        store.increment_and_get_ttl("k").await.unwrap();
        store.set_expiry("k", 60).await.unwrap();
        store.get("k").await.unwrap();

        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_working_primary_is_preferred() {
        let primary = Arc::new(MemoryStore::new());
        let fallback = Arc::new(MemoryStore::new());
        let store =
            FailoverStore::new(Some(primary.clone() as Arc<dyn CounterStore>), fallback.clone());

        let hit = store.hit_window("k", 60).await;
        assert_eq!(hit.count, 1);
        assert_eq!(hit.ttl, Duration::from_secs(60));
        assert_eq!(store.hit_window("k", 60).await.count, 2);
        assert_eq!(store.read("k").await, 2);

        assert_eq!(primary.read("k"), 2);
        assert!(fallback.is_empty());
    }

    #[tokio::test]
    async fn test_failover_is_decided_per_call() {
        let primary = Arc::new(FlakyStore::default());
        let fallback = Arc::new(MemoryStore::new());
        let store =
            FailoverStore::new(Some(primary.clone() as Arc<dyn CounterStore>), fallback.clone());

        primary.fail_next.store(true, Ordering::SeqCst);
        assert_eq!(store.hit_window("k", 60).await.count, 1);
        assert_eq!(fallback.read("k"), 1);

        // The primary recovered; the next call goes straight back to it
        assert_eq!(store.hit_window("k", 60).await.count, 1);
        assert_eq!(store.hit_window("k", 60).await.count, 2);
        assert_eq!(primary.inner.read("k"), 2);
        assert_eq!(fallback.read("k"), 1);

        primary.fail_next.store(true, Ordering::SeqCst);
        assert_eq!(store.read("k").await, 1);
        assert_eq!(store.read("k").await, 2);
    }
}
