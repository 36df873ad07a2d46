//! Behavioral tests for the dual-window rate limiter.

use async_trait::async_trait;
use chrono::Duration as TimeDelta;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webinsight::ratelimit::{
    CounterStore, FailoverStore, ManualClock, MemoryStore, RateLimitPolicy, RateLimiter,
    StoreError, StoreResult,
};

const CLIENT: &str = "203.0.113.10";

/// Build a limiter on an in-memory store and a clock the test controls.
fn memory_limiter() -> (Arc<RateLimiter>, ManualClock) {
    limiter_with_primary(None)
}

fn limiter_with_primary(
    primary: Option<Arc<dyn CounterStore>>,
) -> (Arc<RateLimiter>, ManualClock) {
    let clock = ManualClock::default();
    let memory = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
    let store = Arc::new(FailoverStore::new(primary, memory));
    let limiter = RateLimiter::new(store, RateLimitPolicy::default())
        .with_clock(Arc::new(clock.clone()));
    (Arc::new(limiter), clock)
}

/// Primary store whose every operation fails, as if Redis were down.
#[derive(Default)]
struct DownStore {
    attempts: AtomicUsize,
}

#[async_trait]
impl CounterStore for DownStore {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn increment_and_get_ttl(&self, _key: &str) -> StoreResult<(u64, Option<Duration>)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _key: &str) -> StoreResult<u64> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set_expiry(&self, _key: &str, _seconds: u64) -> StoreResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

async fn assert_three_per_hour(limiter: &RateLimiter, clock: &ManualClock) {
    for call in 1..=3 {
        let decision = limiter.check(CLIENT, None).await;
        assert!(decision.allowed, "call {} should be allowed", call);
    }

    let decision = limiter.check(CLIENT, None).await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
    assert!(decision.reset_time.is_some());

    clock.advance(TimeDelta::seconds(3600));
    assert!(limiter.check(CLIENT, None).await.allowed);
}

#[tokio::test]
async fn test_authenticated_user_always_allowed() {
    let (limiter, _clock) = memory_limiter();

    // Exhaust the anonymous budget for this address first
    for _ in 0..5 {
        limiter.check(CLIENT, None).await;
    }

    for _ in 0..50 {
        assert!(limiter.check(CLIENT, Some("user-1")).await.allowed);
    }
}

#[tokio::test]
async fn test_fourth_call_in_hour_denied() {
    let (limiter, _clock) = memory_limiter();

    for _ in 0..3 {
        assert!(limiter.check(CLIENT, None).await.allowed);
    }

    let decision = limiter.check(CLIENT, None).await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
}

#[tokio::test]
async fn test_hourly_window_resets_but_daily_persists() {
    let (limiter, clock) = memory_limiter();

    for _ in 0..3 {
        assert!(limiter.check(CLIENT, None).await.allowed);
    }
    assert!(!limiter.check(CLIENT, None).await.allowed);

    clock.advance(TimeDelta::seconds(3601));
    assert!(limiter.check(CLIENT, None).await.allowed);

    let status = limiter.status(CLIENT, None).await;
    assert_eq!(status.hourly.used, 1);
    assert_eq!(status.daily.used, 4);
}

#[tokio::test]
async fn test_daily_budget_caps_allowed_calls() {
    let (limiter, clock) = memory_limiter();

    let mut allowed = 0;
    // Six hours of three calls each, all inside one day
    for _ in 0..6 {
        for _ in 0..3 {
            if limiter.check(CLIENT, None).await.allowed {
                allowed += 1;
            }
        }
        clock.advance(TimeDelta::hours(1));
    }

    assert_eq!(allowed, 10);

    // A new day opens a new budget
    clock.advance(TimeDelta::hours(18));
    assert!(limiter.check(CLIENT, None).await.allowed);
}

#[tokio::test]
async fn test_failing_primary_matches_memory_behavior() {
    let down = Arc::new(DownStore::default());
    let (limiter, clock) = limiter_with_primary(Some(down.clone() as Arc<dyn CounterStore>));

    assert_three_per_hour(&limiter, &clock).await;
    assert!(down.attempts.load(Ordering::SeqCst) > 0);

    let (memory_only, memory_clock) = memory_limiter();
    assert_three_per_hour(&memory_only, &memory_clock).await;
}

#[tokio::test]
async fn test_fresh_client_status() {
    let (limiter, _clock) = memory_limiter();

    let status = limiter.status(CLIENT, None).await;
    assert_eq!(status.hourly.used, 0);
    assert_eq!(status.hourly.limit, 3);
    assert_eq!(status.hourly.remaining, 3);
    assert_eq!(status.daily.used, 0);
    assert_eq!(status.daily.limit, 10);
    assert_eq!(status.daily.remaining, 10);
}

#[tokio::test]
async fn test_concurrent_checks_grant_exactly_limit() {
    let (limiter, _clock) = memory_limiter();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check(CLIENT, None).await })
        })
        .collect();

    let decisions = futures::future::join_all(handles).await;
    let allowed = decisions
        .into_iter()
        .map(|result| result.expect("check task panicked"))
        .filter(|decision| decision.allowed)
        .count();

    assert_eq!(allowed, 3);
}

#[test]
fn test_check_from_blocking_context() {
    let (limiter, _clock) = memory_limiter();

    let decision = tokio_test::block_on(limiter.check(CLIENT, None));
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 2);
}
