//! Rate limiting logic and counter storage.

mod clock;
mod failover;
mod limiter;
mod memory;
mod policy;
mod redis_store;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use failover::FailoverStore;
pub use limiter::{Decision, RateLimiter, UsageStatus, WindowUsage, DEFAULT_KEY_PREFIX};
pub use memory::MemoryStore;
pub use policy::{
    CounterKey, RateLimitPolicy, WindowKind, WindowPolicy, MAX_WINDOW_SECONDS, UNLIMITED_REMAINING,
};
pub use redis_store::RedisStore;
pub use store::{CounterStore, StoreError, StoreResult, WindowHit};
