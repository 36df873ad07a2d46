//! In-process counter store.
//!
//! Used whenever the networked store is not configured or fails. Counters are
//! local to this process, so a deployment with several instances under-counts
//! while running on this store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::clock::{Clock, SystemClock};
use super::store::{CounterStore, StoreResult, WindowHit};

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    const FRESH: Entry = Entry {
        count: 0,
        expires_at: None,
    };

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Mutex-guarded map from key to `(count, expiry)`.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Increment `key` and report the new count and remaining TTL.
    pub fn increment(&self, key: &str) -> (u64, Option<Duration>) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = Self::live_entry(&mut entries, key, now);
        entry.count += 1;
        (entry.count, entry.ttl(now))
    }

    /// Current count of `key`; expired or missing keys read as zero.
    pub fn read(&self, key: &str) -> u64 {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map_or(0, |entry| entry.count)
    }

    /// Start the expiry of `key` unless it already has one.
    pub fn expire(&self, key: &str, seconds: u64) {
        let now = self.clock.now();
        if let Some(entry) = self.entries.lock().get_mut(key) {
            if entry.expires_at.is_none() {
                entry.expires_at = Some(window_end(now, seconds));
            }
        }
    }

    /// Increment and start the expiry under one lock.
    pub fn count_hit(&self, key: &str, window_seconds: u64) -> WindowHit {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = Self::live_entry(&mut entries, key, now);
        entry.count += 1;
        let expires_at = *entry
            .expires_at
            .get_or_insert_with(|| window_end(now, window_seconds));

        WindowHit {
            count: entry.count,
            ttl: (expires_at - now).to_std().unwrap_or(Duration::ZERO),
        }
    }

    /// Drop every entry whose window has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> &'a mut Entry {
        let entry = entries.entry(key.to_string()).or_insert(Entry::FRESH);
        if entry.is_expired(now) {
            trace!(key = %key, "Window expired, starting a new one");
            *entry = Entry::FRESH;
        }
        entry
    }
}

/// End of a window starting at `now`, saturating at the latest representable
/// instant so an oversized window stays enforced instead of wrapping.
fn window_end(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|length| now.checked_add_signed(length))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn increment_and_get_ttl(&self, key: &str) -> StoreResult<(u64, Option<Duration>)> {
        Ok(self.increment(key))
    }

    async fn get(&self, key: &str) -> StoreResult<u64> {
        Ok(self.read(key))
    }

    async fn set_expiry(&self, key: &str, seconds: u64) -> StoreResult<()> {
        self.expire(key, seconds);
        Ok(())
    }

    async fn hit(&self, key: &str, window_seconds: u64) -> StoreResult<WindowHit> {
        Ok(self.count_hit(key, window_seconds))
    }
}
