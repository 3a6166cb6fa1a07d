// src/storage/memory.rs

// In-memory counter store (for testing and single-process usage)
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::time;
use tracing::{debug, warn};

use crate::config::{InMemoryConfig, StoreConfig};
use crate::decision::{expiry_from_ttl, Decision};
use crate::error::{RateLimiterError, Result, StorageError};
use crate::rate::Rate;
use crate::storage::{check_increment, namespaced_key, CounterStore};
use crate::storage_op;

/// One fixed-window counter
#[derive(Debug)]
struct Counter {
    count: i64,
    expires_at: Instant,
}

impl Counter {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }

    fn ttl_millis(&self, now: Instant) -> i64 {
        self.expires_at
            .saturating_duration_since(now)
            .as_millis()
            .try_into()
            .unwrap_or(i64::MAX)
    }
}

type Counters = Arc<Mutex<HashMap<String, Counter>>>;

/// Counter store keeping every counter in a process-local map.
///
/// The whole increment step (lookup, expiry check, add, create) runs under one
/// mutex, which gives the same linearizable semantics as the Redis scripts.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    counters: Counters,
    store: StoreConfig,
    config: InMemoryConfig,
}

impl MemoryStore {
    /// Creates a new in-memory store with the given configuration
    pub fn new(store: StoreConfig, config: InMemoryConfig) -> Self {
        let counters: Counters = Arc::new(Mutex::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        if config.use_background_task {
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(Self::cleanup_loop(
                        Arc::downgrade(&counters),
                        config.cleanup_interval,
                    ));
                }
                Err(_) => warn!("No tokio runtime, expired counters are only purged on access"),
            }
        }

        Self {
            counters,
            store,
            config,
        }
    }

    /// Number of counters currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Counter>> {
        // a panic mid-update cannot leave a counter half written
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Runs until the store (and every clone of it) is dropped
    async fn cleanup_loop(counters: Weak<Mutex<HashMap<String, Counter>>>, every: Duration) {
        let mut interval = time::interval(every.max(Duration::from_millis(1)));
        loop {
            interval.tick().await;
            let Some(live) = counters.upgrade() else {
                break;
            };
            let purged = purge_expired(&mut live.lock().unwrap_or_else(PoisonError::into_inner));
            if purged > 0 {
                debug!(purged, "Purged expired counters");
            }
        }
    }

    fn state(&self, key: &str) -> Option<(i64, i64)> {
        let now = Instant::now();
        let counters = self.lock();
        let counter = counters.get(key).filter(|counter| counter.is_live(now))?;
        Some((counter.count, counter.ttl_millis(now)))
    }

    fn increment(&self, key: &str, count: i64, period: Duration) -> Result<(i64, i64)> {
        let now = Instant::now();
        let mut counters = self.lock();

        if let Some(counter) = counters.get_mut(key).filter(|c| c.is_live(now)) {
            counter.count = counter.count.saturating_add(count);
            return Ok((counter.count, counter.ttl_millis(now)));
        }

        if !counters.contains_key(key) && counters.len() >= self.config.max_entries {
            purge_expired(&mut counters);
            if counters.len() >= self.config.max_entries {
                return Err(StorageError::CapacityExceeded(self.config.max_entries).into());
            }
        }

        let expires_at = now.checked_add(period).ok_or_else(|| {
            RateLimiterError::InvalidArgument(format!("period {:?} overflows the clock", period))
        })?;
        let counter = Counter { count, expires_at };
        let ttl = counter.ttl_millis(now);
        counters.insert(key.to_string(), counter);
        Ok((count, ttl))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default(), InMemoryConfig::default())
    }
}

fn purge_expired(counters: &mut HashMap<String, Counter>) -> usize {
    let now = Instant::now();
    let before = counters.len();
    counters.retain(|_, counter| counter.is_live(now));
    before - counters.len()
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn peek(&self, key: &str, rate: &Rate) -> Result<Decision> {
        let key = namespaced_key(&self.store.key_prefix, key);
        let now = Utc::now();

        Ok(match self.state(&key) {
            Some((count, ttl)) => Decision::from_state(rate, expiry_from_ttl(now, rate, ttl), count),
            None => Decision::fresh(rate, now),
        })
    }

    async fn reset(&self, key: &str, rate: &Rate) -> Result<Decision> {
        let key = namespaced_key(&self.store.key_prefix, key);
        self.lock().remove(&key);
        Ok(Decision::fresh(rate, Utc::now()))
    }

    async fn inc(&self, key: &str, count: i64, rate: &Rate) -> Result<Decision> {
        check_increment(count)?;
        let key = namespaced_key(&self.store.key_prefix, key);
        let started = Instant::now();

        let result = self.increment(&key, count, rate.period());
        storage_op!("inc", key.as_str(), result, started.elapsed().as_millis() as u64);

        let (count, ttl) = result?;
        Ok(Decision::from_state(
            rate,
            expiry_from_ttl(Utc::now(), rate, ttl),
            count,
        ))
    }
}
