// src/storage/mod.rs

pub mod memory;
pub mod redis;
pub(crate) mod scripts;

#[cfg(test)]
mod tests;

pub use self::memory::MemoryStore;
pub use self::redis::{connect, RedisStore, ScriptConnection};

use super::decision::Decision;
use super::error::{RateLimiterError, Result};
use super::rate::Rate;
use async_trait::async_trait;
use std::fmt::Debug;

/// Core trait that all counter stores must implement.
///
/// Implementations must be safe for unbounded concurrent callers: increments
/// on the same key are linearizable, `peek` never mutates, and `reset` either
/// happens entirely before or entirely after a racing increment.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Consumes one unit and reports the resulting state.
    async fn get(&self, key: &str, rate: &Rate) -> Result<Decision> {
        self.inc(key, 1, rate).await
    }

    /// Reads the current state without consuming anything.
    async fn peek(&self, key: &str, rate: &Rate) -> Result<Decision>;

    /// Drops the counter, starting a fresh window.
    async fn reset(&self, key: &str, rate: &Rate) -> Result<Decision>;

    /// Atomically adds `count` units, creating the counter with an expiry of
    /// `rate.period()` when it does not exist yet.
    async fn inc(&self, key: &str, count: i64, rate: &Rate) -> Result<Decision>;
}

/// Builds the store-native key `<prefix>:<key>`.
pub fn namespaced_key(prefix: &str, key: &str) -> String {
    let mut buffer = String::with_capacity(prefix.len() + 1 + key.len());
    buffer.push_str(prefix);
    buffer.push(':');
    buffer.push_str(key);
    buffer
}

pub(crate) fn check_increment(count: i64) -> Result<()> {
    if count <= 0 {
        return Err(RateLimiterError::InvalidArgument(format!(
            "increment must be positive, got {}",
            count
        )));
    }
    Ok(())
}
