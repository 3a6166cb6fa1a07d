// src/limiter.rs

use std::fmt;
use std::sync::Arc;

use crate::decision::Decision;
use crate::error::Result;
use crate::rate::Rate;
use crate::rate_limit_event;
use crate::storage::CounterStore;

/// A rate bound to a counter store.
///
/// The limiter holds no per-key state of its own, so clones are cheap and any
/// number of tasks may share one.
pub struct Limiter<S: ?Sized = dyn CounterStore> {
    store: Arc<S>,
    rate: Rate,
}

impl<S: CounterStore + ?Sized> Limiter<S> {
    pub fn new(store: Arc<S>, rate: Rate) -> Self {
        Self { store, rate }
    }

    /// Counts one unit against `key`.
    pub async fn get(&self, key: &str) -> Result<Decision> {
        let decision = self.store.get(key, &self.rate).await?;
        rate_limit_event!(key, decision);
        Ok(decision)
    }

    /// Reports the state of `key` without consuming from it.
    pub async fn peek(&self, key: &str) -> Result<Decision> {
        self.store.peek(key, &self.rate).await
    }

    /// Restores the full quota of `key`.
    pub async fn reset(&self, key: &str) -> Result<Decision> {
        self.store.reset(key, &self.rate).await
    }

    /// Counts `count` units against `key` in one step.
    pub async fn inc(&self, key: &str, count: i64) -> Result<Decision> {
        let decision = self.store.inc(key, count, &self.rate).await?;
        rate_limit_event!(key, decision);
        Ok(decision)
    }

    pub fn rate(&self) -> &Rate {
        &self.rate
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: ?Sized> Clone for Limiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            rate: self.rate,
        }
    }
}

impl<S: fmt::Debug + ?Sized> fmt::Debug for Limiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("store", &self.store)
            .field("rate", &self.rate)
            .finish()
    }
}
