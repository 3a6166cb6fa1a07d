// src/storage/redis.rs

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Value};
use std::fmt;
use std::future::Future;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{RedisConfig, StoreConfig};
use crate::decision::{expiry_from_ttl, Decision};
use crate::error::{RateLimiterError, Result, StorageError};
use crate::rate::Rate;
use crate::storage::scripts::{ScriptCache, ScriptIds, ScriptKind};
use crate::storage::{check_increment, namespaced_key, CounterStore};
use crate::storage_op;

/// The primitives the store needs from a Redis connection.
#[async_trait]
pub trait ScriptConnection: Send + Sync {
    /// SCRIPT LOAD, returning the identifier to evaluate by.
    async fn load_script(&self, source: &str) -> RedisResult<String>;

    /// EVALSHA against `keys` with integer `args`.
    async fn eval_sha(&self, sha: &str, keys: &[&str], args: &[i64]) -> RedisResult<Value>;

    /// DEL, returning the number of removed keys.
    async fn delete(&self, key: &str) -> RedisResult<i64>;
}

// ConnectionManager is a cheap handle onto one multiplexed connection,
// so every call works on its own clone.
#[async_trait]
impl ScriptConnection for ConnectionManager {
    async fn load_script(&self, source: &str) -> RedisResult<String> {
        let mut conn = self.clone();
        redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut conn)
            .await
    }

    async fn eval_sha(&self, sha: &str, keys: &[&str], args: &[i64]) -> RedisResult<Value> {
        let mut conn = self.clone();
        redis::cmd("EVALSHA")
            .arg(sha)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut conn)
            .await
    }

    async fn delete(&self, key: &str) -> RedisResult<i64> {
        let mut conn = self.clone();
        redis::cmd("DEL").arg(key).query_async(&mut conn).await
    }
}

/// Opens a managed connection, bounded by `connection_timeout`.
///
/// The store never does this itself: the connection belongs to the process
/// and is handed to every store that shares it.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager> {
    // Open the client - this doesn't actually connect to Redis yet
    let client = Client::open(config.url.as_str())
        .map_err(|e| RateLimiterError::Storage(StorageError::RedisConnection(e.to_string())))?;

    match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client)).await {
        Ok(result) => result
            .map_err(|e| RateLimiterError::Storage(StorageError::RedisConnection(e.to_string()))),
        Err(_) => Err(RateLimiterError::Storage(StorageError::RedisConnection(
            format!(
                "Connection to Redis at {} timed out after {:?}",
                config.url, config.connection_timeout
            ),
        ))),
    }
}

/// Counter store backed by two server-side Lua scripts.
///
/// Scripts are registered once at construction and evaluated by id. When the
/// server reports NOSCRIPT (restart, SCRIPT FLUSH) the store reloads both
/// scripts under the write lock and retries the evaluation once.
pub struct RedisStore<C = ConnectionManager> {
    connection: C,
    config: StoreConfig,
    scripts: RwLock<ScriptCache>,
}

// Manually implement Debug
impl<C> fmt::Debug for RedisStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.config.key_prefix)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

impl<C: ScriptConnection> RedisStore<C> {
    /// Wraps `connection` and registers both scripts. A failed registration
    /// fails construction.
    pub async fn new(connection: C, config: StoreConfig) -> Result<Self> {
        let store = Self {
            connection,
            config,
            scripts: RwLock::new(ScriptCache::new()),
        };
        store.ensure_loaded(None).await?;
        Ok(store)
    }

    pub fn key_prefix(&self) -> &str {
        &self.config.key_prefix
    }

    async fn round_trip<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(result) => result.map_err(RateLimiterError::from),
            Err(_) => {
                debug!(operation, timeout = ?self.config.timeout, "Store round trip timed out");
                Err(StorageError::Timeout(self.config.timeout).into())
            }
        }
    }

    async fn load(&self, kind: ScriptKind) -> Result<String> {
        self.round_trip("script_load", self.connection.load_script(kind.source()))
            .await
            .map_err(|err| {
                RateLimiterError::Storage(StorageError::ScriptLoad {
                    script: kind.name(),
                    reason: err.to_string(),
                })
            })
    }

    /// Loads the scripts unless another caller already replaced the
    /// generation `stale` refers to.
    async fn ensure_loaded(&self, stale: Option<u64>) -> Result<()> {
        let mut cache = self.scripts.write().await;
        if !cache.needs_load(stale) {
            return Ok(());
        }

        cache.invalidate();
        let increment = self.load(ScriptKind::Increment).await?;
        let peek = self.load(ScriptKind::Peek).await?;
        cache.install(ScriptIds { increment, peek });

        debug!(generation = cache.generation(), "Scripts loaded");
        Ok(())
    }

    async fn script_id(&self, kind: ScriptKind) -> Result<(String, u64)> {
        {
            let cache = self.scripts.read().await;
            if let Some(found) = cache.lookup(kind) {
                return Ok(found);
            }
        }

        // a previous reload failed and left the cache empty
        self.ensure_loaded(None).await?;
        self.scripts
            .read()
            .await
            .lookup(kind)
            .ok_or_else(|| RateLimiterError::Internal("script cache empty after load".to_string()))
    }

    async fn evaluate(&self, kind: ScriptKind, key: &str, args: &[i64]) -> Result<Value> {
        let keys = [key];
        let (sha, generation) = self.script_id(kind).await?;

        match self
            .round_trip("evalsha", self.connection.eval_sha(&sha, &keys, args))
            .await
        {
            Err(err) if err.is_script_missing() => {
                warn!(
                    script = kind.name(),
                    generation, "Script missing on server, reloading"
                );
                self.ensure_loaded(Some(generation)).await?;
                let (sha, _) = self.script_id(kind).await?;
                self.round_trip("evalsha", self.connection.eval_sha(&sha, &keys, args))
                    .await
            }
            result => result,
        }
    }
}

#[async_trait]
impl<C: ScriptConnection> CounterStore for RedisStore<C> {
    async fn peek(&self, key: &str, rate: &Rate) -> Result<Decision> {
        let key = namespaced_key(&self.config.key_prefix, key);
        let started = Instant::now();

        let reply = self.evaluate(ScriptKind::Peek, &key, &[]).await;
        storage_op!("peek", key.as_str(), reply, started.elapsed().as_millis() as u64);

        let (count, ttl) = parse_count_and_ttl(reply?)?;
        Ok(Decision::from_state(
            rate,
            expiry_from_ttl(Utc::now(), rate, ttl),
            count,
        ))
    }

    async fn reset(&self, key: &str, rate: &Rate) -> Result<Decision> {
        let key = namespaced_key(&self.config.key_prefix, key);
        let started = Instant::now();

        let result = self.round_trip("del", self.connection.delete(&key)).await;
        storage_op!("reset", key.as_str(), result, started.elapsed().as_millis() as u64);

        result?;
        Ok(Decision::fresh(rate, Utc::now()))
    }

    async fn inc(&self, key: &str, count: i64, rate: &Rate) -> Result<Decision> {
        check_increment(count)?;
        let key = namespaced_key(&self.config.key_prefix, key);
        let started = Instant::now();

        let reply = self
            .evaluate(ScriptKind::Increment, &key, &[count, rate.period_millis()])
            .await;
        storage_op!("inc", key.as_str(), reply, started.elapsed().as_millis() as u64);

        let (count, ttl) = parse_count_and_ttl(reply?)?;
        Ok(Decision::from_state(
            rate,
            expiry_from_ttl(Utc::now(), rate, ttl),
            count,
        ))
    }
}

/// Decodes the `{count, ttl_ms}` reply both scripts produce.
pub(crate) fn parse_count_and_ttl(reply: Value) -> Result<(i64, i64)> {
    match reply {
        Value::Array(fields) => match fields.as_slice() {
            [Value::Int(count), Value::Int(ttl)] => Ok((*count, *ttl)),
            [_, _] => Err(StorageError::MalformedReply(
                "count and ttl should be integers".to_string(),
            )
            .into()),
            other => Err(StorageError::MalformedReply(format!(
                "two elements in result were expected, got {}",
                other.len()
            ))
            .into()),
        },
        other => Err(StorageError::MalformedReply(format!(
            "expected an array reply, got {:?}",
            other
        ))
        .into()),
    }
}
