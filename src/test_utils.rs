// src/test_utils.rs

use async_trait::async_trait;
use redis::{ErrorKind, RedisError, RedisResult, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::decision::Decision;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::rate::Rate;
use crate::storage::scripts::ScriptKind;
use crate::storage::{CounterStore, ScriptConnection};

pub fn rate(limit: i64, seconds: u64) -> Rate {
    Rate::per_seconds(limit, seconds).unwrap()
}

#[derive(Debug, Default)]
struct Server {
    scripts: HashMap<String, ScriptKind>,
    data: HashMap<String, (i64, Option<Instant>)>,
}

impl Server {
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&mut (i64, Option<Instant>)> {
        let expired = matches!(self.data.get(key), Some((_, Some(at))) if *at <= now);
        if expired {
            self.data.remove(key);
        }
        self.data.get_mut(key)
    }

    fn pttl(expires_at: Option<Instant>, now: Instant) -> i64 {
        match expires_at {
            Some(at) => at.saturating_duration_since(now).as_millis() as i64,
            None => -1,
        }
    }

    // Mirrors the Lua bodies: a single call runs with the server locked
    fn run(&mut self, kind: ScriptKind, key: &str, args: &[i64]) -> Value {
        let now = Instant::now();
        match kind {
            ScriptKind::Increment => {
                let (count, ttl) = (args[0], args[1]);
                let entry = match self.live_entry(key, now) {
                    Some(entry) => {
                        entry.0 += count;
                        *entry
                    }
                    None => {
                        self.data.insert(key.to_string(), (count, None));
                        (count, None)
                    }
                };
                if entry.0 == count {
                    if ttl > 0 {
                        let expires_at = now + Duration::from_millis(ttl as u64);
                        self.data.insert(key.to_string(), (count, Some(expires_at)));
                    }
                    return Value::Array(vec![Value::Int(count), Value::Int(ttl)]);
                }
                Value::Array(vec![Value::Int(entry.0), Value::Int(Self::pttl(entry.1, now))])
            }
            ScriptKind::Peek => match self.live_entry(key, now) {
                Some(&mut (count, expires_at)) => {
                    Value::Array(vec![Value::Int(count), Value::Int(Self::pttl(expires_at, now))])
                }
                None => Value::Array(vec![Value::Int(0), Value::Int(0)]),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    server: Mutex<Server>,
    loads: AtomicUsize,
    evals: AtomicUsize,
    fail_loads: AtomicBool,
    corrupt_replies: AtomicBool,
    eval_errors: Mutex<VecDeque<ErrorKind>>,
    latency: Mutex<Duration>,
}

/// In-process stand-in for a Redis server that only knows the two limiter
/// scripts, with knobs for the failure modes a real server produces.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRedis {
    inner: Arc<Inner>,
}

impl ScriptedRedis {
    pub fn new() -> Self {
        Self::default()
    }

    /// SCRIPT FLUSH: every cached script id becomes unknown.
    pub fn flush_scripts(&self) {
        self.inner.server.lock().unwrap().scripts.clear();
    }

    pub fn fail_loads(&self, fail: bool) {
        self.inner.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Queues a failure: the next EVALSHA not already claimed by an earlier
    /// call fails with `kind` before touching any data.
    pub fn fail_next_eval(&self, kind: ErrorKind) {
        self.inner.eval_errors.lock().unwrap().push_back(kind);
    }

    pub fn corrupt_replies(&self, corrupt: bool) {
        self.inner.corrupt_replies.store(corrupt, Ordering::SeqCst);
    }

    /// Delay added to every EVALSHA reply, after the script has run.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock().unwrap() = latency;
    }

    pub fn loads(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn evals(&self) -> usize {
        self.inner.evals.load(Ordering::SeqCst)
    }

    /// Raw counter value under the full store key.
    pub fn value(&self, key: &str) -> Option<i64> {
        let mut server = self.inner.server.lock().unwrap();
        server.live_entry(key, Instant::now()).map(|entry| entry.0)
    }
}

fn script_id(source: &str) -> String {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[async_trait]
impl ScriptConnection for ScriptedRedis {
    async fn load_script(&self, source: &str) -> RedisResult<String> {
        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_loads.load(Ordering::SeqCst) {
            return Err(RedisError::from((ErrorKind::IoError, "connection refused")));
        }

        let kind = [ScriptKind::Increment, ScriptKind::Peek]
            .into_iter()
            .find(|kind| kind.source() == source)
            .ok_or_else(|| RedisError::from((ErrorKind::ResponseError, "unknown script")))?;

        let sha = script_id(source);
        self.inner
            .server
            .lock()
            .unwrap()
            .scripts
            .insert(sha.clone(), kind);
        Ok(sha)
    }

    async fn eval_sha(&self, sha: &str, keys: &[&str], args: &[i64]) -> RedisResult<Value> {
        self.inner.evals.fetch_add(1, Ordering::SeqCst);
        let injected = self.inner.eval_errors.lock().unwrap().pop_front();
        if let Some(kind) = injected {
            return Err(RedisError::from((kind, "injected failure")));
        }

        let reply = {
            let mut server = self.inner.server.lock().unwrap();
            let script = server.scripts.get(sha).copied();
            match script {
                Some(kind) => Ok(server.run(kind, keys[0], args)),
                None => Err(RedisError::from((
                    ErrorKind::NoScriptError,
                    "No matching script. Please use EVAL.",
                ))),
            }
        };

        let latency = *self.inner.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if reply.is_ok() && self.inner.corrupt_replies.load(Ordering::SeqCst) {
            return Ok(Value::Array(vec![Value::Int(1)]));
        }
        reply
    }

    async fn delete(&self, key: &str) -> RedisResult<i64> {
        let removed = self.inner.server.lock().unwrap().data.remove(key);
        Ok(removed.map_or(0, |_| 1))
    }
}

/// Counter store whose every call fails with a storage error.
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
    async fn peek(&self, _key: &str, _rate: &Rate) -> Result<Decision> {
        Err(unavailable())
    }

    async fn reset(&self, _key: &str, _rate: &Rate) -> Result<Decision> {
        Err(unavailable())
    }

    async fn inc(&self, _key: &str, _count: i64, _rate: &Rate) -> Result<Decision> {
        Err(unavailable())
    }
}

fn unavailable() -> RateLimiterError {
    StorageError::RedisConnection("connection refused".to_string()).into()
}
