// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RateLimiterError, Result};

/// Common configuration for every counter store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key prefix to use for all keys in storage
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound for a single store round trip
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

fn default_key_prefix() -> String {
    "limiter".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            timeout: default_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: prefix.into(),
            ..Self::default()
        }
    }
}

/// Configuration for one fixed window quota
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    /// Maximum number of requests allowed in the window
    pub max_requests: u64,

    /// Window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

/// Configuration for Redis connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: default_conn_timeout(),
        }
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// Process configuration of the HTTP server, read from the environment.
///
/// Variables (a `.env` file is honoured when the binary loads it first):
///
/// | variable                       | default        |
/// |--------------------------------|----------------|
/// | `APP_PORT`                     | `8080`         |
/// | `REDIS_URL`                    | built from the host/port/password/db below |
/// | `REDIS_HOST`                   | `localhost`    |
/// | `REDIS_PORT`                   | `6379`         |
/// | `REDIS_PASSWORD`               | none           |
/// | `REDIS_DB`                     | `0`            |
/// | `RATE_MAX_REQUESTS_BY_IP`      | `10`           |
/// | `RATE_MAX_REQUESTS_BY_TOKEN`   | `100`          |
/// | `RATE_PERIOD_WINDOW_SECONDS`   | `1`            |
/// | `RATE_LIMITER_KEY_PREFIX`      | `limiter_http` |
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_port: u16,
    pub redis: RedisConfig,
    pub store: StoreConfig,
    pub rate_by_ip: FixedWindowConfig,
    pub rate_by_token: FixedWindowConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_port = parsed(&lookup, "APP_PORT", 8080u16)?;

        let url = match non_empty(&lookup, "REDIS_URL") {
            Some(url) => url,
            None => {
                let host = non_empty(&lookup, "REDIS_HOST").unwrap_or_else(|| "localhost".into());
                let port = parsed(&lookup, "REDIS_PORT", 6379u16)?;
                let db = parsed(&lookup, "REDIS_DB", 0u32)?;
                match non_empty(&lookup, "REDIS_PASSWORD") {
                    Some(password) => format!("redis://:{}@{}:{}/{}", password, host, port, db),
                    None => format!("redis://{}:{}/{}", host, port, db),
                }
            }
        };

        let window = Duration::from_secs(parsed(&lookup, "RATE_PERIOD_WINDOW_SECONDS", 1u64)?);
        let rate_by_ip = FixedWindowConfig {
            max_requests: parsed(&lookup, "RATE_MAX_REQUESTS_BY_IP", 10u64)?,
            window,
        };
        let rate_by_token = FixedWindowConfig {
            max_requests: parsed(&lookup, "RATE_MAX_REQUESTS_BY_TOKEN", 100u64)?,
            window,
        };

        let store = StoreConfig {
            key_prefix: non_empty(&lookup, "RATE_LIMITER_KEY_PREFIX")
                .unwrap_or_else(|| "limiter_http".into()),
            ..StoreConfig::default()
        };

        Ok(Self {
            app_port,
            redis: RedisConfig::new(url),
            store,
            rate_by_ip,
            rate_by_token,
        })
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match non_empty(lookup, name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| RateLimiterError::Config(format!("invalid value for {}: {:?}", name, raw))),
        None => Ok(default),
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
