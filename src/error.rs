// for error definitions
use std::time::Duration;

use redis;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// Errors related to the counter store backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller-supplied value the limiter cannot work with
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// The server no longer caches a script we evaluate by id (NOSCRIPT)
    #[error("Server-side script missing: {0}")]
    ScriptMissing(String),

    /// Registering a script with the server failed
    #[error("Failed to load \"{script}\" script: {reason}")]
    ScriptLoad { script: &'static str, reason: String },

    /// The store answered with a reply of the wrong shape
    #[error("Malformed store reply: {0}")]
    MalformedReply(String),

    /// A round trip did not complete within the configured timeout
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The in-memory store refused a new counter
    #[error("Maximum entries limit exceeded ({0})")]
    CapacityExceeded(usize),
}

impl RateLimiterError {
    /// True when the failure means a cached script must be registered again.
    pub fn is_script_missing(&self) -> bool {
        matches!(self, RateLimiterError::Storage(StorageError::ScriptMissing(_)))
    }
}

impl From<StorageError> for RateLimiterError {
    fn from(err: StorageError) -> Self {
        RateLimiterError::Storage(err)
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::NoScriptError => {
                RateLimiterError::Storage(StorageError::ScriptMissing(err.to_string()))
            }
            redis::ErrorKind::AuthenticationFailed => {
                // authentication errors
                RateLimiterError::Storage(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                // Connection-related errors
                RateLimiterError::Storage(StorageError::RedisConnection(err.to_string()))
            }
            redis::ErrorKind::TypeError => {
                RateLimiterError::Storage(StorageError::MalformedReply(err.to_string()))
            }
            _ => {
                // Command/operation related errors
                RateLimiterError::Storage(StorageError::RedisCommand(err.to_string()))
            }
        }
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
