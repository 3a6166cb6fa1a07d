// library entry
pub mod config;
pub mod decision;
pub mod error;
pub mod keys;
pub mod limiter;
pub mod logging;
pub mod middleware;
pub mod rate;
pub mod storage;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use decision::Decision;
pub use error::{RateLimiterError, Result, StorageError};
pub use limiter::Limiter;
pub use logging::init as init_logging;
pub use middleware::{MiddlewareConfig, RateLimitLayer, RateLimitService};
pub use rate::Rate;
pub use storage::{CounterStore, MemoryStore, RedisStore};
