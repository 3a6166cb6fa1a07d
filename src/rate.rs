// src/rate.rs

use chrono::TimeDelta;
use std::time::Duration;

use crate::config::FixedWindowConfig;
use crate::error::{RateLimiterError, Result};

/// A quota: at most `limit` units of work per fixed `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    limit: i64,
    period: Duration,
}

impl Rate {
    /// Creates a rate, rejecting a non-positive limit and periods under one
    /// millisecond (the store expires counters with millisecond precision).
    pub fn new(limit: i64, period: Duration) -> Result<Self> {
        if limit <= 0 {
            return Err(RateLimiterError::InvalidArgument(format!(
                "rate limit must be positive, got {}",
                limit
            )));
        }
        if period.as_millis() == 0 {
            return Err(RateLimiterError::InvalidArgument(format!(
                "rate period must be at least 1ms, got {:?}",
                period
            )));
        }
        if i64::try_from(period.as_millis()).is_err() {
            return Err(RateLimiterError::InvalidArgument(format!(
                "rate period {:?} is too large",
                period
            )));
        }

        Ok(Self { limit, period })
    }

    pub fn per_seconds(limit: i64, seconds: u64) -> Result<Self> {
        Self::new(limit, Duration::from_secs(seconds))
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Window length in milliseconds, as handed to PEXPIRE.
    pub fn period_millis(&self) -> i64 {
        // bounded by the check in `new`
        self.period.as_millis() as i64
    }

    pub(crate) fn period_delta(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.period_millis())
    }
}

impl TryFrom<&FixedWindowConfig> for Rate {
    type Error = RateLimiterError;

    fn try_from(config: &FixedWindowConfig) -> Result<Self> {
        let limit = i64::try_from(config.max_requests).map_err(|_| {
            RateLimiterError::Config(format!("max_requests {} is too large", config.max_requests))
        })?;
        Rate::new(limit, config.window)
    }
}
