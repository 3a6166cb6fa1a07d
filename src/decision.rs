// src/decision.rs

use chrono::{DateTime, TimeDelta, Utc};

use crate::rate::Rate;

/// Snapshot of a key's quota at one instant.
///
/// Reaching the limit is an ordinary decision with `reached == true`, never an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Maximum units allowed in the window
    pub limit: i64,

    /// Units still available in the current window
    pub remaining: i64,

    /// Unix timestamp (seconds) at which the window closes
    pub reset: i64,

    /// Whether the triggering call went over the limit
    pub reached: bool,
}

impl Decision {
    /// Derives a decision from raw counter state.
    ///
    /// Every backend goes through this function so swapping stores never
    /// changes observable semantics.
    pub fn from_state(rate: &Rate, expiration: DateTime<Utc>, count: i64) -> Self {
        let limit = rate.limit();
        let (remaining, reached) = if count <= limit {
            (limit - count, false)
        } else {
            (0, true)
        };

        Self {
            limit,
            remaining,
            reset: expiration.timestamp(),
            reached,
        }
    }

    /// The decision for a window nobody has consumed from yet.
    pub fn fresh(rate: &Rate, now: DateTime<Utc>) -> Self {
        Self::from_state(rate, saturating_add(now, rate.period_delta()), 0)
    }
}

/// Expiration time of a counter given the TTL the store reported.
///
/// A non-positive TTL (counter just created, or carrying no expiry) falls back
/// to `now + period`. That is an approximation of the true expiry, close enough
/// for a fixed window.
pub fn expiry_from_ttl(now: DateTime<Utc>, rate: &Rate, ttl_millis: i64) -> DateTime<Utc> {
    if ttl_millis > 0 {
        saturating_add(now, TimeDelta::milliseconds(ttl_millis))
    } else {
        saturating_add(now, rate.period_delta())
    }
}

fn saturating_add(now: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
