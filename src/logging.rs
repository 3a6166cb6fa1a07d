// src/logging.rs

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=info,distributed_limiter=debug
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        tracing::debug!("Logging initialized");
    });
}

/// Logs the outcome of one limiter call.
#[macro_export]
macro_rules! rate_limit_event {
    ($key:expr, $decision:expr) => {
        tracing::debug!(
            key = $key,
            limit = $decision.limit,
            remaining = $decision.remaining,
            reset = $decision.reset,
            reached = $decision.reached,
            "Rate limit check"
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
