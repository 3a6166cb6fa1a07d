use axum::routing::get;
use axum::{Json, Router};
use dotenv::dotenv;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use distributed_limiter::config::AppConfig;
use distributed_limiter::storage::{connect, CounterStore, RedisStore};
use distributed_limiter::{
    init_logging, keys, Limiter, MiddlewareConfig, Rate, RateLimitLayer, RateLimiterError, Result,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    if let Err(err) = run().await {
        error!(error = %err, "Server stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;
    debug!(
        key_prefix = %config.store.key_prefix,
        timeout = ?config.store.timeout,
        "Configuration loaded"
    );

    let connection = connect(&config.redis).await?;
    let store: Arc<dyn CounterStore> =
        Arc::new(RedisStore::new(connection, config.store.clone()).await?);

    let rate_by_ip = Rate::try_from(&config.rate_by_ip)?;
    let rate_by_token = Rate::try_from(&config.rate_by_token)?;
    let by_ip = Limiter::new(Arc::clone(&store), rate_by_ip);
    let by_token = Limiter::new(store, rate_by_token);

    // token layer runs first; the IP layer skips requests carrying a token
    let app = Router::new()
        .route("/", get(index))
        .layer(RateLimitLayer::new(
            by_ip,
            MiddlewareConfig::new(keys::by_ip_without_token()),
        ))
        .layer(RateLimitLayer::new(
            by_token,
            MiddlewareConfig::new(keys::by_token()),
        ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app_port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RateLimiterError::Config(format!("cannot bind {}: {}", addr, e)))?;

    info!(
        %addr,
        ip_limit = rate_by_ip.limit(),
        token_limit = rate_by_token.limit(),
        window = ?rate_by_ip.period(),
        "Server is running"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| RateLimiterError::Internal(e.to_string()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for Ctrl-C");
    }
    info!("Shutting down");
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "ok" }))
}
