// src/middleware.rs

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::error;

use crate::decision::Decision;
use crate::error::RateLimiterError;
use crate::keys::{self, KeyExtractor};
use crate::limiter::Limiter;
use crate::storage::CounterStore;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

const LIMIT_REACHED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Builds the response for a request whose limiter call failed.
pub type ErrorHandler = Arc<dyn Fn(&RateLimiterError) -> Response + Send + Sync>;

/// Builds the response for a request that went over its quota.
pub type LimitReachedHandler = Arc<dyn Fn(&Decision) -> Response + Send + Sync>;

#[derive(Clone)]
pub struct MiddlewareConfig {
    pub key_extractor: KeyExtractor,
    pub on_error: ErrorHandler,
    pub on_limit_reached: LimitReachedHandler,
}

impl MiddlewareConfig {
    pub fn new(key_extractor: KeyExtractor) -> Self {
        Self {
            key_extractor,
            ..Self::default()
        }
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = handler;
        self
    }

    pub fn with_limit_reached_handler(mut self, handler: LimitReachedHandler) -> Self {
        self.on_limit_reached = handler;
        self
    }
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            key_extractor: keys::by_ip(),
            on_error: Arc::new(default_error_response),
            on_limit_reached: Arc::new(default_limit_reached_response),
        }
    }
}

impl fmt::Debug for MiddlewareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareConfig").finish_non_exhaustive()
    }
}

fn default_error_response(err: &RateLimiterError) -> Response {
    error!(error = %err, "Rate limiter unavailable");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}

fn default_limit_reached_response(_decision: &Decision) -> Response {
    (StatusCode::TOO_MANY_REQUESTS, LIMIT_REACHED_MESSAGE).into_response()
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset));
}

/// Tower layer charging every request against one limiter.
pub struct RateLimitLayer<S: ?Sized = dyn CounterStore> {
    limiter: Limiter<S>,
    config: MiddlewareConfig,
}

impl<S: CounterStore + ?Sized> RateLimitLayer<S> {
    pub fn new(limiter: Limiter<S>, config: MiddlewareConfig) -> Self {
        Self { limiter, config }
    }
}

impl<S: ?Sized> Clone for RateLimitLayer<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            config: self.config.clone(),
        }
    }
}

impl<I, S: ?Sized> Layer<I> for RateLimitLayer<S> {
    type Service = RateLimitService<I, S>;

    fn layer(&self, inner: I) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            config: self.config.clone(),
        }
    }
}

pub struct RateLimitService<I, S: ?Sized = dyn CounterStore> {
    inner: I,
    limiter: Limiter<S>,
    config: MiddlewareConfig,
}

impl<I: Clone, S: ?Sized> Clone for RateLimitService<I, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            config: self.config.clone(),
        }
    }
}

impl<I, S> Service<Request<Body>> for RateLimitService<I, S>
where
    I: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    I::Future: Send + 'static,
    S: CounterStore + ?Sized + 'static,
{
    type Response = Response;
    type Error = I::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let key = (self.config.key_extractor)(&request);
        let limiter = self.limiter.clone();
        let config = self.config.clone();

        // the clone may not be ready; keep the one poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            if key.trim().is_empty() {
                return inner.call(request).await;
            }

            let decision = match limiter.get(&key).await {
                Ok(decision) => decision,
                Err(err) => return Ok((config.on_error)(&err)),
            };

            let mut response = if decision.reached {
                (config.on_limit_reached)(&decision)
            } else {
                inner.call(request).await?
            };
            apply_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}
