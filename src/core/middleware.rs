//! Middleware composition runtime.
//!
//! A middleware is a value that wraps an inner [`Handler`] and returns an
//! outer handler with the same signature. Chains compose right-fold: the
//! configured list `[m1, m2, m3]` over terminal `T` becomes `m1(m2(m3(T)))`,
//! so `m1` runs first on the way in and its post-processing runs last on the
//! way out. The registry maps middleware names to factories; it is populated
//! once at startup and read-only afterwards, and chain building fails fast on
//! any unknown name.
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};

use axum::body::Body;
use futures_util::future::BoxFuture;
use http::{header::CONTENT_TYPE, Request, Response, StatusCode};
use thiserror::Error;

use crate::{
    config::models::ValidKeySet,
    core::{
        auth::AuthMiddleware, circuit_breaker::CircuitBreakerMiddleware,
        rate_limiter::RateLimitMiddleware, runtime::ServiceRuntime,
    },
    ports::metrics::MetricsSink,
};

/// A request handler: the terminal proxy executor, or any middleware-wrapped
/// composition of it.
pub type Handler =
    Arc<dyn Fn(Request<Body>) -> BoxFuture<'static, Response<Body>> + Send + Sync>;

/// A named, per-service middleware layer.
pub trait Middleware: Send + Sync {
    /// Wrap `inner`, returning the composed handler.
    fn wrap(&self, inner: Handler) -> Handler;
}

/// Per-request data resolved at dispatch and carried in request extensions.
/// Middleware layers already know their service through the runtime they are
/// bound to; what they cannot know statically is who connected.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    /// Remote socket address of the client connection
    pub remote_addr: SocketAddr,
}

/// The API key a request authenticated with. Published into request
/// extensions by the auth middleware so the rate limiter can use it as the
/// client identity.
#[derive(Debug, Clone)]
pub struct ClientKey(pub String);

/// Build a short plaintext response, the shape every short-circuiting layer
/// uses.
pub fn plaintext_response(status: StatusCode, message: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message))
        .unwrap_or_else(|_| Response::new(Body::from(message)))
}

/// Everything a middleware factory may need when binding a layer to one
/// service's chain.
pub struct MiddlewareContext {
    pub runtime: Arc<ServiceRuntime>,
    pub keys: Arc<ValidKeySet>,
    pub sink: Arc<dyn MetricsSink>,
}

/// Factory producing a middleware instance bound to one service.
pub type MiddlewareFactory = Box<dyn Fn(&MiddlewareContext) -> Box<dyn Middleware> + Send + Sync>;

/// Errors raised while composing a service chain at startup
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChainError {
    #[error("unknown middleware '{name}' in service '{service}'")]
    UnknownMiddleware { service: String, name: String },
}

/// Name of the built-in instrumentation layer, which composes specially (see
/// [`MiddlewareRegistry::build_chain`]).
pub const METRICS_MIDDLEWARE: &str = "metrics";

/// Registry mapping middleware names to factories.
pub struct MiddlewareRegistry {
    factories: HashMap<String, MiddlewareFactory>,
}

impl Default for MiddlewareRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl MiddlewareRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in layers registered:
    /// `auth`, `rate_limit`, `circuit_breaker`, `metrics`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("auth", Box::new(|ctx: &MiddlewareContext| {
            Box::new(AuthMiddleware::new(Arc::clone(&ctx.keys)))
        }));
        registry.register("rate_limit", Box::new(|ctx: &MiddlewareContext| {
            Box::new(RateLimitMiddleware::new(
                Arc::clone(&ctx.runtime),
                Arc::clone(&ctx.sink),
            ))
        }));
        registry.register("circuit_breaker", Box::new(|ctx: &MiddlewareContext| {
            Box::new(CircuitBreakerMiddleware::new(
                Arc::clone(&ctx.runtime),
                Arc::clone(&ctx.sink),
            ))
        }));
        registry.register(METRICS_MIDDLEWARE, Box::new(|ctx: &MiddlewareContext| {
            Box::new(MetricsMiddleware::new(
                ctx.runtime.name().to_string(),
                Arc::clone(&ctx.sink),
            ))
        }));
        registry
    }

    /// Register a factory under a name. Last registration wins.
    pub fn register(&mut self, name: impl Into<String>, factory: MiddlewareFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Compose the configured middleware list over a terminal handler.
    ///
    /// The `metrics` layer always composes outermost regardless of its
    /// position, so short-circuited responses are still counted and the
    /// duration histogram covers the full chain.
    pub fn build_chain(
        &self,
        names: &[String],
        ctx: &MiddlewareContext,
        terminal: Handler,
    ) -> Result<Handler, ChainError> {
        let mut handler = terminal;
        for name in names.iter().rev() {
            if name == METRICS_MIDDLEWARE {
                continue;
            }
            handler = self.layer(name, ctx)?.wrap(handler);
        }
        if names.iter().any(|name| name == METRICS_MIDDLEWARE) {
            handler = self.layer(METRICS_MIDDLEWARE, ctx)?.wrap(handler);
        }
        Ok(handler)
    }

    fn layer(&self, name: &str, ctx: &MiddlewareContext) -> Result<Box<dyn Middleware>, ChainError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ChainError::UnknownMiddleware {
                service: ctx.runtime.name().to_string(),
                name: name.to_string(),
            })?;
        Ok(factory(ctx))
    }
}

/// Instrumentation layer: one `request_total` increment and one duration
/// observation per completed response.
pub struct MetricsMiddleware {
    service: String,
    sink: Arc<dyn MetricsSink>,
}

impl MetricsMiddleware {
    pub fn new(service: String, sink: Arc<dyn MetricsSink>) -> Self {
        Self { service, sink }
    }
}

impl Middleware for MetricsMiddleware {
    fn wrap(&self, inner: Handler) -> Handler {
        let service = self.service.clone();
        let sink = Arc::clone(&self.sink);
        Arc::new(move |req| {
            let service = service.clone();
            let sink = Arc::clone(&sink);
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                let method = req.method().as_str().to_string();
                let start = Instant::now();
                let response = inner(req).await;
                sink.request_total(&method, response.status().as_u16(), &service);
                sink.request_duration_seconds(&service, start.elapsed());
                response
            })
        })
    }
}
