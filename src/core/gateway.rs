//! Core gateway orchestration service.
//!
//! The `GatewayService` turns an immutable [`GatewayConfig`] into runnable
//! per-service chains: for each configured service it materializes a
//! [`ServiceRuntime`], binds the proxy executor to it, composes the
//! configured middleware on top, and registers the result under the
//! service's route prefix. Dispatch is longest-matching-prefix with
//! configuration order breaking ties.
//!
//! This layer performs no I/O of its own; everything that touches the
//! network hides behind the [`HttpClient`] port, which keeps the whole
//! request plane testable in isolation.
use std::{net::SocketAddr, sync::Arc};

use axum::body::Body;
use http::{Request, Response, StatusCode};
use thiserror::Error;

use crate::{
    config::models::{GatewayConfig, ValidKeySet},
    core::{
        middleware::{
            plaintext_response, ChainError, Handler, MiddlewareContext, MiddlewareRegistry,
            RequestContext,
        },
        proxy::ProxyExecutor,
        runtime::{RuntimeBuildError, ServiceRuntime},
    },
    ports::{http_client::HttpClient, metrics::MetricsSink},
};

/// Errors raised while building the gateway at startup
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayBuildError {
    #[error(transparent)]
    Runtime(#[from] RuntimeBuildError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

struct RouteBinding {
    prefix: String,
    service: String,
    runtime: Arc<ServiceRuntime>,
    handler: Handler,
}

/// Central dispatcher for the request plane. Built once at startup and
/// immutable afterwards; an instance is cheap to share behind an Arc.
pub struct GatewayService {
    routes: Vec<RouteBinding>,
}

impl GatewayService {
    /// Build a gateway with the built-in middleware registry.
    pub fn new(
        config: Arc<GatewayConfig>,
        client: Arc<dyn HttpClient>,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self, GatewayBuildError> {
        let registry = MiddlewareRegistry::with_builtins();
        Self::with_registry(config, &registry, client, sink)
    }

    /// Build a gateway with a caller-supplied middleware registry.
    pub fn with_registry(
        config: Arc<GatewayConfig>,
        registry: &MiddlewareRegistry,
        client: Arc<dyn HttpClient>,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self, GatewayBuildError> {
        let keys = Arc::new(ValidKeySet::from_keys(config.api_keys.iter().cloned()));

        let mut routes = Vec::with_capacity(config.services.len());
        for service in &config.services {
            let runtime = Arc::new(ServiceRuntime::new(service.clone())?);
            let terminal = ProxyExecutor::new(
                Arc::clone(&runtime),
                Arc::clone(&client),
                Arc::clone(&sink),
            )
            .into_handler();

            let ctx = MiddlewareContext {
                runtime: Arc::clone(&runtime),
                keys: Arc::clone(&keys),
                sink: Arc::clone(&sink),
            };
            let handler = registry.build_chain(&service.middlewares, &ctx, terminal)?;

            tracing::info!(
                service = %service.name,
                prefix = %service.prefix,
                origins = service.origins.len(),
                middlewares = ?service.middlewares,
                "service chain built"
            );

            routes.push(RouteBinding {
                prefix: runtime.prefix().to_string(),
                service: runtime.name().to_string(),
                runtime,
                handler,
            });
        }

        // Longest prefix wins; the stable sort keeps configuration order
        // between equal-length prefixes.
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Ok(Self { routes })
    }

    /// Longest-prefix match for an incoming path.
    fn resolve(&self, path: &str) -> Option<&RouteBinding> {
        self.routes
            .iter()
            .find(|binding| path.starts_with(&binding.prefix))
    }

    /// Run one request through the matched service's chain.
    pub async fn handle(&self, mut req: Request<Body>, remote_addr: SocketAddr) -> Response<Body> {
        let path = req.uri().path().to_owned();
        let Some(binding) = self.resolve(&path) else {
            tracing::debug!(%path, "no route match");
            return plaintext_response(StatusCode::NOT_FOUND, "no matching service");
        };

        req.extensions_mut().insert(RequestContext { remote_addr });
        (binding.handler)(req).await
    }

    /// Name of the service a path would dispatch to (diagnostics).
    pub fn service_for_path(&self, path: &str) -> Option<&str> {
        self.resolve(path).map(|binding| binding.service.as_str())
    }

    /// The runtime backing a named service (diagnostics and tests).
    pub fn service_runtime(&self, service: &str) -> Option<Arc<ServiceRuntime>> {
        self.routes
            .iter()
            .find(|binding| binding.service == service)
            .map(|binding| Arc::clone(&binding.runtime))
    }

    /// Number of bound routes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}
