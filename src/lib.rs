//! Portcullis - a reverse-proxy API gateway.
//!
//! Portcullis terminates client HTTP connections, runs each request through a
//! per-service middleware chain, and forwards survivors to one of the
//! service's origins over a shared, pooled transport. It follows a
//! **hexagonal architecture**: business logic lives in `core`, traits the
//! core consumes live in `ports`, and concrete integrations (Hyper transport,
//! metrics recorder, Axum entry point) live in `adapters`. This library
//! exposes the building blocks so you can embed the gateway or compose parts
//! of it inside your own application.
//!
//! # Features
//! - Path-prefix routing (longest prefix wins) to named services
//! - Per-service middleware chains composed from a name -> factory registry:
//!   `auth`, `rate_limit`, `circuit_breaker`, `metrics`
//! - API-key authentication against a static key set
//! - Token-bucket rate limiting keyed per client (API key, else remote IP)
//! - A three-state circuit breaker per service with single-probe recovery
//! - Round-robin origin selection over each service's origin list
//! - Shared connection-pooled outbound transport with cancellation
//!   propagation
//! - Metrics emission behind a narrow sink trait & structured tracing via
//!   `tracing`
//! - Graceful shutdown draining in-flight requests
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use portcullis::{
//!     config::GatewayConfig,
//!     ports::{http_client::HttpClient, metrics::MetricsSink},
//!     GatewayService, RecorderMetricsSink, SharedTransport,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! // Load a configuration (see `portcullis init` for a starter file)
//! let config: GatewayConfig = portcullis::config::loader::load_config("gateway.yaml").await?;
//! let transport: Arc<dyn HttpClient> = Arc::new(SharedTransport::new()?);
//! let sink: Arc<dyn MetricsSink> = Arc::new(RecorderMetricsSink::new());
//! let gateway = Arc::new(GatewayService::new(Arc::new(config), transport, sink)?);
//! // Wire `gateway` into the provided Axum adapter (see the binary crate)
//! let app = portcullis::adapters::app(gateway);
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Fallible APIs return `eyre::Result<T>` or a domain specific error type
//! built with `thiserror`. Startup errors (unknown middleware, empty origin
//! lists, invalid addresses) fail fast before the listener accepts traffic.
//!
//! # Concurrency & Data Structures
//! For shared mutable maps the project uses `scc::HashMap` to maintain
//! predictable performance characteristics under contention; single-value
//! state (circuit breakers, token buckets) sits behind short-lived mutexes
//! that never span I/O.
//!
//! # License
//! Dual-licensed under either MIT or Apache-2.0 at your option.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details for most users; prefer the
// re-exports below.
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpHandler, RecorderMetricsSink, SharedTransport},
    core::{GatewayService, MiddlewareRegistry},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
