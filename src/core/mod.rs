pub mod auth;
pub mod circuit_breaker;
pub mod gateway;
pub mod middleware;
pub mod proxy;
pub mod rate_limiter;
pub mod runtime;
pub mod selector;

pub use gateway::GatewayService;
pub use middleware::MiddlewareRegistry;
pub use runtime::ServiceRuntime;
