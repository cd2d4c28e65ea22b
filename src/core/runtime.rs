use std::sync::Arc;

use thiserror::Error;

use crate::{
    config::models::ServiceConfig,
    core::{
        circuit_breaker::CircuitBreaker,
        rate_limiter::ClientBuckets,
        selector::{OriginSelector, SelectorError},
    },
};

/// Errors raised while materializing a service's runtime state at startup
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RuntimeBuildError {
    #[error("service '{service}': {source}")]
    Selector {
        service: String,
        source: SelectorError,
    },

    #[error("service '{service}': invalid reset_timeout '{value}': {source}")]
    ResetTimeout {
        service: String,
        value: String,
        source: humantime::DurationError,
    },
}

/// Mutable per-service state, one instance per configured service for the
/// process lifetime: the round-robin selector, the circuit breaker, and the
/// per-client token buckets. Services sharing an origin list still get
/// independent instances of all three.
pub struct ServiceRuntime {
    config: ServiceConfig,
    pub selector: OriginSelector,
    pub breaker: Arc<CircuitBreaker>,
    pub buckets: ClientBuckets,
}

impl ServiceRuntime {
    pub fn new(config: ServiceConfig) -> Result<Self, RuntimeBuildError> {
        let selector =
            OriginSelector::new(config.origins.clone()).map_err(|source| {
                RuntimeBuildError::Selector {
                    service: config.name.clone(),
                    source,
                }
            })?;

        let reset_timeout = config.circuit_breaker.parsed_reset_timeout().map_err(|source| {
            RuntimeBuildError::ResetTimeout {
                service: config.name.clone(),
                value: config.circuit_breaker.reset_timeout.clone(),
                source,
            }
        })?;

        let breaker = Arc::new(CircuitBreaker::new(
            config.circuit_breaker.failure_threshold,
            reset_timeout,
        ));
        let buckets = ClientBuckets::new(
            config.rate_limit.per_second,
            f64::from(config.rate_limit.burst),
        );

        Ok(Self {
            config,
            selector,
            breaker,
            buckets,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }
}
