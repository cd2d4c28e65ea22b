//! Configuration data structures for Portcullis.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files.
//! They are intentionally serde-friendly and include defaults so that minimal
//! configs remain concise. The whole tree is immutable after startup; the
//! gateway never reloads it.
use std::{collections::HashSet, time::Duration};

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// The address to listen on, e.g. "127.0.0.1:8080"
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Accepted API keys; requests carrying one of these in `X-API-KEY`
    /// pass the auth middleware
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// The services this gateway fronts, in configuration order
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_keys: Vec::new(),
            services: Vec::new(),
        }
    }
}

/// Per-service configuration: where requests match, where they go, and which
/// middleware run in between.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Service name, used as the metrics label
    pub name: String,
    /// URL path prefix this service claims (longest prefix wins)
    pub prefix: String,
    /// Ordered origin URLs requests are distributed over
    pub origins: Vec<String>,
    /// Ordered middleware names applied to every request
    #[serde(default = "default_middlewares")]
    pub middlewares: Vec<String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_middlewares() -> Vec<String> {
    vec![
        "auth".to_string(),
        "rate_limit".to_string(),
        "circuit_breaker".to_string(),
        "metrics".to_string(),
    ]
}

/// Token-bucket rate limit settings for one service.
///
/// A non-positive `per_second` disables the limiter for the service.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained admission rate in requests per second
    pub per_second: f64,
    /// Bucket capacity (maximum burst)
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 0.0,
            burst: 0,
        }
    }
}

/// Circuit breaker settings for one service.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open
    pub failure_threshold: u32,
    /// How long an open breaker waits before admitting a probe,
    /// e.g. "30s" or "1m"
    pub reset_timeout: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: "30s".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Parse the configured reset timeout.
    pub fn parsed_reset_timeout(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.reset_timeout)
    }
}

/// The set of API keys the auth middleware accepts. Membership is O(1).
#[derive(Debug, Clone, Default)]
pub struct ValidKeySet {
    keys: HashSet<String>,
}

impl ValidKeySet {
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
