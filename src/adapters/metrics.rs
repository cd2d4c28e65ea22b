//! Metrics sink backed by the `metrics` crate macros.
//!
//! The gateway itself never serves an exposition endpoint; whichever
//! recorder the embedding application installs (Prometheus exporter or
//! otherwise) receives these series:
//! * `request_total{method, status, service}` (counter)
//! * `request_duration_seconds{service}` (histogram)
//! * `rate_limited_total{service}` (counter)
//! * `circuit_breaker_state{service}` (gauge; 0=closed, 1=open, 2=half-open)
//! * `proxy_canceled_total{service}` (counter)
use std::time::Duration;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use once_cell::sync::Lazy;

use crate::ports::metrics::MetricsSink;

pub const REQUEST_TOTAL: &str = "request_total";
pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";
pub const RATE_LIMITED_TOTAL: &str = "rate_limited_total";
pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker_state";
pub const PROXY_CANCELED_TOTAL: &str = "proxy_canceled_total";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        REQUEST_TOTAL,
        Unit::Count,
        "Completed responses, including short-circuited ones."
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Wall time from chain entry to response completion."
    );
    describe_counter!(
        RATE_LIMITED_TOTAL,
        Unit::Count,
        "Requests rejected by the token-bucket rate limiter."
    );
    describe_gauge!(
        CIRCUIT_BREAKER_STATE,
        "Circuit breaker state per service (0=closed, 1=open, 2=half-open)."
    );
    describe_counter!(
        PROXY_CANCELED_TOTAL,
        Unit::Count,
        "Outbound exchanges abandoned because the client disconnected."
    );
});

/// Register metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIPTIONS);
}

/// Production [`MetricsSink`] emitting through the `metrics` macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetricsSink;

impl RecorderMetricsSink {
    pub fn new() -> Self {
        init_metrics();
        Self
    }
}

impl MetricsSink for RecorderMetricsSink {
    fn request_total(&self, method: &str, status: u16, service: &str) {
        counter!(
            REQUEST_TOTAL,
            "method" => method.to_string(),
            "status" => status.to_string(),
            "service" => service.to_string()
        )
        .increment(1);
    }

    fn request_duration_seconds(&self, service: &str, duration: Duration) {
        histogram!(REQUEST_DURATION_SECONDS, "service" => service.to_string())
            .record(duration.as_secs_f64());
    }

    fn rate_limited_total(&self, service: &str) {
        counter!(RATE_LIMITED_TOTAL, "service" => service.to_string()).increment(1);
    }

    fn circuit_breaker_state(&self, service: &str, state: f64) {
        gauge!(CIRCUIT_BREAKER_STATE, "service" => service.to_string()).set(state);
    }

    fn proxy_canceled_total(&self, service: &str) {
        counter!(PROXY_CANCELED_TOTAL, "service" => service.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_emits_without_a_recorder() {
        // With no recorder installed the macros are no-ops; the sink must
        // still be callable from every code path.
        let sink = RecorderMetricsSink::new();
        sink.request_total("GET", 200, "users");
        sink.request_duration_seconds("users", Duration::from_millis(5));
        sink.rate_limited_total("users");
        sink.circuit_breaker_state("users", 1.0);
        sink.proxy_canceled_total("users");
    }
}
