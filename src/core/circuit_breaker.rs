//! Per-service circuit breaker.
//!
//! Guards each service's origins behind a three-state gate:
//!
//! - `Closed`: traffic flows; consecutive failures are counted.
//! - `Open`: traffic is rejected until the reset timeout elapses.
//! - `HalfOpen`: a single probe request is admitted to test recovery.
//!
//! A failure is a response with status >= 500 or a transport-level error
//! already surfaced as 502. Client cancellation records nothing.
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use http::StatusCode;

use crate::{
    core::{
        middleware::{plaintext_response, Handler, Middleware},
        runtime::ServiceRuntime,
    },
    ports::metrics::MetricsSink,
};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Rejecting requests until the reset timeout elapses
    Open,
    /// Probing whether the origins recovered
    HalfOpen,
}

impl CircuitState {
    /// Numeric value published to the state gauge.
    pub fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// The decision for one arriving request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Pass through; outcome is counted
    Allowed,
    /// Pass through as the single half-open probe
    Probe,
    /// Short-circuit without invoking the inner handler
    Rejected,
}

// Everything behind one mutex so (state, failures, opened_at) transitions
// appear atomic to observers.
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// A circuit breaker instance. One per service; cheap to share behind an Arc.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decide whether an arriving request may proceed.
    ///
    /// Returns the admission plus the state transition to publish, if this
    /// call caused one (an elapsed reset timeout moves Open to HalfOpen here).
    pub fn admit(&self) -> (Admission, Option<CircuitState>) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => (Admission::Allowed, None),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= self.reset_timeout);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    (Admission::Probe, Some(CircuitState::HalfOpen))
                } else {
                    (Admission::Rejected, None)
                }
            }
            CircuitState::HalfOpen => {
                // Only one probe at a time; everyone else is treated as Open.
                if inner.probe_in_flight {
                    (Admission::Rejected, None)
                } else {
                    inner.probe_in_flight = true;
                    (Admission::Probe, None)
                }
            }
        }
    }

    /// Record a successful inner response (status < 500).
    pub fn record_success(&self) -> Option<CircuitState> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                Some(CircuitState::Closed)
            }
            CircuitState::Open => None,
        }
    }

    /// Record a failed inner response (status >= 500 or transport error).
    pub fn record_failure(&self) -> Option<CircuitState> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    /// Release the probe slot without recording an outcome. Called when the
    /// probe request was cancelled before completing; the breaker stays
    /// HalfOpen and the next arrival becomes the probe.
    pub fn abandon_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Current state (for metrics and diagnostics).
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failure count; only meaningful while Closed.
    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }
}

/// Drop guard releasing the half-open probe slot if the request future is
/// dropped before an outcome was recorded.
pub struct ProbeTicket {
    breaker: Arc<CircuitBreaker>,
    resolved: bool,
}

impl ProbeTicket {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            resolved: false,
        }
    }

    /// Mark the probe as resolved; `record_success`/`record_failure` now owns
    /// the slot.
    pub fn resolve(mut self) {
        self.resolved = true;
    }
}

impl Drop for ProbeTicket {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.abandon_probe();
        }
    }
}

/// Breaker layer for one service's chain. While the breaker is open the
/// inner handler is never invoked and the client sees a 503.
pub struct CircuitBreakerMiddleware {
    runtime: Arc<ServiceRuntime>,
    sink: Arc<dyn MetricsSink>,
}

impl CircuitBreakerMiddleware {
    pub fn new(runtime: Arc<ServiceRuntime>, sink: Arc<dyn MetricsSink>) -> Self {
        Self { runtime, sink }
    }
}

impl Middleware for CircuitBreakerMiddleware {
    fn wrap(&self, inner: Handler) -> Handler {
        let runtime = Arc::clone(&self.runtime);
        let sink = Arc::clone(&self.sink);
        Arc::new(move |req| {
            let runtime = Arc::clone(&runtime);
            let sink = Arc::clone(&sink);
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                let breaker = Arc::clone(&runtime.breaker);
                let (admission, transition) = breaker.admit();
                if let Some(state) = transition {
                    publish_transition(sink.as_ref(), runtime.name(), state);
                }

                match admission {
                    Admission::Rejected => {
                        plaintext_response(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
                    }
                    Admission::Allowed | Admission::Probe => {
                        // If this future is dropped mid-flight (client
                        // disconnect) the ticket releases the probe slot and
                        // no outcome is recorded.
                        let ticket = (admission == Admission::Probe)
                            .then(|| ProbeTicket::new(Arc::clone(&breaker)));

                        let response = inner(req).await;

                        if let Some(ticket) = ticket {
                            ticket.resolve();
                        }
                        let transition = if response.status().as_u16() >= 500 {
                            breaker.record_failure()
                        } else {
                            breaker.record_success()
                        };
                        if let Some(state) = transition {
                            publish_transition(sink.as_ref(), runtime.name(), state);
                        }
                        response
                    }
                }
            })
        })
    }
}

fn publish_transition(sink: &dyn MetricsSink, service: &str, state: CircuitState) {
    sink.circuit_breaker_state(service, state.gauge_value());
    match state {
        CircuitState::Open => tracing::warn!(service, "circuit breaker opened"),
        CircuitState::HalfOpen => {
            tracing::info!(service, "circuit breaker half-open, admitting probe");
        }
        CircuitState::Closed => tracing::info!(service, "circuit breaker closed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(threshold, reset)
    }

    #[test]
    fn test_initial_state_is_closed() {
        let breaker = breaker(3, Duration::from_secs(1));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let breaker = breaker(3, Duration::from_secs(60));

        assert!(breaker.record_failure().is_none());
        assert!(breaker.record_failure().is_none());
        assert_eq!(breaker.record_failure(), Some(CircuitState::Open));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(breaker.admit().0, Admission::Rejected));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = breaker(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        // Two more failures do not trip it; the streak restarted.
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_admits_probe_after_reset_timeout() {
        let breaker = breaker(1, Duration::from_millis(20));
        breaker.record_failure();
        assert!(matches!(breaker.admit().0, Admission::Rejected));

        std::thread::sleep(Duration::from_millis(30));
        let (admission, transition) = breaker.admit();
        assert_eq!(admission, Admission::Probe);
        assert_eq!(transition, Some(CircuitState::HalfOpen));
    }

    #[test]
    fn test_half_open_single_probe() {
        let breaker = breaker(1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(breaker.admit().0, Admission::Probe);
        // A second arrival while the probe is in flight is treated as Open.
        assert_eq!(breaker.admit().0, Admission::Rejected);
    }

    #[test]
    fn test_probe_success_closes() {
        let breaker = breaker(1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(breaker.admit().0, Admission::Probe);
        assert_eq!(breaker.record_success(), Some(CircuitState::Closed));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let breaker = breaker(1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(breaker.admit().0, Admission::Probe);
        assert_eq!(breaker.record_failure(), Some(CircuitState::Open));
        // Fresh open-since timestamp: rejected again immediately.
        assert!(matches!(breaker.admit().0, Admission::Rejected));
    }

    #[test]
    fn test_abandoned_probe_releases_slot() {
        let breaker = Arc::new(breaker(1, Duration::from_millis(10)));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(breaker.admit().0, Admission::Probe);
        let ticket = ProbeTicket::new(Arc::clone(&breaker));
        drop(ticket); // cancelled before an outcome

        // The slot is free again; the next arrival becomes the probe.
        assert_eq!(breaker.admit().0, Admission::Probe);
    }

    #[test]
    fn test_resolved_ticket_does_not_release() {
        let breaker = Arc::new(breaker(1, Duration::from_millis(10)));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(breaker.admit().0, Admission::Probe);
        let ticket = ProbeTicket::new(Arc::clone(&breaker));
        ticket.resolve();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_gauge_values() {
        assert_eq!(CircuitState::Closed.gauge_value(), 0.0);
        assert_eq!(CircuitState::Open.gauge_value(), 1.0);
        assert_eq!(CircuitState::HalfOpen.gauge_value(), 2.0);
    }
}
