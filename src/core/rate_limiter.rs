//! Per-client token bucket admission.
//!
//! Each (service, client) pair gets an independent bucket that refills at
//! `per_second` tokens up to `burst` capacity; every admitted request costs
//! exactly one token and fractional tokens are retained between requests.
//! Buckets are created on a client's first request and live for the process
//! lifetime.
use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use axum::body::Body;
use http::{Request, StatusCode};
use scc::HashMap as ConcurrentMap;

use crate::{
    core::{
        middleware::{plaintext_response, ClientKey, Handler, Middleware, RequestContext},
        runtime::ServiceRuntime,
    },
    ports::metrics::MetricsSink,
};

/// State for one client's bucket. All accounting happens under the owning
/// mutex; holding time is O(1) and never spans I/O.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            capacity,
            rate,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Refill from elapsed time, then try to take one token.
    pub fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (fractional).
    pub fn available(&self) -> f64 {
        self.tokens
    }
}

/// Concurrent map of client-id to bucket for one service.
///
/// Lookups are lock-free; a creation race is resolved single-winner: the
/// loser discards its fresh bucket and uses whichever insert landed first.
pub struct ClientBuckets {
    buckets: ConcurrentMap<String, Arc<Mutex<TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl ClientBuckets {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: ConcurrentMap::new(),
            rate,
            capacity,
        }
    }

    /// Whether limiting is active. A non-positive rate admits everything.
    pub fn enabled(&self) -> bool {
        self.rate > 0.0
    }

    /// Try to admit one request for `client_id`.
    pub async fn try_consume(&self, client_id: &str) -> bool {
        if !self.enabled() {
            return true;
        }

        let bucket = self.bucket(client_id).await;
        let mut bucket = bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        bucket.try_consume()
    }

    async fn bucket(&self, client_id: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(entry) = self.buckets.get_async(client_id).await {
            return Arc::clone(entry.get());
        }

        let fresh = Arc::new(Mutex::new(TokenBucket::new(self.rate, self.capacity)));
        match self
            .buckets
            .insert_async(client_id.to_string(), Arc::clone(&fresh))
            .await
        {
            Ok(()) => fresh,
            // Lost the creation race; take the winner's bucket.
            Err(_) => match self.buckets.get_async(client_id).await {
                Some(entry) => Arc::clone(entry.get()),
                None => fresh,
            },
        }
    }

    /// Number of distinct clients seen so far.
    pub fn client_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Token-bucket admission layer. Rejections cost the client a 429 and bump
/// the `rate_limited_total` counter; the inner handler is not invoked.
pub struct RateLimitMiddleware {
    runtime: Arc<ServiceRuntime>,
    sink: Arc<dyn MetricsSink>,
}

impl RateLimitMiddleware {
    pub fn new(runtime: Arc<ServiceRuntime>, sink: Arc<dyn MetricsSink>) -> Self {
        Self { runtime, sink }
    }
}

impl Middleware for RateLimitMiddleware {
    fn wrap(&self, inner: Handler) -> Handler {
        let runtime = Arc::clone(&self.runtime);
        let sink = Arc::clone(&self.sink);
        Arc::new(move |req| {
            let runtime = Arc::clone(&runtime);
            let sink = Arc::clone(&sink);
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                let client_id = client_identity(&req);
                if runtime.buckets.try_consume(&client_id).await {
                    inner(req).await
                } else {
                    sink.rate_limited_total(runtime.name());
                    tracing::debug!(
                        client = %client_id,
                        service = runtime.name(),
                        "rate limit exceeded"
                    );
                    plaintext_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
                }
            })
        })
    }
}

/// The identity buckets are keyed by: the API key when auth accepted one,
/// otherwise the client's remote IP.
fn client_identity(req: &Request<Body>) -> String {
    if let Some(ClientKey(key)) = req.extensions().get::<ClientKey>() {
        return key.clone();
    }
    req.extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.remote_addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_allows_up_to_burst() {
        let mut bucket = TokenBucket::new(10.0, 5.0);

        // Should allow up to burst (5) requests immediately.
        for _ in 0..5 {
            assert!(bucket.try_consume(), "should allow within burst");
        }

        // The 6th should be denied.
        assert!(!bucket.try_consume(), "should deny beyond burst");
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let mut bucket = TokenBucket::new(1000.0, 3.0);

        for _ in 0..50 {
            bucket.try_consume();
            let tokens = bucket.available();
            assert!((0.0..=3.0).contains(&tokens), "tokens out of bounds: {tokens}");
        }
    }

    #[test]
    fn test_refills_over_time() {
        let mut bucket = TokenBucket::new(10.0, 5.0);

        for _ in 0..5 {
            bucket.try_consume();
        }
        assert!(!bucket.try_consume());

        // 150ms at 10 rps is at least one token.
        std::thread::sleep(Duration::from_millis(150));
        assert!(bucket.try_consume(), "should allow after refill");
    }

    #[test]
    fn test_fractional_tokens_retained() {
        let mut bucket = TokenBucket::new(10.0, 1.0);
        assert!(bucket.try_consume());

        // Half a token refilled; not enough to admit, but not discarded.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!bucket.try_consume());
        assert!(bucket.available() > 0.0);
    }

    #[tokio::test]
    async fn test_independent_clients() {
        let buckets = ClientBuckets::new(10.0, 2.0);

        assert!(buckets.try_consume("a").await);
        assert!(buckets.try_consume("a").await);
        assert!(!buckets.try_consume("a").await);

        // Client b is unaffected.
        assert!(buckets.try_consume("b").await);
        assert_eq!(buckets.client_count(), 2);
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_everything() {
        let buckets = ClientBuckets::new(0.0, 0.0);

        for _ in 0..100 {
            assert!(buckets.try_consume("anyone").await);
        }
        // No buckets are materialized when the limiter is off.
        assert_eq!(buckets.client_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_admissions_respect_capacity() {
        let buckets = Arc::new(ClientBuckets::new(0.001, 8.0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let buckets = Arc::clone(&buckets);
            handles.push(tokio::spawn(async move {
                let mut admitted = 0u32;
                for _ in 0..4 {
                    if buckets.try_consume("shared").await {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        // 64 attempts racing on one 8-token bucket with a negligible refill
        // rate must admit exactly the capacity.
        assert_eq!(total, 8);
        assert_eq!(buckets.client_count(), 1);
    }

    #[test]
    fn test_client_identity_prefers_api_key() {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        req.extensions_mut().insert(RequestContext {
            remote_addr: "10.0.0.7:55555".parse().unwrap(),
        });
        assert_eq!(client_identity(&req), "10.0.0.7");

        req.extensions_mut().insert(ClientKey("k1".to_string()));
        assert_eq!(client_identity(&req), "k1");
    }
}
