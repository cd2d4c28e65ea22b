//! Shared helpers for the integration tests: ephemeral-port origin servers,
//! a recording metrics sink, and gateway construction shorthand.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{body::Body, extract::Request, response::Response, Router};
use http_body_util::BodyExt;
use portcullis::{
    config::{CircuitBreakerConfig, GatewayConfig, RateLimitConfig, ServiceConfig},
    core::GatewayService,
    ports::{http_client::HttpClient, metrics::MetricsSink},
    SharedTransport,
};

/// A spawned origin server plus its observed hit count.
pub struct Origin {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
}

impl Origin {
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Wait until the origin has seen at least `n` requests.
    pub async fn wait_for_hits(&self, n: usize) {
        for _ in 0..200 {
            if self.hit_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("origin never saw {n} request(s), got {}", self.hit_count());
    }
}

/// Spawn an origin on an ephemeral port. The handler runs for every request;
/// hits are counted before it is invoked.
pub async fn spawn_origin<F, Fut>(handler: F) -> Origin
where
    F: Fn(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response> + Send + 'static,
{
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_for_handler = Arc::clone(&hits);

    let app = Router::new().fallback(move |req: Request| {
        let handler = handler.clone();
        let hits = Arc::clone(&hits_for_handler);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            handler(req).await
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Origin {
        url: format!("http://{addr}"),
        hits,
    }
}

/// Origin answering 200 with an identifying header and body.
pub async fn spawn_tagged_origin(tag: &'static str) -> Origin {
    spawn_origin(move |_req| async move {
        Response::builder()
            .status(200)
            .header("x-origin", tag)
            .body(Body::from(tag))
            .unwrap()
    })
    .await
}

/// Metrics sink double recording every observation.
#[derive(Default)]
pub struct RecordingSink {
    pub requests: Mutex<Vec<(String, u16, String)>>,
    pub rate_limited: AtomicUsize,
    pub canceled: AtomicUsize,
    pub breaker_states: Mutex<Vec<(String, f64)>>,
}

impl RecordingSink {
    pub fn statuses_for(&self, service: &str) -> Vec<u16> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, s)| s == service)
            .map(|(_, status, _)| *status)
            .collect()
    }

    pub fn breaker_states_for(&self, service: &str) -> Vec<f64> {
        self.breaker_states
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == service)
            .map(|(_, state)| *state)
            .collect()
    }
}

impl MetricsSink for RecordingSink {
    fn request_total(&self, method: &str, status: u16, service: &str) {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), status, service.to_string()));
    }

    fn request_duration_seconds(&self, _service: &str, _duration: Duration) {}

    fn rate_limited_total(&self, _service: &str) {
        self.rate_limited.fetch_add(1, Ordering::SeqCst);
    }

    fn circuit_breaker_state(&self, service: &str, state: f64) {
        self.breaker_states
            .lock()
            .unwrap()
            .push((service.to_string(), state));
    }

    fn proxy_canceled_total(&self, _service: &str) {
        self.canceled.fetch_add(1, Ordering::SeqCst);
    }
}

/// A service config with limiter and breaker effectively out of the way.
pub fn service(name: &str, prefix: &str, origins: Vec<String>) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        prefix: prefix.to_string(),
        origins,
        middlewares: vec!["metrics".to_string()],
        rate_limit: RateLimitConfig {
            per_second: 0.0,
            burst: 0,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 1_000,
            reset_timeout: "60s".to_string(),
        },
    }
}

pub fn gateway_config(api_keys: Vec<&str>, services: Vec<ServiceConfig>) -> GatewayConfig {
    GatewayConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        api_keys: api_keys.into_iter().map(String::from).collect(),
        services,
    }
}

pub fn build_gateway(config: GatewayConfig, sink: Arc<dyn MetricsSink>) -> Arc<GatewayService> {
    let transport: Arc<dyn HttpClient> = Arc::new(SharedTransport::new().unwrap());
    Arc::new(GatewayService::new(Arc::new(config), transport, sink).unwrap())
}

pub fn client_addr() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

/// Build a GET request, optionally carrying an API key.
pub fn get(path: &str, api_key: Option<&str>) -> Request {
    let mut builder = http::Request::builder().uri(path);
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
