//! End-to-end rate limiting: burst exhaustion, refill, and client isolation.
mod common;

use std::{sync::Arc, time::Duration};

use http::StatusCode;

use common::{
    build_gateway, client_addr, gateway_config, get, service, spawn_tagged_origin, RecordingSink,
};

#[tokio::test(flavor = "multi_thread")]
async fn burst_then_429_then_refill() {
    let origin = spawn_tagged_origin("a").await;
    let mut api = service("api", "/api", vec![origin.url.clone()]);
    api.middlewares = vec!["rate_limit".to_string(), "metrics".to_string()];
    api.rate_limit.per_second = 1.0;
    api.rate_limit.burst = 2;

    let sink = Arc::new(RecordingSink::default());
    let gateway = build_gateway(gateway_config(vec![], vec![api]), sink.clone());

    // Two tokens of burst, then empty.
    for _ in 0..2 {
        let response = gateway.handle(get("/api/x", None), client_addr()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = gateway.handle(get("/api/x", None), client_addr()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(origin.hit_count(), 2);
    assert_eq!(sink.rate_limited.load(std::sync::atomic::Ordering::SeqCst), 1);

    // One token refills within 1.1s at 1 rps.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let response = gateway.handle(get("/api/x", None), client_addr()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(origin.hit_count(), 3);

    assert_eq!(sink.statuses_for("api"), vec![200, 200, 429, 200]);
}

#[tokio::test(flavor = "multi_thread")]
async fn api_keys_get_separate_buckets() {
    let origin = spawn_tagged_origin("a").await;
    let mut api = service("api", "/api", vec![origin.url.clone()]);
    api.middlewares = vec!["auth".to_string(), "rate_limit".to_string()];
    api.rate_limit.per_second = 0.001;
    api.rate_limit.burst = 1;

    let gateway = build_gateway(
        gateway_config(vec!["k1", "k2"], vec![api]),
        Arc::new(RecordingSink::default()),
    );

    // Both clients connect from the same address but burn independent buckets.
    let response = gateway.handle(get("/api/x", Some("k1")), client_addr()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = gateway.handle(get("/api/x", Some("k1")), client_addr()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = gateway.handle(get("/api/x", Some("k2")), client_addr()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_limiter_admits_everything() {
    let origin = spawn_tagged_origin("a").await;
    let mut api = service("api", "/api", vec![origin.url.clone()]);
    api.middlewares = vec!["rate_limit".to_string()];
    api.rate_limit.per_second = 0.0;
    api.rate_limit.burst = 0;

    let gateway = build_gateway(gateway_config(vec![], vec![api]), Arc::new(RecordingSink::default()));

    for _ in 0..20 {
        let response = gateway.handle(get("/api/x", None), client_addr()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(origin.hit_count(), 20);
}
