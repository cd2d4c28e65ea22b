use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    response::Response,
    routing::any,
    Router,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::{core::GatewayService, tracing_setup};

/// HTTP entry point binding the gateway's dispatcher to the Axum server:
/// wraps every inbound request in a tracing span, dispatches it, and logs
/// the outcome with timing.
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self { gateway }
    }

    /// Handle one inbound request.
    pub async fn handle_request(
        &self,
        req: Request<Body>,
        client_addr: SocketAddr,
    ) -> Response<Body> {
        let start_time = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let request_id = Uuid::new_v4().to_string();
        let client_ip = client_addr.ip().to_string();

        let span = tracing_setup::create_request_span(
            method.as_str(),
            &path,
            &request_id,
            Some(&client_ip),
        );

        let response = self
            .gateway
            .handle(req, client_addr)
            .instrument(span.clone())
            .await;

        let duration = start_time.elapsed();
        span.record("http.status_code", response.status().as_u16());
        span.record("duration_ms", duration.as_millis() as u64);

        tracing::info!(
            parent: &span,
            status = response.status().as_u16(),
            duration_ms = duration.as_millis() as u64,
            "request completed"
        );

        response
    }
}

impl Clone for HttpHandler {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
        }
    }
}

/// Build the Axum application serving the gateway: every path, every method.
pub fn app(gateway: Arc<GatewayService>) -> Router {
    let handler = Arc::new(HttpHandler::new(gateway));

    let make_route = |handler: Arc<HttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = Arc::clone(&handler);
                async move { handler.handle_request(req, client_addr).await }
            },
        )
    };

    Router::new()
        .route("/{*path}", make_route(Arc::clone(&handler)))
        .route("/", make_route(handler))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::StatusCode;

    use super::*;
    use crate::{
        config::models::GatewayConfig,
        ports::{http_client::HttpClient, metrics::NoopMetricsSink},
    };

    struct UnreachableClient;

    #[async_trait::async_trait]
    impl HttpClient for UnreachableClient {
        async fn send_request(
            &self,
            _req: hyper::Request<Body>,
        ) -> crate::ports::http_client::HttpClientResult<hyper::Response<Body>> {
            unreachable!("no service is configured, nothing should be forwarded")
        }
    }

    #[tokio::test]
    async fn test_handler_returns_404_for_empty_config() {
        let gateway = Arc::new(
            GatewayService::new(
                Arc::new(GatewayConfig::default()),
                Arc::new(UnreachableClient),
                Arc::new(NoopMetricsSink),
            )
            .unwrap(),
        );
        let handler = HttpHandler::new(gateway);

        let req = http::Request::builder()
            .uri("/missing")
            .body(Body::empty())
            .unwrap();
        let response = handler
            .handle_request(req, "127.0.0.1:5000".parse().unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
