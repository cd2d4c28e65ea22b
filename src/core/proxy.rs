//! Terminal proxy executor.
//!
//! Every chain ends here: pick an origin, rebuild the request against it,
//! forward it over the shared transport, and stream the response back.
//! Transport-level failures surface as 502; a client that disconnects before
//! the origin answers cancels the outbound exchange and is counted in
//! `proxy_canceled_total` without touching the breaker.
use std::sync::Arc;

use axum::body::Body;
use http::{
    header::{HeaderMap, HeaderName, CONNECTION},
    Request, Response, StatusCode, Uri, Version,
};
use futures_util::future::BoxFuture;

use crate::{
    core::{
        middleware::{plaintext_response, Handler},
        runtime::ServiceRuntime,
    },
    ports::{http_client::HttpClient, metrics::MetricsSink},
};

/// Hop-by-hop headers (RFC 7230 §6.1): meaningful for a single transport
/// connection only, never forwarded in either direction.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any header the `Connection` header
/// names as connection-scoped.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let connection_named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| token.trim().parse::<HeaderName>().ok())
        .collect();

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
    for name in connection_named {
        headers.remove(name);
    }
}

/// Forwards one request to one origin chosen by the service's selector.
/// The gateway never retries: one inbound request produces at most one
/// outbound origin call.
pub struct ProxyExecutor {
    runtime: Arc<ServiceRuntime>,
    client: Arc<dyn HttpClient>,
    sink: Arc<dyn MetricsSink>,
}

impl ProxyExecutor {
    pub fn new(
        runtime: Arc<ServiceRuntime>,
        client: Arc<dyn HttpClient>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            runtime,
            client,
            sink,
        }
    }

    /// Convert into the [`Handler`] terminating a service chain.
    pub fn into_handler(self) -> Handler {
        let executor = Arc::new(self);
        Arc::new(move |req| {
            let executor = Arc::clone(&executor);
            let fut: BoxFuture<'static, Response<Body>> =
                Box::pin(async move { executor.execute(req).await });
            fut
        })
    }

    async fn execute(&self, req: Request<Body>) -> Response<Body> {
        // Armed until a response (or 502) is produced; firing on drop means
        // the client went away while the origin exchange was in flight.
        let guard = CancelGuard::new(self.runtime.name().to_string(), Arc::clone(&self.sink));

        let origin = self.runtime.selector.select();
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        let outbound_uri: Uri = match format!("{origin}{path_and_query}").parse() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(origin, error = %e, "failed to build outbound URI");
                guard.disarm();
                return plaintext_response(StatusCode::BAD_GATEWAY, "bad gateway");
            }
        };

        tracing::debug!(origin, path = path_and_query, "forwarding request");

        strip_hop_by_hop(&mut parts.headers);
        parts.uri = outbound_uri;
        parts.version = Version::HTTP_11;

        let outbound = Request::from_parts(parts, body);
        match self.client.send_request(outbound).await {
            Ok(mut response) => {
                strip_hop_by_hop(response.headers_mut());
                guard.disarm();
                response
            }
            Err(e) => {
                tracing::warn!(
                    origin,
                    service = self.runtime.name(),
                    error = %e,
                    "origin exchange failed"
                );
                guard.disarm();
                plaintext_response(StatusCode::BAD_GATEWAY, "bad gateway")
            }
        }
    }
}

/// Counts an abandoned exchange when dropped while still armed.
struct CancelGuard {
    service: String,
    sink: Arc<dyn MetricsSink>,
    armed: bool,
}

impl CancelGuard {
    fn new(service: String, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            service,
            sink,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.sink.proxy_canceled_total(&self.service);
            tracing::debug!(service = %self.service, "client canceled in-flight request");
        }
    }
}
