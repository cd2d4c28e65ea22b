use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use hyper::{header::HeaderValue, Request, Response};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Idle connections kept per origin host. With the idle timeout below this
/// sizes the pool for roughly 20k connections across a typical origin fleet.
const POOL_MAX_IDLE_PER_HOST: usize = 5_000;
/// How long an idle pooled connection may linger before being closed.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// TCP connect (and TLS handshake) budget.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long we wait for the origin's response headers. These bounds shape
/// failure attribution: past this point the breaker sees a failure.
const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// The process-wide outbound transport: a Hyper client with Rustls
/// (HTTP/1.1, ALPN may negotiate h2 for TLS origins) fronting one shared
/// connection pool.
///
/// Responsibilities:
/// * Sets the Host header from the outbound URI
/// * Enforces the response-header timeout
/// * Converts transport errors into the port's error taxonomy
///
/// Dropping the future returned by `send_request` cancels the exchange and
/// the connection is returned to or closed by the pool.
pub struct SharedTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl SharedTransport {
    /// Create the shared transport.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs
        http_connector.set_connect_timeout(Some(CONNECT_TIMEOUT));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build::<_, Body>(https_connector);

        tracing::info!(
            max_idle_per_host = POOL_MAX_IDLE_PER_HOST,
            idle_timeout_secs = POOL_IDLE_TIMEOUT.as_secs(),
            "Created shared outbound transport"
        );
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for SharedTransport {
    async fn send_request(&self, mut req: Request<Body>) -> HttpClientResult<Response<Body>> {
        // Set Host header from the outbound URI
        if let Some(host_str) = req.uri().host() {
            let host_header_val = if let Some(port) = req.uri().port() {
                HeaderValue::from_str(&format!("{host_str}:{}", port.as_u16()))
                    .unwrap_or_else(|_| HeaderValue::from_static(""))
            } else {
                HeaderValue::from_str(host_str).unwrap_or_else(|_| HeaderValue::from_static(""))
            };
            if !host_header_val.is_empty() {
                req.headers_mut().insert(hyper::header::HOST, host_header_val);
            }
        } else {
            return Err(HttpClientError::InvalidRequest(format!(
                "outbound URI has no host: {}",
                req.uri()
            )));
        }

        let uri_for_error = req.uri().clone();
        let method_for_error = req.method().clone();

        match timeout(RESPONSE_HEADER_TIMEOUT, self.client.request(req)).await {
            Ok(Ok(response)) => {
                let (mut parts, incoming) = response.into_parts();

                // The body is re-framed as it streams through; drop the
                // origin's framing header so the server side re-frames.
                parts.headers.remove(hyper::header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, Body::new(incoming)))
            }
            Ok(Err(e)) => {
                tracing::debug!(
                    method = %method_for_error,
                    uri = %uri_for_error,
                    error = %e,
                    "outbound request failed"
                );
                Err(HttpClientError::Connection(format!(
                    "request to {method_for_error} {uri_for_error} failed: {e}"
                )))
            }
            Err(_) => Err(HttpClientError::ResponseHeaderTimeout(
                RESPONSE_HEADER_TIMEOUT,
            )),
        }
    }
}
