//! API-key authentication layer.
use std::sync::Arc;

use http::StatusCode;

use crate::{
    config::models::ValidKeySet,
    core::middleware::{plaintext_response, ClientKey, Handler, Middleware},
};

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests whose `X-API-KEY` header is missing or not in the
/// configured key set. Accepted keys are published into the request
/// extensions as [`ClientKey`] so the rate limiter can partition by them.
pub struct AuthMiddleware {
    keys: Arc<ValidKeySet>,
}

impl AuthMiddleware {
    pub fn new(keys: Arc<ValidKeySet>) -> Self {
        Self { keys }
    }
}

impl Middleware for AuthMiddleware {
    fn wrap(&self, inner: Handler) -> Handler {
        let keys = Arc::clone(&self.keys);
        Arc::new(move |mut req| {
            let keys = Arc::clone(&keys);
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                let presented = req
                    .headers()
                    .get(API_KEY_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);

                match presented {
                    Some(key) if keys.contains(&key) => {
                        req.extensions_mut().insert(ClientKey(key));
                        inner(req).await
                    }
                    _ => {
                        tracing::debug!("rejected request with missing or invalid API key");
                        plaintext_response(StatusCode::UNAUTHORIZED, "invalid or missing API key")
                    }
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::body::Body;
    use http::Request;

    use super::*;

    fn keyed_request(key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/users");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn middleware() -> AuthMiddleware {
        AuthMiddleware::new(Arc::new(ValidKeySet::from_keys(["k1", "k2"])))
    }

    #[tokio::test]
    async fn test_missing_key_rejected_without_invoking_inner() {
        let invoked = Arc::new(AtomicBool::new(false));
        let inner_invoked = Arc::clone(&invoked);
        let inner: Handler = Arc::new(move |_req| {
            let invoked = Arc::clone(&inner_invoked);
            Box::pin(async move {
                invoked.store(true, Ordering::SeqCst);
                plaintext_response(StatusCode::OK, "ok")
            })
        });

        let chain = middleware().wrap(inner);
        let response = chain(keyed_request(None)).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unknown_key_rejected() {
        let inner: Handler =
            Arc::new(|_req| Box::pin(async { plaintext_response(StatusCode::OK, "ok") }));
        let chain = middleware().wrap(inner);
        let response = chain(keyed_request(Some("k9"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_key_passes_and_publishes_identity() {
        let inner: Handler = Arc::new(|req| {
            Box::pin(async move {
                let key = req
                    .extensions()
                    .get::<ClientKey>()
                    .map(|ClientKey(key)| key.clone());
                assert_eq!(key.as_deref(), Some("k1"));
                plaintext_response(StatusCode::OK, "ok")
            })
        });

        let chain = middleware().wrap(inner);
        let response = chain(keyed_request(Some("k1"))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
