//! Admission middleware.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::ratelimit::{Credentials, RateLimiter, Verdict};

/// Run the rate limiter before the wrapped handler.
///
/// Allowed requests reach the handler untouched and its response is returned
/// as is. Anything else is answered here with the verdict's status and
/// message.
///
/// Install with `axum::middleware::from_fn_with_state`.
pub async fn admission(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = Credentials::from_request(&request);

    match limiter.check(credentials).await {
        Verdict::Allowed => next.run(request).await,
        verdict => rejection(verdict),
    }
}

/// Plain-text response for a rejected request.
pub fn rejection(verdict: Verdict) -> Response {
    let status =
        StatusCode::from_u16(verdict.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, verdict.message()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::ratelimit::{ApiKeyTable, CountingStore, LimitSource, MemoryStore, RATE_LIMITED_MSG};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    struct UnreachableStore;

    #[async_trait]
    impl CountingStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
            unreachable!("blacklist lookup fails first")
        }

        async fn increment_with_window_expiry(&self, _key: &str) -> Result<i64, StoreError> {
            unreachable!("blacklist lookup fails first")
        }
    }

    fn limiter(store: Arc<dyn CountingStore>, default_limit: i64, keys: &str) -> Arc<RateLimiter> {
        let limits = LimitSource::new(
            default_limit,
            ApiKeyTable::parse_inline(keys),
            Duration::from_secs(300),
        );
        Arc::new(RateLimiter::new(store, limits))
    }

    /// A router whose only handler counts its invocations.
    fn app(limiter: Arc<RateLimiter>, hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/ip",
                get(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                    async {
                        (
                            StatusCode::ACCEPTED,
                            [("x-downstream", "yes")],
                            "downstream body",
                        )
                    }
                }),
            )
            .route_layer(axum::middleware::from_fn_with_state(limiter, admission))
    }

    fn request(api_key: Option<&str>, peer: &str) -> Request {
        let mut builder = axum::http::Request::builder().uri("/ip");
        if let Some(key) = api_key {
            builder = builder.header("API_KEY", key);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_passes_through_untouched() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(limiter(Arc::new(MemoryStore::new()), 5, ""), hits.clone());

        let response = app.oneshot(request(None, "1.2.3.4:1000")).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["x-downstream"], "yes");
        assert_eq!(body_text(response).await, "downstream body");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_third_request_gets_429() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(limiter(Arc::new(MemoryStore::new()), 2, ""), hits.clone());

        for _ in 0..2 {
            let response = app.clone().oneshot(request(None, "1.2.3.4:1000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }

        let response = app.clone().oneshot(request(None, "1.2.3.4:1001")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_text(response).await, RATE_LIMITED_MSG);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Another caller is unaffected
        let response = app.oneshot(request(None, "5.6.7.8:1000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unregistered_key_gets_401() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(limiter(Arc::new(MemoryStore::new()), 5, "abc:5"), hits.clone());

        let response = app.oneshot(request(Some("xyz"), "1.2.3.4:1000")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "Invalid API Key");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_non_ascii_key_gets_401() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(limiter(Arc::new(MemoryStore::new()), 5, "abc:5"), hits.clone());

        let mut request = request(None, "1.2.3.4:1000");
        request.headers_mut().insert(
            "api_key",
            axum::http::HeaderValue::from_bytes(b"cl\xc3\xa9").unwrap(),
        );
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "Invalid API Key");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_registered_key_uses_its_own_limit() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(limiter(Arc::new(MemoryStore::new()), 0, "abc:1"), hits.clone());

        let response = app.clone().oneshot(request(Some("abc"), "1.2.3.4:1000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app.oneshot(request(Some("abc"), "1.2.3.4:1000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_store_failure_gets_500() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = app(limiter(Arc::new(UnreachableStore), 5, ""), hits.clone());

        let response = app.oneshot(request(None, "1.2.3.4:1000")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Internal Server Error");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejection_status_codes() {
        assert_eq!(rejection(Verdict::InvalidKey).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(rejection(Verdict::RateLimited).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            rejection(Verdict::InternalError).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
