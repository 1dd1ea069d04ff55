//! HTTP server implementation.

use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers;
use super::middleware::admission;
use crate::error::{BouncerError, Result};
use crate::ratelimit::RateLimiter;

/// Build the application router.
///
/// Every route except `/health` sits behind the admission middleware.
pub fn router(rate_limiter: Arc<RateLimiter>) -> Router {
    let limited = Router::new()
        .route("/ip", get(handlers::client_ip))
        .route_layer(axum::middleware::from_fn_with_state(rate_limiter, admission));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(limited)
        .layer(TraceLayer::new_for_http())
}

/// HTTP server for the admission-controlled application.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { addr, rate_limiter }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server stops accepting connections when `signal` resolves and
    /// returns once in-flight requests have completed.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server");

        let app = router(self.rate_limiter);
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                BouncerError::Io(e)
            })
    }
}
