//! Route handlers.

use axum::extract::Request;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::ratelimit::Credentials;

/// `GET /ip`: echo the caller's address.
pub async fn client_ip(request: Request) -> Json<Value> {
    let credentials = Credentials::from_request(&request);

    info!(
        client_ip = %credentials.client_ip,
        api_key = credentials.has_api_key(),
        "GET /ip called"
    );

    Json(json!({
        "ip": credentials.client_ip,
        "api_key": credentials.has_api_key(),
    }))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
