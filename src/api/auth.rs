//! API-key authentication.
//!
//! Fail closed: an unset key rejects every request with 503 rather than
//! letting an unconfigured deployment serve unauthenticated. Comparison is
//! constant-time over the received bytes.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::api::ApiState;
use std::sync::Arc;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Constant-time byte equality: fold XORs so timing does not leak the
/// position of the first mismatch. Length is still observable; keys are
/// fixed-length secrets.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

pub async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.api_key.as_bytes();
    if expected.is_empty() {
        warn!("API_KEY not configured, rejecting request");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "service misconfigured: API_KEY not set",
        )
            .into_response();
    }

    let Some(received) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::UNAUTHORIZED, "missing API key").into_response();
    };

    if !constant_time_eq(received.as_bytes(), expected) {
        warn!("invalid API key");
        return (StatusCode::FORBIDDEN, "invalid API key").into_response();
    }

    next.run(request).await
}
