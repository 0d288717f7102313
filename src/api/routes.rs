//! HTTP handlers: service banner, health, dispatch.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;

use crate::api::ApiState;
use crate::health;
use crate::market;

/// Public banner: liveness only, no internals.
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "ivscan",
        "status": "ok",
        "timestamp_et": market::now_et().to_rfc3339(),
    }))
}

pub async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<health::HealthReport> {
    Json(health::check(&state.scanner).await)
}

#[derive(Debug, Deserialize)]
pub struct DispatchQuery {
    pub force: Option<String>,
}

pub async fn dispatch_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DispatchQuery>,
) -> Json<crate::scheduler::DispatchResponse> {
    let response = state
        .dispatcher
        .dispatch(query.force.as_deref(), market::now_et())
        .await;
    Json(response)
}
