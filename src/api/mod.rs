//! HTTP surface: `GET /`, `GET /health`, `POST /dispatch`.
//!
//! The root banner is public; everything else sits behind the X-API-Key
//! middleware. Request logging mirrors the CLI's tracing fields.

pub mod auth;
pub mod logging;
pub mod routes;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::scan::Scanner;
use crate::scheduler::Dispatcher;

pub use auth::constant_time_eq;

pub struct ApiState {
    pub scanner: Arc<Scanner>,
    pub dispatcher: Arc<Dispatcher>,
    pub api_key: String,
}

pub fn router(state: Arc<ApiState>) -> Router {
    let protected = Router::new()
        .route("/health", get(routes::health_handler))
        .route("/dispatch", post(routes::dispatch_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_api_key,
        ));

    Router::new()
        .route("/", get(routes::root))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
