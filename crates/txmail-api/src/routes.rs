//! API routes

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use txmail_core::DispatchPipeline;

use crate::handlers::{health, tx};

/// Shared handler state
pub struct AppState {
    pub pipeline: Arc<DispatchPipeline>,
}

/// Create the API router
pub fn create_router(pipeline: Arc<DispatchPipeline>) -> Router {
    let state = Arc::new(AppState { pipeline });

    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    let tx_routes = Router::new()
        .route("/", post(tx::send_tx))
        .route("/sync", post(tx::send_tx_sync))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/tx", tx_routes)
        .layer(TraceLayer::new_for_http())
}
