//! Transactional send handlers

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use txmail_core::{DispatchMode, TxRequest};

use crate::error::ApiError;
use crate::routes::AppState;

/// Response for an accepted request
#[derive(Debug, Serialize, Deserialize)]
pub struct TxResponse {
    pub success: bool,
}

/// Queue a transactional message
///
/// POST /api/tx
pub async fn send_tx(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TxRequest>, JsonRejection>,
) -> Result<Json<TxResponse>, ApiError> {
    dispatch(&state, body, DispatchMode::Queued).await
}

/// Send a transactional message and wait for the messenger
///
/// POST /api/tx/sync
pub async fn send_tx_sync(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TxRequest>, JsonRejection>,
) -> Result<Json<TxResponse>, ApiError> {
    dispatch(&state, body, DispatchMode::Sync).await
}

async fn dispatch(
    state: &AppState,
    body: Result<Json<TxRequest>, JsonRejection>,
    mode: DispatchMode,
) -> Result<Json<TxResponse>, ApiError> {
    let Json(request) = body?;
    state.pipeline.dispatch(request, mode).await?;
    Ok(Json(TxResponse { success: true }))
}
