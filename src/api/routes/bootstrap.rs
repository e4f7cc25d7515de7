//! Bootstrap Route
//!
//! - POST /api/v1/bootstrap - Register a device and fetch its configuration
//!
//! HTTP-only devices poll this instead of holding a config socket, so they
//! never receive pushed patches.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::api::dto::BootstrapRequest;
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// POST /api/v1/bootstrap
pub async fn bootstrap(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BootstrapRequest>,
) -> ApiResult<Response> {
    let config = state.hub.registry.bootstrap(&req.meta).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], config.payload).into_response())
}
