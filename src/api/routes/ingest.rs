//! Ingest Routes
//!
//! - POST /api/v1/ingest - One device data submission

use axum::{extract::State, http::StatusCode, Json};
use bytes::Bytes;
use std::sync::Arc;

use crate::api::dto::{Ack, IngestRequest};
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// POST /api/v1/ingest
///
/// Validate the data against the device kind's schema, persist it and
/// announce it to observers.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<Ack>)> {
    let payload = Bytes::copy_from_slice(req.data.get().as_bytes());
    let point = state.hub.ingestor.ingest(&req.meta, payload, req.time).await?;

    Ok((
        StatusCode::CREATED,
        Json(Ack::ok(format!("stored at {}", point.time))),
    ))
}
