//! Device Routes
//!
//! - GET /api/v1/devices - Data history of every device
//! - GET /api/v1/identities - Every device that ever bootstrapped
//! - GET /api/v1/devices/:id - Identity and live state of one device
//! - GET /api/v1/devices/:id/data - Data history of one device
//! - GET /api/v1/devices/:id/config - Current configuration
//! - PATCH /api/v1/devices/:id/config - Replace the configuration and push it

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use std::sync::Arc;

use crate::api::dto::{DataPointDto, DeviceResponse, PatchResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::device::{DataPoint, DeviceConfig, DeviceId, DeviceMeta};
use crate::hub::HubError;

fn parse_id(raw: String) -> ApiResult<DeviceId> {
    DeviceId::parse(raw).map_err(|e| ApiError::Hub(HubError::from(e)))
}

fn to_dtos(points: &[DataPoint]) -> ApiResult<Vec<DataPointDto>> {
    points
        .iter()
        .map(|point| {
            DataPointDto::try_from(point)
                .map_err(|e| ApiError::Internal(format!("stored data for {} is not JSON: {}", point.id, e)))
        })
        .collect()
}

/// GET /api/v1/devices
pub async fn list_data(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DataPointDto>>> {
    let points = state.hub.ingestor.history_all().await?;
    Ok(Json(to_dtos(&points)?))
}

/// GET /api/v1/identities
pub async fn list_identities(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DeviceMeta>>> {
    let identities = state.hub.registry.list_identities().await?;
    Ok(Json(identities.into_iter().map(DeviceMeta::from).collect()))
}

/// GET /api/v1/devices/:id
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<DeviceResponse>> {
    let id = parse_id(raw_id)?;
    let identity = state.hub.registry.identity(&id).await?;
    let registered = state.hub.registry.is_registered(&id).await?;
    let connected = state.hub.distributor.is_connected(&id).await;
    let observers = state.hub.stream.observer_count(&id).await;

    Ok(Json(DeviceResponse::new(identity, registered, connected, observers)))
}

/// GET /api/v1/devices/:id/data
///
/// A device with no submissions has an empty history, not a 404.
pub async fn device_data(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Vec<DataPointDto>>> {
    let id = parse_id(raw_id)?;
    let points = state.hub.ingestor.history(&id).await?;
    Ok(Json(to_dtos(&points)?))
}

/// GET /api/v1/devices/:id/config
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(raw_id)?;
    let config = state.hub.registry.get_config(&id).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], config.payload).into_response())
}

/// PATCH /api/v1/devices/:id/config
///
/// The body replaces the whole configuration and must match the device
/// kind's schema. It is stored as sent and pushed to the device if it holds
/// a live config connection.
pub async fn patch_config(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<PatchResponse>> {
    let id = parse_id(raw_id)?;
    if body.is_empty() {
        return Err(ApiError::Validation("empty configuration body".to_string()));
    }

    let listeners = state.hub.patch_config(&DeviceConfig::new(id, body)).await?;
    Ok(Json(PatchResponse {
        status: "ok".to_string(),
        listeners,
    }))
}
