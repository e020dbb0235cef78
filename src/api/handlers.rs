use axum::{
    extract::{Path, Query, State},
    Json,
};
use utoipa::OpenApi;

use super::dto::{HistoryQuery, OverrideRequest, SnapshotDto};
use super::errors::AppError;
use super::AppState;

/// The original dashboard showed the 20 most recent rows per device.
const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 500;

/// Fetch the authoritative (newest) snapshot for every known device.
#[utoipa::path(
    get,
    path = "/devices/latest",
    responses(
        (status = 200, description = "Latest snapshot per device", body = Vec<SnapshotDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "devices"
)]
pub async fn get_latest_snapshots(
    State(state): State<AppState>,
) -> Result<Json<Vec<SnapshotDto>>, AppError> {
    let rows = state.store.latest_per_device().await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Fetch the most recent snapshots for one device, newest first.
#[utoipa::path(
    get,
    path = "/devices/{device_id}/history",
    params(
        ("device_id" = String, Path, description = "Device identifier"),
        HistoryQuery,
    ),
    responses(
        (status = 200, description = "Device snapshot history", body = Vec<SnapshotDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "devices"
)]
pub async fn get_device_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<SnapshotDto>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let rows = state.store.history(&device_id, limit).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Manually override one or both actuators, switching the device to manual
/// mode until auto control is resumed.
#[utoipa::path(
    post,
    path = "/devices/{device_id}/control",
    params(
        ("device_id" = String, Path, description = "Device identifier"),
    ),
    request_body = OverrideRequest,
    responses(
        (status = 200, description = "Committed manual snapshot", body = SnapshotDto),
        (status = 400, description = "No actuator given"),
        (status = 503, description = "State store unavailable"),
    ),
    tag = "control"
)]
pub async fn override_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<SnapshotDto>, AppError> {
    if request.fan_on.is_none() && request.light_on.is_none() {
        return Err(AppError::bad_request(
            "at least one of fan_on or light_on is required",
        ));
    }
    let snapshot = state
        .gateway
        .override_actuators(&device_id, request.fan_on, request.light_on)
        .await?;
    Ok(Json(snapshot.into()))
}

/// Hand the device back to automatic control.
#[utoipa::path(
    post,
    path = "/devices/{device_id}/auto",
    params(
        ("device_id" = String, Path, description = "Device identifier"),
    ),
    responses(
        (status = 200, description = "Committed auto snapshot", body = SnapshotDto),
        (status = 404, description = "Device has no history"),
        (status = 503, description = "State store unavailable"),
    ),
    tag = "control"
)]
pub async fn resume_auto(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<SnapshotDto>, AppError> {
    let snapshot = state.gateway.resume_auto(&device_id).await?;
    Ok(Json(snapshot.into()))
}

// ---------------------------------------------------------------------------
// OpenAPI spec struct (used in api/mod.rs)
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(get_latest_snapshots, get_device_history, override_device, resume_auto),
    components(schemas(SnapshotDto, OverrideRequest, crate::db::models::ControlMode)),
    tags(
        (name = "devices", description = "Snapshot history endpoints"),
        (name = "control", description = "Manual override endpoints"),
    ),
    info(
        title = "IoT Telemetry Gateway API",
        version = "0.1.0",
        description = "REST API for snapshot history and manual actuator control"
    )
)]
pub struct ApiDoc;
