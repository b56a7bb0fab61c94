//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tokio::time::Instant;
use tracing::warn;

use host_api::models::{
    CommandRequest, CommandResponse, DeviceListResponse, DeviceStateResponse, ErrorResponse,
    HealthResponse, SceneListResponse, SceneSummary, StatusResponse,
};

use crate::errors::BridgeError;
use crate::server::state::ServerState;
use crate::state::cache::DeviceRecord;
use crate::utils::version_info;

/// Error body with a status derived from the error kind
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            BridgeError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            BridgeError::UnsupportedCapability(_) => {
                (StatusCode::BAD_REQUEST, "unsupported_capability")
            }
            BridgeError::InvalidCommand(_) => (StatusCode::BAD_REQUEST, "invalid_command"),
            BridgeError::ReauthorizationRequired(_) | BridgeError::Unauthorized { .. } => {
                (StatusCode::UNAUTHORIZED, "reauthorization_required")
            }
            BridgeError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            BridgeError::Transient { .. } | BridgeError::HttpError(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "transient")
            }
            BridgeError::DeviceUnreachable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "device_unreachable")
            }
            BridgeError::Api { .. } => (StatusCode::BAD_GATEWAY, "cloud_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: error.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "stbridge".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Integration, token and rate limit status
pub async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let status = *state.status.borrow();
    Json(StatusResponse {
        status,
        token: state.tokens.status(),
        rate_limit: state.cloud.limiter().status(),
        devices: state.cache.len(),
        unreachable_devices: state.cache.unreachable_count(),
    })
}

fn device_response(record: DeviceRecord, now: Instant) -> DeviceStateResponse {
    let stale_secs = record.staleness(now).map(|d| d.as_secs());
    DeviceStateResponse {
        kind: record
            .info
            .kind
            .map(|k| k.as_str())
            .unwrap_or("unknown")
            .to_string(),
        device_id: record.info.device_id,
        label: record.info.label,
        room: record.info.room,
        state: record.state,
        pending_optimistic: record.pending_optimistic,
        unreachable: record.unreachable,
        stale_secs,
    }
}

/// All cached devices
pub async fn devices_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let now = Instant::now();
    let devices: Vec<DeviceStateResponse> = state
        .cache
        .list()
        .into_iter()
        .map(|record| device_response(record, now))
        .collect();
    let total = devices.len();
    Json(DeviceListResponse { devices, total })
}

/// Cached state of one device
pub async fn device_state_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceStateResponse>, ApiError> {
    let record = state
        .cache
        .get(&device_id)
        .ok_or_else(|| BridgeError::NotFound(format!("device {}", device_id)))?;
    Ok(Json(device_response(record, Instant::now())))
}

/// Dispatch a command; answers once the cloud accepted it
pub async fn command_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let ticket = state
        .coordinator
        .execute(&device_id, &request.capability, &request.command, request.args)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CommandResponse {
            success: true,
            command_id: Some(ticket.command_id),
            message: format!("{}.{} dispatched", request.capability, request.command),
        }),
    ))
}

/// Scenes found by the last discovery
pub async fn scenes_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let scenes: Vec<SceneSummary> = state
        .discovery
        .scenes()
        .into_iter()
        .map(|scene| SceneSummary {
            name: scene.scene_name.unwrap_or_else(|| scene.scene_id.clone()),
            id: scene.scene_id,
        })
        .collect();
    let total = scenes.len();
    Json(SceneListResponse { scenes, total })
}

/// Run a scene
pub async fn execute_scene_handler(
    State(state): State<Arc<ServerState>>,
    Path(scene_id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    if !state.discovery.scenes().iter().any(|s| s.scene_id == scene_id) {
        return Err(BridgeError::NotFound(format!("scene {}", scene_id)).into());
    }

    state.cloud.execute_scene(&scene_id).await?;
    Ok(Json(CommandResponse {
        success: true,
        command_id: None,
        message: format!("scene {} executed", scene_id),
    }))
}
