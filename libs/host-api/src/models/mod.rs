//! Host API models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Integration status as shown to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Connecting,
    Connected,
    ReauthorizationRequired,
    Error,
}

/// Token status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStatus {
    pub has_tokens: bool,
    pub is_expired: bool,
    pub remaining_secs: i64,
    pub reauthorization_required: bool,
}

/// Rate limiter counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub available: usize,
    pub admitted: u64,
    pub deferred: u64,
    pub rate_limited: u64,
}

/// Status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: IntegrationStatus,
    pub token: TokenStatus,
    pub rate_limit: RateLimitStatus,
    pub devices: usize,
    pub unreachable_devices: usize,
}

/// Device state as read by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateResponse {
    pub device_id: String,
    pub label: String,
    pub kind: String,
    pub room: Option<String>,
    pub state: BTreeMap<String, serde_json::Value>,
    pub pending_optimistic: bool,
    pub unreachable: bool,
    /// Seconds since the state was last confirmed by the cloud
    pub stale_secs: Option<u64>,
}

/// Device list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceStateResponse>,
    pub total: usize,
}

/// Command request from the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub capability: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// Command acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub command_id: Option<u64>,
    pub message: String,
}

/// Scene summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSummary {
    pub id: String,
    pub name: String,
}

/// Scene list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneListResponse {
    pub scenes: Vec<SceneSummary>,
    pub total: usize,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
