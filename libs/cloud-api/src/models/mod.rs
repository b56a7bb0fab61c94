//! API models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// OAuth2 token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth2 error body (`{"error": "invalid_grant", ...}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Paged list envelope used by every collection endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
}

/// Scene
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub scene_id: String,
    #[serde(default)]
    pub scene_name: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
}

/// Device as listed by `GET /devices`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Device {
    /// Display name, falling back from label to name to id
    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.device_id)
    }

    /// Capability ids of the `main` component (or the first component)
    pub fn main_capability_ids(&self) -> Vec<&str> {
        self.components
            .iter()
            .find(|c| c.id == "main")
            .or_else(|| self.components.first())
            .map(|c| c.capabilities.iter().map(|cap| cap.id.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Device component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(default)]
    pub capabilities: Vec<CapabilityRef>,
}

/// Capability reference inside a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRef {
    pub id: String,
    #[serde(default)]
    pub version: Option<u32>,
}

/// Attribute value as reported by `GET /devices/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeState {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// capability id -> attribute name -> state
pub type CapabilityStatus = HashMap<String, HashMap<String, AttributeState>>;

/// Full device status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(default)]
    pub components: HashMap<String, CapabilityStatus>,
}

impl DeviceStatus {
    /// Status of the `main` component
    pub fn main(&self) -> Option<&CapabilityStatus> {
        self.components.get("main")
    }
}

/// Command request body for `POST /devices/{id}/commands`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub commands: Vec<DeviceCommand>,
}

/// Single device command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub component: String,
    pub capability: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

impl CommandRequest {
    /// A single command addressed to the `main` component
    pub fn main(capability: &str, command: &str, arguments: Vec<serde_json::Value>) -> Self {
        Self {
            commands: vec![DeviceCommand {
                component: "main".to_string(),
                capability: capability.to_string(),
                command: command.to_string(),
                arguments,
            }],
        }
    }
}

/// Error envelope returned by the REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(default)]
    pub request_id: Option<String>,
    pub error: ErrorDetail,
}

/// Error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
}
