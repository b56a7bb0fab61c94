//! Error types for the bridge

use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Refresh token rejected or refresh failed; the host must re-run authorization
    #[error("Reauthorization required: {0}")]
    ReauthorizationRequired(String),

    /// Access token rejected even after a refresh
    #[error("Unauthorized: {endpoint} rejected the token twice")]
    Unauthorized {
        endpoint: String,
        device_id: Option<String>,
    },

    #[error("Rate limited on {endpoint}")]
    RateLimited {
        endpoint: String,
        device_id: Option<String>,
    },

    #[error("Transient failure on {endpoint} (status {status:?}): {message}")]
    Transient {
        endpoint: String,
        status: Option<u16>,
        device_id: Option<String>,
        message: String,
    },

    #[error("API error on {endpoint} ({status}): {message}")]
    Api {
        endpoint: String,
        status: u16,
        device_id: Option<String>,
        message: String,
    },

    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl BridgeError {
    pub fn transient(endpoint: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        BridgeError::Transient {
            endpoint: endpoint.to_string(),
            status,
            device_id: None,
            message: message.into(),
        }
    }

    /// Attach a device id to errors that carry call context
    pub fn with_device(mut self, id: &str) -> Self {
        match &mut self {
            BridgeError::Unauthorized { device_id, .. }
            | BridgeError::RateLimited { device_id, .. }
            | BridgeError::Transient { device_id, .. }
            | BridgeError::Api { device_id, .. } => *device_id = Some(id.to_string()),
            _ => {}
        }
        self
    }

    /// Errors that stop every call until the host re-authorizes
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::ReauthorizationRequired(_) | BridgeError::Unauthorized { .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BridgeError::RateLimited { .. })
    }

    /// Failures that count towards marking a device unreachable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Transient { .. } | BridgeError::HttpError(_) | BridgeError::IoError(_)
        )
    }

    /// HTTP status carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            BridgeError::Api { status, .. } => Some(*status),
            BridgeError::Transient { status, .. } => *status,
            BridgeError::RateLimited { .. } => Some(429),
            BridgeError::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }
}
