//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::BridgeError;
use crate::logs::LogLevel;

/// Bridge settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Write rotated log files under the storage logs dir
    #[serde(default)]
    pub log_to_file: bool,

    /// Integration instance id; keys the persisted token record
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// SmartThings location to synchronize
    #[serde(default)]
    pub location_id: Option<String>,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub oauth: OAuthSettings,

    #[serde(default)]
    pub device_filters: DeviceFilters,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub commands: CommandSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

fn default_instance_id() -> String {
    "default".to_string()
}

impl Settings {
    /// Validate ranges and normalize ids
    pub fn validate(mut self) -> Result<Self, BridgeError> {
        if self.instance_id.trim().is_empty() {
            return Err(BridgeError::ConfigError("instance_id cannot be empty".into()));
        }

        if let Some(location_id) = self.location_id.take() {
            let parsed = uuid::Uuid::parse_str(location_id.trim()).map_err(|_| {
                BridgeError::ConfigError(format!("Invalid location id: {}", location_id))
            })?;
            self.location_id = Some(parsed.hyphenated().to_string());
        }

        for (name, value) in [
            ("client_id", &self.oauth.client_id),
            ("client_secret", &self.oauth.client_secret),
            ("redirect_uri", &self.oauth.redirect_uri),
        ] {
            if value.trim().is_empty() {
                return Err(BridgeError::ConfigError(format!("{} cannot be empty", name)));
            }
        }

        url::Url::parse(&self.cloud.base_url)
            .map_err(|e| BridgeError::ConfigError(format!("Invalid base_url: {}", e)))?;
        url::Url::parse(&self.cloud.token_url)
            .map_err(|e| BridgeError::ConfigError(format!("Invalid token_url: {}", e)))?;

        let p = &self.polling;
        if !(1..=10).contains(&p.high_interval_secs) {
            return Err(BridgeError::ConfigError(
                "polling.high_interval_secs must be within 1..=10".into(),
            ));
        }
        if !(3..=60).contains(&p.medium_interval_secs) {
            return Err(BridgeError::ConfigError(
                "polling.medium_interval_secs must be within 3..=60".into(),
            ));
        }
        if !(10..=300).contains(&p.low_interval_secs) {
            return Err(BridgeError::ConfigError(
                "polling.low_interval_secs must be within 10..=300".into(),
            ));
        }
        if p.high_window_secs >= p.medium_window_secs {
            return Err(BridgeError::ConfigError(
                "polling.high_window_secs must be below medium_window_secs".into(),
            ));
        }
        if p.tick_millis == 0 || p.max_batch == 0 || p.failure_threshold == 0 {
            return Err(BridgeError::ConfigError(
                "polling tick, batch and failure threshold must be positive".into(),
            ));
        }

        if self.rate_limit.limit == 0 || self.rate_limit.window_secs == 0 {
            return Err(BridgeError::ConfigError(
                "rate_limit window and limit must be positive".into(),
            ));
        }

        if !(0.5..=5.0).contains(&self.commands.verification_delay_secs) {
            return Err(BridgeError::ConfigError(
                "commands.verification_delay_secs must be within 0.5..=5.0".into(),
            ));
        }

        Ok(self)
    }
}

/// Cloud endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Tokens are never handed out closer than this to their expiry
    #[serde(default = "default_token_margin")]
    pub token_margin_secs: i64,

    /// The refresh worker refreshes ahead of expiry by this much
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: i64,
}

fn default_base_url() -> String {
    "https://api.smartthings.com/v1".to_string()
}

fn default_token_url() -> String {
    "https://api.smartthings.com/oauth/token".to_string()
}

fn default_connect_timeout() -> u64 {
    4
}

fn default_request_timeout() -> u64 {
    8
}

fn default_token_margin() -> i64 {
    30
}

fn default_refresh_threshold() -> i64 {
    300
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_url: default_token_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            token_margin_secs: default_token_margin(),
            refresh_threshold_secs: default_refresh_threshold(),
        }
    }
}

/// OAuth2 client credentials supplied by setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    #[serde(default)]
    pub client_id: String,

    #[serde(default, skip_serializing)]
    pub client_secret: String,

    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

fn default_redirect_uri() -> String {
    "https://localhost:8080/callback".to_string()
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
        }
    }
}

/// Device types to include at discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFilters {
    #[serde(default = "default_true")]
    pub include_lights: bool,
    #[serde(default = "default_true")]
    pub include_switches: bool,
    #[serde(default)]
    pub include_sensors: bool,
    #[serde(default = "default_true")]
    pub include_climate: bool,
    #[serde(default = "default_true")]
    pub include_covers: bool,
    #[serde(default = "default_true")]
    pub include_media_players: bool,
    #[serde(default = "default_true")]
    pub include_buttons: bool,
}

impl Default for DeviceFilters {
    fn default() -> Self {
        Self {
            include_lights: true,
            include_switches: true,
            include_sensors: false,
            include_climate: true,
            include_covers: true,
            include_media_players: true,
            include_buttons: true,
        }
    }
}

/// Adaptive polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default = "default_high_interval")]
    pub high_interval_secs: u64,
    #[serde(default = "default_medium_interval")]
    pub medium_interval_secs: u64,
    #[serde(default = "default_low_interval")]
    pub low_interval_secs: u64,
    /// Activity younger than this puts a device in the HIGH bucket
    #[serde(default = "default_high_window")]
    pub high_window_secs: u64,
    /// Activity younger than this (and not HIGH) puts a device in MEDIUM
    #[serde(default = "default_medium_window")]
    pub medium_window_secs: u64,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_high_interval() -> u64 {
    3
}

fn default_medium_interval() -> u64 {
    8
}

fn default_low_interval() -> u64 {
    20
}

fn default_high_window() -> u64 {
    60
}

fn default_medium_window() -> u64 {
    300
}

fn default_max_batch() -> usize {
    4
}

fn default_failure_threshold() -> u32 {
    5
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            high_interval_secs: default_high_interval(),
            medium_interval_secs: default_medium_interval(),
            low_interval_secs: default_low_interval(),
            high_window_secs: default_high_window(),
            medium_window_secs: default_medium_window(),
            max_batch: default_max_batch(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Sliding window rate limit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Saturation period imposed after an HTTP 429
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_window() -> u64 {
    10
}

fn default_limit() -> usize {
    8
}

fn default_cooldown() -> u64 {
    10
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            limit: default_limit(),
            cooldown_secs: default_cooldown(),
        }
    }
}

/// Command execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSettings {
    #[serde(default = "default_true")]
    pub enable_optimistic_updates: bool,
    #[serde(default = "default_verification_delay")]
    pub verification_delay_secs: f64,
}

fn default_verification_delay() -> f64 {
    1.5
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            enable_optimistic_updates: true,
            verification_delay_secs: default_verification_delay(),
        }
    }
}

/// Local host server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}
