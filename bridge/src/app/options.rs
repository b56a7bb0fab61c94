//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::coordinator::command;
use crate::http::oauth::OAuthCredentials;
use crate::ratelimit;
use crate::scheduler::{activity, poll};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{DeviceFilters, Settings};
use crate::workers::{poller, token_refresh};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Cloud endpoints and credentials
    pub cloud: CloudOptions,

    /// Integration instance keying the stored token
    pub instance_id: String,

    /// Location to synchronize; the first visible one if unset
    pub location_id: Option<String>,

    /// Device kinds kept at discovery
    pub device_filters: DeviceFilters,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    pub rate_limit: ratelimit::Options,

    pub scheduler: poll::Options,

    pub commands: command::Options,

    /// Poller worker options
    pub poller: poller::Options,

    /// Token refresh worker options
    pub token_refresh_worker: token_refresh::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            cloud: CloudOptions::default(),
            instance_id: "default".to_string(),
            location_id: None,
            device_filters: DeviceFilters::default(),
            enable_socket_server: true,
            server: ServerOptions::default(),
            rate_limit: ratelimit::Options::default(),
            scheduler: poll::Options::default(),
            commands: command::Options::default(),
            poller: poller::Options::default(),
            token_refresh_worker: token_refresh::Options::default(),
        }
    }
}

impl AppOptions {
    /// Build options from validated settings
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let call_timeout = Duration::from_secs(settings.cloud.request_timeout_secs);
        let rate_limit = ratelimit::Options {
            window: Duration::from_secs(settings.rate_limit.window_secs),
            limit: settings.rate_limit.limit,
            cooldown: Duration::from_secs(settings.rate_limit.cooldown_secs),
        };
        let polling = &settings.polling;
        let tick = Duration::from_millis(polling.tick_millis);

        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            cloud: CloudOptions {
                base_url: settings.cloud.base_url.clone(),
                token_url: settings.cloud.token_url.clone(),
                connect_timeout: Duration::from_secs(settings.cloud.connect_timeout_secs),
                call_timeout,
                token_margin_secs: settings.cloud.token_margin_secs,
                credentials: OAuthCredentials {
                    client_id: settings.oauth.client_id.clone(),
                    client_secret: SecretString::from(settings.oauth.client_secret.clone()),
                    redirect_uri: settings.oauth.redirect_uri.clone(),
                },
            },
            instance_id: settings.instance_id.clone(),
            location_id: settings.location_id.clone(),
            device_filters: settings.device_filters.clone(),
            enable_socket_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            scheduler: poll::Options {
                tick,
                max_batch: polling.max_batch,
                failure_threshold: polling.failure_threshold,
                call_timeout,
                activity: activity::Options {
                    high_window: Duration::from_secs(polling.high_window_secs),
                    medium_window: Duration::from_secs(polling.medium_window_secs),
                    high_interval: Duration::from_secs(polling.high_interval_secs),
                    medium_interval: Duration::from_secs(polling.medium_interval_secs),
                    low_interval: Duration::from_secs(polling.low_interval_secs),
                },
            },
            commands: command::Options {
                verification_delay: Duration::from_secs_f64(
                    settings.commands.verification_delay_secs,
                ),
                optimistic_updates: settings.commands.enable_optimistic_updates,
                dispatch_timeout: rate_limit.window + call_timeout,
                verification_timeout: call_timeout,
            },
            rate_limit,
            poller: poller::Options {
                tick,
                ..poller::Options::default()
            },
            token_refresh_worker: token_refresh::Options {
                refresh_threshold: Duration::from_secs(
                    settings.cloud.refresh_threshold_secs.max(0) as u64,
                ),
                ..token_refresh::Options::default()
            },
        }
    }
}

/// Cloud connection options
#[derive(Debug, Clone)]
pub struct CloudOptions {
    pub base_url: String,
    pub token_url: String,
    pub connect_timeout: Duration,
    /// Total bound on one HTTP call
    pub call_timeout: Duration,
    pub token_margin_secs: i64,
    pub credentials: OAuthCredentials,
}

impl Default for CloudOptions {
    fn default() -> Self {
        Self {
            base_url: "https://api.smartthings.com/v1".to_string(),
            token_url: "https://api.smartthings.com/oauth/token".to_string(),
            connect_timeout: Duration::from_secs(4),
            call_timeout: Duration::from_secs(8),
            token_margin_secs: 30,
            credentials: OAuthCredentials {
                client_id: String::new(),
                client_secret: SecretString::from(String::new()),
                redirect_uri: String::new(),
            },
        }
    }
}

/// Lifecycle options for the bridge
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}
