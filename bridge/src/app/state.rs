//! Application state management

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use host_api::models::IntegrationStatus;

use crate::app::options::AppOptions;
use crate::authn::token_store::TokenStore;
use crate::coordinator::command::CommandCoordinator;
use crate::discovery::Discovery;
use crate::errors::BridgeError;
use crate::http::client::Transport;
use crate::http::cloud::CloudClient;
use crate::http::oauth::OAuthClient;
use crate::ratelimit::RateLimiter;
use crate::scheduler::poll::PollScheduler;
use crate::state::cache::StateCache;

/// Build the token store for the configured integration instance
pub fn token_store(options: &AppOptions, transport: Arc<dyn Transport>) -> TokenStore {
    let endpoint = Arc::new(OAuthClient::new(
        transport,
        &options.cloud.token_url,
        options.cloud.credentials.clone(),
    ));
    TokenStore::new(
        endpoint,
        options.layout.token_file(&options.instance_id),
        &options.instance_id,
        options.cloud.token_margin_secs,
    )
}

/// Main application state
pub struct AppState {
    /// Token pair for this integration instance
    pub tokens: Arc<TokenStore>,

    /// Shared rate budget for every cloud call
    pub limiter: Arc<RateLimiter>,

    pub cloud: Arc<CloudClient>,

    /// Authoritative device state
    pub cache: Arc<StateCache>,

    pub coordinator: Arc<CommandCoordinator>,

    pub scheduler: Arc<PollScheduler>,

    pub discovery: Arc<Discovery>,

    /// Integration status shown to the host
    pub status: Arc<watch::Sender<IntegrationStatus>>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(
        options: &AppOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BridgeError> {
        info!("Initializing application state...");

        let tokens = Arc::new(token_store(options, transport.clone()));
        let has_tokens = tokens.load().await?;

        let limiter = Arc::new(RateLimiter::new(options.rate_limit.clone()));
        let cloud = Arc::new(CloudClient::new(
            transport,
            tokens.clone(),
            limiter.clone(),
            &options.cloud.base_url,
        ));
        let cache = Arc::new(StateCache::new());

        let discovery = Arc::new(Discovery::new(
            cloud.clone(),
            cache.clone(),
            options.device_filters.clone(),
            options.location_id.clone(),
            options.layout.devices_cache_file(),
        ));
        if let Err(e) = discovery.load_cached().await {
            warn!("Ignoring unreadable device cache: {}", e);
        }

        let scheduler = Arc::new(PollScheduler::new(
            options.scheduler.clone(),
            cloud.clone(),
            cache.clone(),
        ));
        let coordinator = Arc::new(CommandCoordinator::new(
            options.commands.clone(),
            cloud.clone(),
            cache.clone(),
        ));

        let initial = if has_tokens {
            IntegrationStatus::Connecting
        } else {
            IntegrationStatus::ReauthorizationRequired
        };
        let (status, _) = watch::channel(initial);

        Ok(Self {
            tokens,
            limiter,
            cloud,
            cache,
            coordinator,
            scheduler,
            discovery,
            status: Arc::new(status),
        })
    }

    /// Current integration status
    pub fn integration_status(&self) -> IntegrationStatus {
        *self.status.borrow()
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        info!(
            "Shutting down application state ({} devices cached)...",
            self.cache.len()
        );
        Ok(())
    }
}
