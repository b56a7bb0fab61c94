//! Server state

use std::sync::Arc;

use tokio::sync::watch;

use host_api::models::IntegrationStatus;

use crate::app::state::AppState;
use crate::authn::token_store::TokenStoreExt;
use crate::coordinator::command::CommandCoordinator;
use crate::discovery::Discovery;
use crate::http::cloud::CloudClient;
use crate::state::cache::StateCache;

/// Server state shared across handlers
pub struct ServerState {
    pub cache: Arc<StateCache>,
    pub coordinator: Arc<CommandCoordinator>,
    pub cloud: Arc<CloudClient>,
    pub discovery: Arc<Discovery>,
    pub tokens: Arc<dyn TokenStoreExt>,
    pub status: watch::Receiver<IntegrationStatus>,
}

impl ServerState {
    pub fn new(
        cache: Arc<StateCache>,
        coordinator: Arc<CommandCoordinator>,
        cloud: Arc<CloudClient>,
        discovery: Arc<Discovery>,
        tokens: Arc<dyn TokenStoreExt>,
        status: watch::Receiver<IntegrationStatus>,
    ) -> Self {
        Self {
            cache,
            coordinator,
            cloud,
            discovery,
            tokens,
            status,
        }
    }

    pub fn from_app(app: &AppState) -> Self {
        Self::new(
            app.cache.clone(),
            app.coordinator.clone(),
            app.cloud.clone(),
            app.discovery.clone(),
            app.tokens.clone(),
            app.status.subscribe(),
        )
    }
}
