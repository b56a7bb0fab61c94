//! Main application run loop

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{token_store, AppState};
use crate::authn::token_store::{TokenStore, TokenStoreExt};
use crate::errors::BridgeError;
use crate::http::client::{HttpClient, Transport};
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{poller, token_refresh};

/// Run the bridge
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BridgeError> {
    info!("Initializing SmartThings bridge...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start bridge: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

/// Exchange an authorization code and persist the resulting token pair
pub async fn authorize(options: &AppOptions, code: &str) -> Result<(), BridgeError> {
    let transport = http_transport(options)?;
    let tokens = token_store(options, transport);
    let token = tokens.authorize(code).await?;
    info!(
        "Authorized instance {}, token valid for {}s",
        options.instance_id,
        token.remaining_secs(chrono::Utc::now())
    );
    Ok(())
}

fn http_transport(options: &AppOptions) -> Result<Arc<dyn Transport>, BridgeError> {
    Ok(Arc::new(HttpClient::new(
        options.cloud.connect_timeout,
        options.cloud.call_timeout,
    )?))
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, BridgeError> {
    options.layout.setup().await?;
    let app_state = init_app_state(options, shutdown_manager).await?;

    init_token_refresh_worker(
        app_state.tokens.clone(),
        options.token_refresh_worker.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    if options.enable_socket_server {
        init_socket_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    init_poller_worker(
        options.poller.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    Ok(app_state)
}

async fn init_app_state(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, BridgeError> {
    let transport = http_transport(options)?;
    let app_state = Arc::new(AppState::init(options, transport).await?);
    shutdown_manager.with_app_state(app_state.clone())?;
    Ok(app_state)
}

async fn init_token_refresh_worker(
    tokens: Arc<TokenStore>,
    options: token_refresh::Options,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), BridgeError> {
    info!("Initializing token refresh worker...");

    // Refresh token if expired
    if tokens.status().has_tokens && tokens.status().is_expired {
        if let Err(e) = tokens.refresh().await {
            error!("Failed to refresh expired token: {}", e);
        }
    }

    let token_refresh_handle = tokio::spawn(async move {
        token_refresh::run(
            &options,
            tokens.as_ref(),
            |wait| tokio::time::sleep(wait),
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_token_refresh_worker_handle(token_refresh_handle)?;
    Ok(())
}

async fn init_poller_worker(
    options: poller::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), BridgeError> {
    info!("Initializing poller worker...");

    let poller_handle = tokio::spawn(async move {
        let deps = poller::Deps {
            scheduler: app_state.scheduler.as_ref(),
            discovery: app_state.discovery.as_ref(),
            tokens: app_state.tokens.as_ref(),
            status: app_state.status.as_ref(),
        };
        poller::run(
            &options,
            deps,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_poller_worker_handle(poller_handle)?;
    Ok(())
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), BridgeError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::from_app(&app_state);

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    socket_server_handle: Option<JoinHandle<Result<(), BridgeError>>>,
    poller_worker_handle: Option<JoinHandle<()>>,
    token_refresh_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            socket_server_handle: None,
            poller_worker_handle: None,
            token_refresh_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), BridgeError> {
        if self.app_state.is_some() {
            return Err(BridgeError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_token_refresh_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), BridgeError> {
        if self.token_refresh_worker_handle.is_some() {
            return Err(BridgeError::ShutdownError(
                "token_refresh_handle already set".to_string(),
            ));
        }
        self.token_refresh_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_poller_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), BridgeError> {
        if self.poller_worker_handle.is_some() {
            return Err(BridgeError::ShutdownError("poller_handle already set".to_string()));
        }
        self.poller_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), BridgeError>>,
    ) -> Result<(), BridgeError> {
        if self.socket_server_handle.is_some() {
            return Err(BridgeError::ShutdownError("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), BridgeError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), BridgeError> {
        info!("Shutting down SmartThings bridge...");

        // 1. Token refresh worker
        if let Some(handle) = self.token_refresh_worker_handle.take() {
            handle.await.map_err(|e| BridgeError::ShutdownError(e.to_string()))?;
        }

        // 2. Poller worker
        if let Some(handle) = self.poller_worker_handle.take() {
            handle.await.map_err(|e| BridgeError::ShutdownError(e.to_string()))?;
        }

        // 3. Socket server
        if let Some(handle) = self.socket_server_handle.take() {
            handle.await.map_err(|e| BridgeError::ShutdownError(e.to_string()))??;
        }

        // 4. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
