//! Token store with single-flight refresh

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use host_api::models::TokenStatus;

use crate::authn::token::Token;
use crate::errors::BridgeError;
use crate::filesys::file::File;
use crate::http::oauth::TokenEndpoint;
use crate::storage::tokens::{load_tokens, save_tokens, TokenRecord};

/// Token store trait for testability
#[async_trait]
pub trait TokenStoreExt: Send + Sync {
    /// A token valid for at least the safety margin, refreshing first if needed
    async fn get_valid_token(&self) -> Result<Token, BridgeError>;

    /// Refresh now, or join the refresh already in flight
    async fn refresh(&self) -> Result<Token, BridgeError>;

    /// Called after the cloud rejected `rejected`. Refreshes unless the token
    /// has already been replaced since it was handed out.
    async fn refresh_rejected(&self, rejected: &Token) -> Result<Token, BridgeError>;

    /// Latch the store; every later call fails until re-authorization
    fn mark_reauthorization_required(&self, reason: &str);

    fn status(&self) -> TokenStatus;
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Token, String>>>;

#[derive(Default)]
struct StoreState {
    token: Option<Token>,
    in_flight: Option<RefreshFuture>,
    reauth_required: Option<String>,
}

struct Inner {
    endpoint: Arc<dyn TokenEndpoint>,
    token_file: File,
    instance_id: String,
    margin_secs: i64,
    state: Mutex<StoreState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn persist(&self, token: &Token) {
        let record = TokenRecord::new(&self.instance_id, token.clone());
        if let Err(e) = save_tokens(&self.token_file, &record).await {
            // the new pair stays in memory; the next refresh persists again
            error!("Failed to persist refreshed token: {}", e);
        }
    }

    async fn run_refresh(self: Arc<Self>, refresh_token: String) -> Result<Token, String> {
        info!("Refreshing access token...");

        let result = self.endpoint.refresh(&refresh_token).await.and_then(|response| {
            Token::from_response(response, Some(&refresh_token), Utc::now())
        });

        let outcome = {
            let mut state = self.state();
            state.in_flight = None;
            match result {
                Ok(token) => {
                    state.token = Some(token.clone());
                    Ok(token)
                }
                Err(e) => {
                    let reason = match e {
                        BridgeError::ReauthorizationRequired(reason) => reason,
                        other => other.to_string(),
                    };
                    state.reauth_required = Some(reason.clone());
                    Err(reason)
                }
            }
        };

        match &outcome {
            Ok(token) => {
                info!("Token refreshed, expires at {}", token.expires_at);
                self.persist(token).await;
            }
            Err(reason) => error!("Token refresh failed, reauthorization required: {}", reason),
        }

        outcome
    }
}

/// Owns the token pair for one integration instance
pub struct TokenStore {
    inner: Arc<Inner>,
}

impl TokenStore {
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        token_file: File,
        instance_id: &str,
        margin_secs: i64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                token_file,
                instance_id: instance_id.to_string(),
                margin_secs,
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    /// Load the persisted token, if any. Returns whether one was found.
    pub async fn load(&self) -> Result<bool, BridgeError> {
        match load_tokens(&self.inner.token_file).await? {
            Some(record) => {
                debug!("Loaded token for instance {}", record.instance_id);
                self.inner.state().token = Some(record.token);
                Ok(true)
            }
            None => {
                warn!(
                    "No token stored for instance {}, authorization required",
                    self.inner.instance_id
                );
                Ok(false)
            }
        }
    }

    /// Install a token directly (startup from a known pair, tests)
    pub fn set_token(&self, token: Token) {
        let mut state = self.inner.state();
        state.token = Some(token);
        state.reauth_required = None;
    }

    /// Exchange an authorization code and clear any latched reauthorization
    pub async fn authorize(&self, code: &str) -> Result<Token, BridgeError> {
        info!("Exchanging authorization code...");
        let response = self.inner.endpoint.exchange_code(code).await?;
        let token = Token::from_response(response, None, Utc::now())?;

        save_tokens(
            &self.inner.token_file,
            &TokenRecord::new(&self.inner.instance_id, token.clone()),
        )
        .await?;

        self.set_token(token.clone());
        info!("Authorization complete, token expires at {}", token.expires_at);
        Ok(token)
    }

    /// Current token without any validity check
    pub fn current(&self) -> Option<Token> {
        self.inner.state().token.clone()
    }

    fn start_or_join_refresh(&self) -> Result<RefreshFuture, BridgeError> {
        let mut state = self.inner.state();
        if let Some(reason) = &state.reauth_required {
            return Err(BridgeError::ReauthorizationRequired(reason.clone()));
        }
        if let Some(in_flight) = &state.in_flight {
            debug!("Joining in-flight token refresh");
            return Ok(in_flight.clone());
        }

        let refresh_token = state
            .token
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .ok_or_else(|| BridgeError::ReauthorizationRequired("no token stored".to_string()))?;

        let refresh = self.inner.clone().run_refresh(refresh_token).boxed().shared();
        state.in_flight = Some(refresh.clone());
        Ok(refresh)
    }

    async fn await_refresh(&self) -> Result<Token, BridgeError> {
        let refresh = self.start_or_join_refresh()?;
        refresh.await.map_err(BridgeError::ReauthorizationRequired)
    }
}

#[async_trait]
impl TokenStoreExt for TokenStore {
    async fn get_valid_token(&self) -> Result<Token, BridgeError> {
        let margin = self.inner.margin_secs;
        {
            let state = self.inner.state();
            if let Some(reason) = &state.reauth_required {
                return Err(BridgeError::ReauthorizationRequired(reason.clone()));
            }
            match &state.token {
                Some(token) if token.valid_for(margin, Utc::now()) => return Ok(token.clone()),
                Some(_) => {}
                None => {
                    return Err(BridgeError::ReauthorizationRequired(
                        "no token stored".to_string(),
                    ))
                }
            }
        }

        let token = self.await_refresh().await?;
        if !token.valid_for(margin, Utc::now()) {
            return Err(BridgeError::transient(
                "/oauth/token",
                None,
                format!(
                    "refreshed token expires in {}s, inside the {}s margin",
                    token.remaining_secs(Utc::now()),
                    margin
                ),
            ));
        }
        Ok(token)
    }

    async fn refresh(&self) -> Result<Token, BridgeError> {
        self.await_refresh().await
    }

    async fn refresh_rejected(&self, rejected: &Token) -> Result<Token, BridgeError> {
        {
            let state = self.inner.state();
            if state.reauth_required.is_none() && state.in_flight.is_none() {
                if let Some(current) = &state.token {
                    if current.access_token != rejected.access_token {
                        debug!("Rejected token already replaced");
                        return Ok(current.clone());
                    }
                }
            }
        }
        self.await_refresh().await
    }

    fn mark_reauthorization_required(&self, reason: &str) {
        warn!("Reauthorization required: {}", reason);
        self.inner.state().reauth_required = Some(reason.to_string());
    }

    fn status(&self) -> TokenStatus {
        let state = self.inner.state();
        let now = Utc::now();
        TokenStatus {
            has_tokens: state.token.is_some(),
            is_expired: state.token.as_ref().map_or(true, |t| t.expires_at <= now),
            remaining_secs: state
                .token
                .as_ref()
                .map_or(0, |t| t.remaining_secs(now).max(0)),
            reauthorization_required: state.reauth_required.is_some() || state.token.is_none(),
        }
    }
}
