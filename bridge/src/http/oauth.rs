//! OAuth2 token endpoint

use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use cloud_api::models::{TokenErrorResponse, TokenResponse};

use crate::errors::BridgeError;
use crate::http::client::{endpoint_of, HttpRequest, Transport};

/// Token endpoint trait for testability
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code for a token pair
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, BridgeError>;

    /// Exchange a refresh token for a new token pair
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, BridgeError>;
}

/// OAuth2 client credentials
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
}

/// Form-encoded OAuth2 client for the cloud token endpoint
pub struct OAuthClient {
    transport: Arc<dyn Transport>,
    token_url: String,
    credentials: OAuthCredentials,
}

impl OAuthClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        token_url: &str,
        credentials: OAuthCredentials,
    ) -> Self {
        Self {
            transport,
            token_url: token_url.to_string(),
            credentials,
        }
    }

    async fn grant(&self, form: &[(&str, &str)]) -> Result<TokenResponse, BridgeError> {
        let endpoint = endpoint_of(&self.token_url);
        let request = HttpRequest::new(Method::POST, &self.token_url).form(form);

        let response = self.transport.send(request).await.map_err(|e| {
            warn!("Token endpoint unreachable: {}", e);
            BridgeError::ReauthorizationRequired(format!("token endpoint unreachable: {}", e))
        })?;

        if response.is_success() {
            let token: TokenResponse = serde_json::from_str(&response.body).map_err(|e| {
                BridgeError::ReauthorizationRequired(format!("malformed token response: {}", e))
            })?;
            debug!("Token grant succeeded on {}", endpoint);
            return Ok(token);
        }

        let reason = serde_json::from_str::<TokenErrorResponse>(&response.body)
            .map(|e| match e.error_description {
                Some(desc) => format!("{}: {}", e.error, desc),
                None => e.error,
            })
            .unwrap_or_else(|_| format!("status {}", response.status));

        warn!("Token grant rejected ({}): {}", response.status, reason);
        Err(BridgeError::ReauthorizationRequired(reason))
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, BridgeError> {
        let creds = &self.credentials;
        self.grant(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &creds.client_id),
            ("client_secret", creds.client_secret.expose_secret()),
            ("redirect_uri", &creds.redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, BridgeError> {
        let creds = &self.credentials;
        self.grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &creds.client_id),
            ("client_secret", creds.client_secret.expose_secret()),
        ])
        .await
    }
}
