//! OAuth2 token pair

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use cloud_api::models::TokenResponse;

use crate::errors::BridgeError;

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// An access/refresh token pair with its absolute expiry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl Token {
    /// Build a token from a token endpoint response.
    ///
    /// `previous_refresh` is kept when the response carries no new refresh token.
    pub fn from_response(
        response: TokenResponse,
        previous_refresh: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, BridgeError> {
        if response.access_token.is_empty() {
            return Err(BridgeError::ReauthorizationRequired(
                "token endpoint returned an empty access token".to_string(),
            ));
        }

        let refresh_token = match response.refresh_token {
            Some(rt) if !rt.is_empty() => rt,
            _ => previous_refresh
                .map(str::to_string)
                .ok_or_else(|| {
                    BridgeError::ReauthorizationRequired(
                        "token endpoint returned no refresh token".to_string(),
                    )
                })?,
        };

        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = Duration::try_seconds(expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                BridgeError::ReauthorizationRequired(format!(
                    "malformed token response: expires_in {} out of range",
                    expires_in
                ))
            })?;

        Ok(Self {
            access_token: response.access_token,
            refresh_token,
            expires_at,
            token_type: response.token_type.unwrap_or_else(default_token_type),
        })
    }

    /// Seconds until expiry, negative once expired
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds()
    }

    /// True if the token stays valid for at least `margin_secs` past `now`
    pub fn valid_for(&self, margin_secs: i64, now: DateTime<Utc>) -> bool {
        self.remaining_secs(now) >= margin_secs
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
