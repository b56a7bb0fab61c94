//! Authenticated, rate-limited cloud client

use std::sync::Arc;

use http::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use cloud_api::models::ErrorResponse;

use crate::authn::token::Token;
use crate::authn::token_store::TokenStoreExt;
use crate::errors::BridgeError;
use crate::http::client::{HttpRequest, HttpResponse, Transport};
use crate::ratelimit::{Admission, RateLimiter};

/// What a caller does when the rate limiter has no budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Suspend until a slot frees up
    Wait,
    /// Return `RateLimited` immediately
    FailFast,
}

/// A single cloud call
#[derive(Debug, Clone)]
pub struct Call<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: &'a [(&'a str, &'a str)],
    pub body: Option<serde_json::Value>,
    pub device_id: Option<&'a str>,
    pub policy: AdmissionPolicy,
}

impl<'a> Call<'a> {
    pub fn get(path: &'a str) -> Self {
        Self {
            method: Method::GET,
            path,
            query: &[],
            body: None,
            device_id: None,
            policy: AdmissionPolicy::Wait,
        }
    }

    pub fn post(path: &'a str, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(path)
        }
    }

    pub fn query(mut self, query: &'a [(&'a str, &'a str)]) -> Self {
        self.query = query;
        self
    }

    pub fn device(mut self, device_id: &'a str) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.policy = AdmissionPolicy::FailFast;
        self
    }
}

enum Classified {
    Payload(serde_json::Value),
    Rejected,
}

/// Cloud REST client
pub struct CloudClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStoreExt>,
    limiter: Arc<RateLimiter>,
    base_url: String,
}

impl CloudClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenStoreExt>,
        limiter: Arc<RateLimiter>,
        base_url: &str,
    ) -> Self {
        Self {
            transport,
            tokens,
            limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Issue a call and decode the payload
    pub async fn call_json<T: DeserializeOwned>(&self, call: Call<'_>) -> Result<T, BridgeError> {
        let path = call.path.to_string();
        let value = self.call(call).await?;
        serde_json::from_value(value).map_err(|e| {
            warn!("Malformed payload from {}: {}", path, e);
            BridgeError::JsonError(e)
        })
    }

    /// Issue a call. A 401 is retried once after a token refresh; nothing
    /// else is retried.
    pub async fn call(&self, call: Call<'_>) -> Result<serde_json::Value, BridgeError> {
        let tag = |e: BridgeError| match call.device_id {
            Some(id) => e.with_device(id),
            None => e,
        };

        let token = self.tokens.get_valid_token().await.map_err(tag)?;
        match self.send_once(&call, &token).await.map_err(tag)? {
            Classified::Payload(value) => Ok(value),
            Classified::Rejected => {
                debug!("{} rejected the token, refreshing", call.path);
                let token = self.tokens.refresh_rejected(&token).await.map_err(tag)?;

                match self.send_once(&call, &token).await.map_err(tag)? {
                    Classified::Payload(value) => Ok(value),
                    Classified::Rejected => {
                        error!("{} rejected a freshly refreshed token", call.path);
                        self.tokens
                            .mark_reauthorization_required("token rejected after refresh");
                        Err(BridgeError::Unauthorized {
                            endpoint: call.path.to_string(),
                            device_id: call.device_id.map(str::to_string),
                        })
                    }
                }
            }
        }
    }

    async fn admit(&self, call: &Call<'_>) -> Result<(), BridgeError> {
        match call.policy {
            AdmissionPolicy::Wait => {
                self.limiter.acquire().await;
                Ok(())
            }
            AdmissionPolicy::FailFast => match self.limiter.admit() {
                Admission::Immediate => Ok(()),
                Admission::Wait(_) => Err(BridgeError::RateLimited {
                    endpoint: call.path.to_string(),
                    device_id: None,
                }),
            },
        }
    }

    async fn send_once(&self, call: &Call<'_>, token: &Token) -> Result<Classified, BridgeError> {
        self.admit(call).await?;

        let mut request = HttpRequest::new(call.method.clone(), format!("{}{}", self.base_url, call.path))
            .bearer(&token.access_token)
            .query(call.query);
        if let Some(body) = &call.body {
            request = request.json(body.clone());
        }

        let response = self.transport.send(request).await?;
        self.classify(call.path, response)
    }

    fn classify(&self, path: &str, response: HttpResponse) -> Result<Classified, BridgeError> {
        let status = response.status;

        if response.is_success() {
            if response.body.trim().is_empty() {
                return Ok(Classified::Payload(serde_json::Value::Null));
            }
            let value = serde_json::from_str(&response.body)?;
            return Ok(Classified::Payload(value));
        }

        if status == 401 {
            return Ok(Classified::Rejected);
        }

        if status == 429 {
            self.limiter.on_rate_limited();
            return Err(BridgeError::RateLimited {
                endpoint: path.to_string(),
                device_id: None,
            });
        }

        let message = serde_json::from_str::<ErrorResponse>(&response.body)
            .map(|e| match e.error.message {
                Some(message) => format!("{}: {}", e.error.code, message),
                None => e.error.code,
            })
            .unwrap_or_else(|_| response.body.chars().take(200).collect());

        if status >= 500 {
            warn!("{} failed with {}: {}", path, status, message);
            return Err(BridgeError::transient(path, Some(status), message));
        }

        warn!("{} rejected with {}: {}", path, status, message);
        Err(BridgeError::Api {
            endpoint: path.to_string(),
            status,
            device_id: None,
            message,
        })
    }
}
