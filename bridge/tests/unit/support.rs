//! Scripted collaborators shared by the integration tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use host_api::models::TokenStatus;
use stbridge::authn::token::Token;
use stbridge::authn::token_store::TokenStoreExt;
use stbridge::errors::BridgeError;
use stbridge::http::client::{endpoint_of, HttpRequest, HttpResponse, Transport};
use stbridge::http::cloud::CloudClient;
use stbridge::ratelimit::{self, RateLimiter};
use stbridge::state::cache::{DeviceInfo, StateCache};

pub const BASE_URL: &str = "http://cloud.test";

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<HttpResponse>>,
    sticky: HashMap<String, HttpResponse>,
    delays: HashMap<String, std::time::Duration>,
    calls: Vec<String>,
}

/// In-memory transport answering by `"<METHOD> <path>"`. Queued responses
/// are used first, then the sticky one, then a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

fn key(method: &str, path: &str) -> String {
    format!("{} {}", method, path)
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: &str, path: &str, status: u16, body: serde_json::Value) {
        self.script
            .lock()
            .unwrap()
            .sticky
            .insert(key(method, path), HttpResponse::new(status, body.to_string()));
    }

    /// Hold every answer to `"<METHOD> <path>"` for `delay`
    pub fn delay(&self, method: &str, path: &str, delay: std::time::Duration) {
        self.script
            .lock()
            .unwrap()
            .delays
            .insert(key(method, path), delay);
    }

    pub fn push(&self, method: &str, path: &str, status: u16, body: serde_json::Value) {
        self.script
            .lock()
            .unwrap()
            .queued
            .entry(key(method, path))
            .or_default()
            .push_back(HttpResponse::new(status, body.to_string()));
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        let wanted = key(method, path);
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == wanted)
            .count()
    }

    pub fn total(&self) -> usize {
        self.script.lock().unwrap().calls.len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, BridgeError> {
        let k = key(request.method.as_str(), &endpoint_of(&request.url));
        let (response, delay) = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(k.clone());

            let response = match script.queued.get_mut(&k).and_then(|q| q.pop_front()) {
                Some(response) => response,
                None => script.sticky.get(&k).cloned().unwrap_or_else(|| {
                    HttpResponse::new(404, json!({"error": {"code": "NotFound"}}).to_string())
                }),
            };
            (response, script.delays.get(&k).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }
}

/// Token store double counting refreshes
pub struct StaticTokens {
    token: Mutex<Token>,
    pub refreshes: AtomicUsize,
    reauth: Mutex<Option<String>>,
}

impl StaticTokens {
    pub fn new() -> Arc<Self> {
        Self::expiring_in(3600)
    }

    pub fn expiring_in(secs: i64) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token("access-0", secs)),
            refreshes: AtomicUsize::new(0),
            reauth: Mutex::new(None),
        })
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

pub fn token(access: &str, expires_in: i64) -> Token {
    Token {
        access_token: access.to_string(),
        refresh_token: "refresh-0".to_string(),
        expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        token_type: "Bearer".to_string(),
    }
}

#[async_trait]
impl TokenStoreExt for StaticTokens {
    async fn get_valid_token(&self) -> Result<Token, BridgeError> {
        if let Some(reason) = self.reauth.lock().unwrap().clone() {
            return Err(BridgeError::ReauthorizationRequired(reason));
        }
        Ok(self.token.lock().unwrap().clone())
    }

    async fn refresh(&self) -> Result<Token, BridgeError> {
        if let Some(reason) = self.reauth.lock().unwrap().clone() {
            return Err(BridgeError::ReauthorizationRequired(reason));
        }
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let fresh = token(&format!("access-{}", n), 3600);
        *self.token.lock().unwrap() = fresh.clone();
        Ok(fresh)
    }

    async fn refresh_rejected(&self, _rejected: &Token) -> Result<Token, BridgeError> {
        self.refresh().await
    }

    fn mark_reauthorization_required(&self, reason: &str) {
        *self.reauth.lock().unwrap() = Some(reason.to_string());
    }

    fn status(&self) -> TokenStatus {
        let token = self.token.lock().unwrap();
        TokenStatus {
            has_tokens: true,
            is_expired: token.is_expired(),
            remaining_secs: token.remaining_secs(Utc::now()),
            reauthorization_required: self.reauth.lock().unwrap().is_some(),
        }
    }
}

pub fn cloud(transport: Arc<ScriptedTransport>, tokens: Arc<StaticTokens>) -> Arc<CloudClient> {
    Arc::new(CloudClient::new(
        transport,
        tokens,
        Arc::new(RateLimiter::new(ratelimit::Options::default())),
        BASE_URL,
    ))
}

pub fn device(id: &str, capabilities: &[&str]) -> DeviceInfo {
    DeviceInfo {
        device_id: id.to_string(),
        label: format!("Device {}", id),
        room: None,
        kind: None,
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn cache_with(devices: &[&str]) -> Arc<StateCache> {
    let cache = Arc::new(StateCache::new());
    for id in devices {
        cache.upsert(device(id, &["switch"]));
    }
    cache
}

/// Status body with the given switch value
pub fn switch_status(value: &str) -> serde_json::Value {
    json!({"components": {"main": {"switch": {"switch": {"value": value}}}}})
}

pub fn status_path(device_id: &str) -> String {
    format!("/devices/{}/status", device_id)
}

pub fn command_path(device_id: &str) -> String {
    format!("/devices/{}/commands", device_id)
}

pub fn temp_dir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("stbridge-{}-{}", name, uuid::Uuid::new_v4()))
}
