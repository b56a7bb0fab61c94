//! Token store integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use secrecy::SecretString;
use serde_json::json;

use cloud_api::models::TokenResponse;
use stbridge::authn::token_store::{TokenStore, TokenStoreExt};
use stbridge::errors::BridgeError;
use stbridge::filesys::file::File;
use stbridge::http::oauth::{OAuthClient, OAuthCredentials, TokenEndpoint};
use stbridge::storage::tokens::load_tokens;

use crate::support::{temp_dir, token, ScriptedTransport};

struct SlowEndpoint {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl TokenEndpoint for SlowEndpoint {
    async fn exchange_code(&self, _code: &str) -> Result<TokenResponse, BridgeError> {
        self.refresh("code").await
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, BridgeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(100)).await;
        if self.fail {
            return Err(BridgeError::ReauthorizationRequired("invalid_grant".into()));
        }
        Ok(TokenResponse {
            access_token: format!("access-{}", n),
            refresh_token: Some(format!("refresh-{}", n)),
            expires_in: Some(3600),
            token_type: Some("bearer".into()),
            scope: None,
        })
    }
}

fn slow_store(fail: bool) -> (Arc<SlowEndpoint>, Arc<TokenStore>, File) {
    let endpoint = Arc::new(SlowEndpoint {
        calls: AtomicUsize::new(0),
        fail,
    });
    let file = File::new(temp_dir("tokens").join("default.json"));
    let store = Arc::new(TokenStore::new(endpoint.clone(), file.clone(), "default", 30));
    (endpoint, store, file)
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let (endpoint, store, file) = slow_store(false);
    // inside the 30s margin
    store.set_token(token("access-0", 10));

    let results = join_all((0..10).map(|_| {
        let store = store.clone();
        async move { store.get_valid_token().await }
    }))
    .await;

    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    for result in results {
        let t = result.unwrap();
        assert_eq!(t.access_token, "access-1");
        assert!(t.remaining_secs(chrono::Utc::now()) > 30);
    }

    let record = load_tokens(&file).await.unwrap().unwrap();
    assert_eq!(record.token.refresh_token, "refresh-1");
    assert_eq!(record.instance_id, "default");
}

#[tokio::test]
async fn test_failed_refresh_is_fatal_for_every_caller() {
    let (endpoint, store, _) = slow_store(true);
    store.set_token(token("access-0", 10));

    let results = join_all((0..5).map(|_| {
        let store = store.clone();
        async move { store.get_valid_token().await }
    }))
    .await;

    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| matches!(r, Err(e) if e.is_fatal())));

    // latched: no further refresh attempts
    assert!(store.get_valid_token().await.unwrap_err().is_fatal());
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    assert!(store.status().reauthorization_required);
}

#[tokio::test]
async fn test_invalid_grant_from_token_endpoint() {
    let transport = ScriptedTransport::new();
    transport.respond(
        "POST",
        "/oauth/token",
        400,
        json!({"error": "invalid_grant", "error_description": "refresh token revoked"}),
    );
    let endpoint = Arc::new(OAuthClient::new(
        transport.clone(),
        "http://cloud.test/oauth/token",
        OAuthCredentials {
            client_id: "client".into(),
            client_secret: SecretString::from("secret".to_string()),
            redirect_uri: "https://example.invalid/cb".into(),
        },
    ));
    let store = TokenStore::new(
        endpoint,
        File::new(temp_dir("tokens").join("default.json")),
        "default",
        30,
    );
    store.set_token(token("access-0", 5));

    match store.get_valid_token().await {
        Err(BridgeError::ReauthorizationRequired(reason)) => {
            assert!(reason.contains("invalid_grant"))
        }
        other => panic!("unexpected result: {:?}", other.map(|t| t.access_token)),
    }
    assert_eq!(transport.count("POST", "/oauth/token"), 1);
}

#[tokio::test]
async fn test_authorize_then_load() {
    let (_, store, file) = slow_store(false);
    store.authorize("code").await.unwrap();

    let reloaded = TokenStore::new(
        Arc::new(SlowEndpoint {
            calls: AtomicUsize::new(0),
            fail: false,
        }),
        file,
        "default",
        30,
    );
    assert!(reloaded.load().await.unwrap());
    assert_eq!(reloaded.current().unwrap().access_token, "access-1");
    assert!(!reloaded.status().reauthorization_required);
}
