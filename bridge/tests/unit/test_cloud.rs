//! Cloud client response classification

use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use stbridge::authn::token_store::TokenStoreExt;
use stbridge::errors::BridgeError;

use crate::support::{cloud, status_path, switch_status, ScriptedTransport, StaticTokens};

#[tokio::test]
async fn test_double_401_is_unauthorized_after_one_refresh() {
    let transport = ScriptedTransport::new();
    transport.respond("GET", &status_path("d-1"), 401, json!({}));
    let tokens = StaticTokens::new();
    let cloud = cloud(transport.clone(), tokens.clone());

    let err = cloud.device_status("d-1", false).await.unwrap_err();
    match &err {
        BridgeError::Unauthorized { device_id, .. } => {
            assert_eq!(device_id.as_deref(), Some("d-1"))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_fatal());
    assert_eq!(tokens.refresh_count(), 1);
    assert_eq!(transport.count("GET", &status_path("d-1")), 2);

    // the store is latched; nothing else reaches the cloud
    assert!(tokens.status().reauthorization_required);
    assert!(cloud.device_status("d-1", false).await.unwrap_err().is_fatal());
    assert_eq!(tokens.refresh_count(), 1);
    assert_eq!(transport.count("GET", &status_path("d-1")), 2);
}

#[tokio::test]
async fn test_single_401_retried_with_fresh_token() {
    let transport = ScriptedTransport::new();
    transport.push("GET", &status_path("d-1"), 401, json!({}));
    transport.respond("GET", &status_path("d-1"), 200, switch_status("on"));
    let tokens = StaticTokens::new();
    let cloud = cloud(transport.clone(), tokens.clone());

    let status = cloud.device_status("d-1", false).await.unwrap();
    assert_eq!(status.main().unwrap()["switch"]["switch"].value, json!("on"));
    assert_eq!(tokens.refresh_count(), 1);
    assert!(!tokens.status().reauthorization_required);
}

#[tokio::test(start_paused = true)]
async fn test_429_starts_cooldown() {
    let transport = ScriptedTransport::new();
    transport.push("GET", &status_path("d-1"), 429, json!({}));
    transport.respond("GET", &status_path("d-1"), 200, switch_status("on"));
    let cloud = cloud(transport.clone(), StaticTokens::new());

    let err = cloud.device_status("d-1", true).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert!(!err.is_fatal());
    assert_eq!(cloud.limiter().available(), 0);

    // fail-fast callers are turned away without a request
    assert!(cloud.device_status("d-1", true).await.unwrap_err().is_rate_limited());
    assert_eq!(transport.count("GET", &status_path("d-1")), 1);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_ok!(cloud.device_status("d-1", true).await);
}

#[tokio::test]
async fn test_server_and_client_errors() {
    let transport = ScriptedTransport::new();
    transport.respond(
        "GET",
        &status_path("d-1"),
        503,
        json!({"error": {"code": "ServiceUnavailable"}}),
    );
    transport.respond(
        "POST",
        "/devices/d-1/commands",
        422,
        json!({"error": {"code": "ConstraintViolationError", "message": "bad argument"}}),
    );
    let tokens = StaticTokens::new();
    let cloud = cloud(transport.clone(), tokens.clone());

    let err = assert_err!(cloud.device_status("d-1", false).await);
    assert!(err.is_transient());
    assert_eq!(err.status_code(), Some(503));

    let err = cloud
        .send_command("d-1", "switchLevel", "setLevel", vec![json!(500)])
        .await
        .unwrap_err();
    match err {
        BridgeError::Api {
            status,
            device_id,
            message,
            ..
        } => {
            assert_eq!(status, 422);
            assert_eq!(device_id.as_deref(), Some("d-1"));
            assert!(message.contains("bad argument"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // no retries and no refreshes for non-auth failures
    assert_eq!(transport.total(), 2);
    assert_eq!(tokens.refresh_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_waiting_callers_respect_the_window() {
    let transport = ScriptedTransport::new();
    transport.respond("GET", "/locations", 200, json!({"items": []}));
    let cloud = cloud(transport.clone(), StaticTokens::new());
    let start = Instant::now();

    let finished = join_all((0..10).map(|_| {
        let cloud = cloud.clone();
        async move {
            cloud.list_locations().await.unwrap();
            Instant::now()
        }
    }))
    .await;

    let immediate = finished
        .iter()
        .filter(|t| t.duration_since(start) < Duration::from_secs(10))
        .count();
    assert_eq!(immediate, 8);
    assert_eq!(transport.count("GET", "/locations"), 10);
}
