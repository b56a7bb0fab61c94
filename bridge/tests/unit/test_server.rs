//! Host API routes

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use host_api::models::IntegrationStatus;
use stbridge::coordinator::command::{self, CommandCoordinator};
use stbridge::discovery::Discovery;
use stbridge::filesys::file::File;
use stbridge::server::serve::router;
use stbridge::server::state::ServerState;
use stbridge::storage::settings::DeviceFilters;

use crate::support::{
    cache_with, cloud, command_path, status_path, switch_status, temp_dir, ScriptedTransport,
    StaticTokens,
};

fn app(transport: Arc<ScriptedTransport>) -> (Router, watch::Sender<IntegrationStatus>) {
    let tokens = StaticTokens::new();
    let cloud = cloud(transport, tokens.clone());
    let cache = cache_with(&["d-1"]);
    let coordinator = Arc::new(CommandCoordinator::new(
        command::Options::default(),
        cloud.clone(),
        cache.clone(),
    ));
    let discovery = Arc::new(Discovery::new(
        cloud.clone(),
        cache.clone(),
        DeviceFilters::default(),
        None,
        File::new(temp_dir("server").join("devices.json")),
    ));
    let (status_tx, status_rx) = watch::channel(IntegrationStatus::Connecting);
    let state = ServerState::new(cache, coordinator, cloud, discovery, tokens, status_rx);
    (router(Arc::new(state)), status_tx)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_and_version() {
    let (app, _status) = app(ScriptedTransport::new());

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, "GET", "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_reports_integration_state() {
    let (app, status_tx) = app(ScriptedTransport::new());

    let (_, body) = send(&app, "GET", "/status", None).await;
    assert_eq!(body["status"], "connecting");
    assert_eq!(body["devices"], 1);
    assert_eq!(body["rate_limit"]["available"], 8);
    assert_eq!(body["token"]["has_tokens"], true);

    status_tx.send_replace(IntegrationStatus::ReauthorizationRequired);
    let (_, body) = send(&app, "GET", "/status", None).await;
    assert_eq!(body["status"], "reauthorization_required");
}

#[tokio::test]
async fn test_device_state_routes() {
    let (app, _status) = app(ScriptedTransport::new());

    let (status, body) = send(&app, "GET", "/devices", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, body) = send(&app, "GET", "/devices/d-1/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_id"], "d-1");
    assert_eq!(body["unreachable"], false);
    assert_eq!(body["stale_secs"], Value::Null);

    let (status, body) = send(&app, "GET", "/devices/nope/state", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_command_acknowledged_with_optimistic_state() {
    let transport = ScriptedTransport::new();
    transport.respond("POST", &command_path("d-1"), 200, json!({}));
    transport.respond("GET", &status_path("d-1"), 200, switch_status("on"));
    let (app, _status) = app(transport.clone());

    let (status, body) = send(
        &app,
        "POST",
        "/devices/d-1/commands",
        Some(json!({"capability": "switch", "command": "on"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["command_id"], 1);

    let (_, body) = send(&app, "GET", "/devices/d-1/state", None).await;
    assert_eq!(body["state"]["switch.switch"], "on");
    assert_eq!(body["pending_optimistic"], true);
    assert_eq!(transport.count("POST", &command_path("d-1")), 1);
}

#[tokio::test]
async fn test_command_errors_map_to_status_codes() {
    let transport = ScriptedTransport::new();
    transport.respond("POST", &command_path("d-1"), 503, json!({}));
    let (app, _status) = app(transport);

    let (status, body) = send(
        &app,
        "POST",
        "/devices/d-1/commands",
        Some(json!({"capability": "teleporter", "command": "engage"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_capability");

    let (status, _) = send(
        &app,
        "POST",
        "/devices/d-1/commands",
        Some(json!({"capability": "switch", "command": "on"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, body) = send(&app, "GET", "/devices/d-1/state", None).await;
    assert_eq!(body["pending_optimistic"], false);
}

#[tokio::test]
async fn test_scenes_routes() {
    let (app, _status) = app(ScriptedTransport::new());

    let (status, body) = send(&app, "GET", "/scenes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, _) = send(&app, "POST", "/scenes/s-404/execute", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
