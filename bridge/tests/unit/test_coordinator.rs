//! Command dispatch, verification and reconciliation

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use stbridge::coordinator::command::{self, CommandCoordinator};
use stbridge::coordinator::fsm::CommandState;
use stbridge::devices::capability::state_key;
use stbridge::errors::BridgeError;
use stbridge::scheduler::activity::ActivityBucket;
use stbridge::scheduler::poll::{self, PollScheduler};
use stbridge::state::cache::{PollOutcome, StateCache};

use crate::support::{
    cache_with, cloud, command_path, status_path, switch_status, ScriptedTransport, StaticTokens,
};

fn switch_key() -> String {
    state_key("switch", "switch")
}

fn seed_off(cache: &StateCache, device_id: &str) {
    let mut observed = stbridge::devices::capability::StateMap::new();
    observed.insert(switch_key(), json!("off"));
    assert_eq!(
        cache.apply_poll(device_id, observed, Instant::now()),
        PollOutcome::Applied { changed: true }
    );
}

fn setup() -> (Arc<ScriptedTransport>, Arc<StateCache>, Arc<CommandCoordinator>) {
    let transport = ScriptedTransport::new();
    transport.respond("POST", &command_path("d-1"), 200, json!({"results": []}));
    let cache = cache_with(&["d-1"]);
    seed_off(&cache, "d-1");
    let coordinator = Arc::new(CommandCoordinator::new(
        command::Options::default(),
        cloud(transport.clone(), StaticTokens::new()),
        cache.clone(),
    ));
    (transport, cache, coordinator)
}

#[tokio::test(start_paused = true)]
async fn test_command_confirmed() {
    let (transport, cache, coordinator) = setup();
    transport.respond("GET", &status_path("d-1"), 200, switch_status("on"));

    let ticket = coordinator
        .execute_and_verify("d-1", "switch", "on", vec![])
        .await
        .unwrap();
    assert_eq!(ticket.state, CommandState::Confirmed);

    let record = cache.get("d-1").unwrap();
    assert_eq!(record.state[&switch_key()], json!("on"));
    assert!(!record.pending_optimistic);
    assert!(record.pending_command.is_none());
    assert_eq!(transport.count("GET", &status_path("d-1")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_command_corrected_by_cloud() {
    let (transport, cache, coordinator) = setup();
    transport.respond("GET", &status_path("d-1"), 200, switch_status("off"));

    let ticket = coordinator
        .execute_and_verify("d-1", "switch", "on", vec![])
        .await
        .unwrap();
    assert_eq!(ticket.state, CommandState::Corrected);
    assert_eq!(cache.get("d-1").unwrap().state[&switch_key()], json!("off"));
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_state_visible_before_verification() {
    let (transport, cache, coordinator) = setup();
    transport.respond("GET", &status_path("d-1"), 200, switch_status("on"));

    let ticket = coordinator.execute("d-1", "switch", "on", vec![]).await.unwrap();
    assert_eq!(ticket.state, CommandState::Verifying);

    let record = cache.get("d-1").unwrap();
    assert_eq!(record.state[&switch_key()], json!("on"));
    assert!(record.pending_optimistic);
    assert!(record.pending_command.is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let record = cache.get("d-1").unwrap();
    assert!(!record.pending_optimistic);
    assert!(record.pending_command.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_failure_reverts_prediction() {
    let (transport, cache, coordinator) = setup();
    transport.respond("POST", &command_path("d-1"), 502, json!({}));

    let err = coordinator
        .execute_and_verify("d-1", "switch", "on", vec![])
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let record = cache.get("d-1").unwrap();
    assert_eq!(record.state[&switch_key()], json!("off"));
    assert!(!record.pending_optimistic);
    assert!(record.pending_command.is_none());
    assert_eq!(transport.count("GET", &status_path("d-1")), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_commands_rejected_before_dispatch() {
    let (transport, cache, coordinator) = setup();

    let err = coordinator
        .execute_and_verify("d-1", "teleporter", "engage", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnsupportedCapability(_)));

    let err = coordinator
        .execute_and_verify("d-1", "switchLevel", "setLevel", vec![json!(150)])
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidCommand(_)));

    let err = coordinator
        .execute_and_verify("d-9", "switch", "on", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotFound(_)));

    assert_eq!(transport.total(), 0);
    assert!(!cache.get("d-1").unwrap().pending_optimistic);
}

#[tokio::test(start_paused = true)]
async fn test_newer_command_supersedes() {
    let (transport, cache, coordinator) = setup();
    transport.respond("GET", &status_path("d-1"), 200, switch_status("off"));

    let first = coordinator.execute_and_verify("d-1", "switch", "on", vec![]);
    let second = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        coordinator
            .execute_and_verify("d-1", "switch", "off", vec![])
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap().state, CommandState::Superseded);
    assert_eq!(second.unwrap().state, CommandState::Confirmed);

    let record = cache.get("d-1").unwrap();
    assert_eq!(record.state[&switch_key()], json!("off"));
    assert!(!record.pending_optimistic);
}

#[tokio::test(start_paused = true)]
async fn test_no_polls_while_command_pending() {
    let (transport, cache, coordinator) = setup();
    transport.respond("GET", &status_path("d-1"), 200, switch_status("on"));
    let scheduler = PollScheduler::new(
        poll::Options::default(),
        cloud(transport.clone(), StaticTokens::new()),
        cache.clone(),
    );

    // long past the LOW interval
    tokio::time::advance(Duration::from_secs(60)).await;
    coordinator.execute("d-1", "switch", "on", vec![]).await.unwrap();

    for _ in 0..7 {
        let report = scheduler.tick().await;
        assert_eq!(report.polled, 0);
        tokio::time::advance(Duration::from_millis(200)).await;
    }
    assert_eq!(transport.count("GET", &status_path("d-1")), 0);

    // verification read is the only status call of the window
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.count("GET", &status_path("d-1")), 1);

    let record = cache.get("d-1").unwrap();
    assert!(record.pending_command.is_none());
    assert_eq!(
        scheduler.options().activity.bucket(&record, Instant::now()),
        ActivityBucket::High
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_command_to_unreachable_device() {
    let (transport, cache, coordinator) = setup();
    transport.respond("POST", &command_path("d-1"), 503, json!({}));
    for _ in 0..5 {
        cache.record_poll_failure("d-1", 5);
    }

    let err = coordinator
        .execute_and_verify("d-1", "switch", "on", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::DeviceUnreachable(ref id) if id == "d-1"));
    // the command was still sent
    assert_eq!(transport.count("POST", &command_path("d-1")), 1);
    assert_eq!(cache.get("d-1").unwrap().state[&switch_key()], json!("off"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_command_keeps_accepted_earlier_prediction() {
    let (transport, cache, coordinator) = setup();
    transport.push("POST", &command_path("d-1"), 200, json!({"results": []}));
    transport.push("POST", &command_path("d-1"), 502, json!({}));
    transport.respond("GET", &status_path("d-1"), 200, switch_status("on"));
    let scheduler = PollScheduler::new(
        poll::Options::default(),
        cloud(transport.clone(), StaticTokens::new()),
        cache.clone(),
    );

    let accepted = coordinator.execute("d-1", "switch", "on", vec![]).await.unwrap();
    assert_eq!(accepted.state, CommandState::Verifying);
    let err = coordinator
        .execute_and_verify("d-1", "switch", "off", vec![])
        .await
        .unwrap_err();
    assert!(err.is_transient());

    // the cloud took "on"; only the failed "off" is undone
    let record = cache.get("d-1").unwrap();
    assert_eq!(record.state[&switch_key()], json!("on"));
    assert!(record.pending_optimistic);
    assert!(record.pending_command.is_none());

    tokio::time::sleep(Duration::from_secs(3)).await;
    let report = scheduler.tick().await;
    assert_eq!(report.polled, 1);

    let record = cache.get("d-1").unwrap();
    assert_eq!(record.state[&switch_key()], json!("on"));
    assert!(!record.pending_optimistic);
}

#[tokio::test(start_paused = true)]
async fn test_slow_verification_is_not_reaped() {
    let (transport, cache, coordinator) = setup();
    transport.respond("GET", &status_path("d-1"), 200, switch_status("on"));
    transport.delay("GET", &status_path("d-1"), Duration::from_secs(30));
    let scheduler = PollScheduler::new(
        poll::Options::default(),
        cloud(transport.clone(), StaticTokens::new()),
        cache.clone(),
    );

    let verify = coordinator.execute_and_verify("d-1", "switch", "on", vec![]);
    let ticks = async {
        let mut reports = Vec::new();
        for _ in 0..11 {
            reports.push(scheduler.tick().await);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        reports
    };
    let (ticket, reports) = tokio::join!(verify, ticks);

    // the read is abandoned after one call timeout and handed to the poller
    assert_eq!(ticket.unwrap().state, CommandState::TimedOut);
    assert!(reports.iter().all(|r| r.reaped == 0));
    assert!(reports[..10].iter().all(|r| r.polled == 0));

    let record = cache.get("d-1").unwrap();
    assert!(record.pending_command.is_none());
    assert_eq!(record.state[&switch_key()], json!("on"));
}
