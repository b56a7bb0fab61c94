//! Poll scheduler batching, failure counting and auth halts

use std::time::Duration;

use serde_json::json;

use stbridge::scheduler::poll::{self, PollScheduler};

use crate::support::{cache_with, cloud, status_path, switch_status, ScriptedTransport, StaticTokens};

fn options() -> poll::Options {
    poll::Options {
        max_batch: 4,
        failure_threshold: 5,
        ..poll::Options::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_batches_bounded_by_batch_size_and_rate_budget() {
    let ids: Vec<String> = (0..10).map(|i| format!("d-{}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let transport = ScriptedTransport::new();
    for id in &ids {
        transport.respond("GET", &status_path(id), 200, switch_status("on"));
    }
    let cache = cache_with(&id_refs);
    let scheduler = PollScheduler::new(
        options(),
        cloud(transport.clone(), StaticTokens::new()),
        cache.clone(),
    );

    let first = scheduler.tick().await;
    assert_eq!(first.due, 10);
    assert_eq!(first.polled, 4);
    assert_eq!(first.changed, 4);

    let second = scheduler.tick().await;
    assert_eq!(second.due, 6);
    assert_eq!(second.polled, 4);

    // eight calls spent in this window
    let third = scheduler.tick().await;
    assert_eq!(third.due, 2);
    assert_eq!(third.polled, 0);
    assert_eq!(transport.total(), 8);

    // never-polled devices go first once budget returns
    tokio::time::advance(Duration::from_secs(10)).await;
    let fourth = scheduler.tick().await;
    assert_eq!(fourth.polled, 4);
    assert_eq!(transport.count("GET", &status_path("d-8")), 1);
    assert_eq!(transport.count("GET", &status_path("d-9")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_poll_is_idempotent() {
    let transport = ScriptedTransport::new();
    transport.respond("GET", &status_path("d-1"), 200, switch_status("on"));
    let cache = cache_with(&["d-1"]);
    let scheduler = PollScheduler::new(
        options(),
        cloud(transport.clone(), StaticTokens::new()),
        cache.clone(),
    );

    assert_eq!(scheduler.tick().await.changed, 1);
    let before = cache.get("d-1").unwrap().last_changed_at;

    tokio::time::advance(Duration::from_secs(21)).await;
    let report = scheduler.tick().await;
    assert_eq!(report.polled, 1);
    assert_eq!(report.changed, 0);
    assert_eq!(cache.get("d-1").unwrap().last_changed_at, before);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_after_repeated_failures() {
    let transport = ScriptedTransport::new();
    transport.respond("GET", &status_path("d-1"), 503, json!({}));
    let cache = cache_with(&["d-1"]);
    let scheduler = PollScheduler::new(
        options(),
        cloud(transport.clone(), StaticTokens::new()),
        cache.clone(),
    );

    for attempt in 1..=5 {
        let report = scheduler.tick().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.newly_unreachable, usize::from(attempt == 5));
        tokio::time::advance(Duration::from_secs(21)).await;
    }
    let record = cache.get("d-1").unwrap();
    assert!(record.unreachable);
    assert_eq!(record.consecutive_poll_failures, 5);
    assert_eq!(cache.unreachable_count(), 1);

    // still polled, and a success clears the flag
    transport.respond("GET", &status_path("d-1"), 200, switch_status("off"));
    let report = scheduler.tick().await;
    assert_eq!(report.polled, 1);
    let record = cache.get("d-1").unwrap();
    assert!(!record.unreachable);
    assert_eq!(record.consecutive_poll_failures, 0);
    assert_eq!(record.state["switch.switch"], json!("off"));
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_halts_tick() {
    let transport = ScriptedTransport::new();
    transport.respond("GET", &status_path("d-1"), 401, json!({}));
    let cache = cache_with(&["d-1"]);
    let tokens = StaticTokens::new();
    let scheduler = PollScheduler::new(
        options(),
        cloud(transport.clone(), tokens.clone()),
        cache.clone(),
    );

    let report = scheduler.tick().await;
    assert!(report.fatal.as_ref().is_some_and(|e| e.is_fatal()));
    assert_eq!(report.failed, 0);
    assert_eq!(cache.get("d-1").unwrap().consecutive_poll_failures, 0);
}
