//! Polling worker driving discovery and the poll scheduler

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use host_api::models::IntegrationStatus;

use crate::authn::token_store::TokenStoreExt;
use crate::discovery::Discovery;
use crate::scheduler::poll::PollScheduler;
use crate::utils::Backoff;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Scheduler tick
    pub tick: Duration,

    /// Re-run discovery this often
    pub rediscovery_interval: Duration,

    /// Backoff between failed discoveries
    pub discovery_backoff: Backoff,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            rediscovery_interval: Duration::from_secs(1800), // 30 minutes
            discovery_backoff: Backoff::default(),
        }
    }
}

/// Collaborators of the poller worker
pub struct Deps<'a, T: TokenStoreExt + ?Sized> {
    pub scheduler: &'a PollScheduler,
    pub discovery: &'a Discovery,
    pub tokens: &'a T,
    pub status: &'a watch::Sender<IntegrationStatus>,
}

fn publish(status: &watch::Sender<IntegrationStatus>, next: IntegrationStatus) {
    status.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        info!("Integration status: {:?} -> {:?}", current, next);
        *current = next;
        true
    });
}

/// Run the poller worker
pub async fn run<T, S, F>(
    options: &Options,
    deps: Deps<'_, T>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    T: TokenStoreExt + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Poller worker starting...");

    let mut last_discovery: Option<Instant> = None;
    let mut next_discovery_at = Instant::now();
    let mut discovery_failures: u32 = 0;

    loop {
        // Check for shutdown
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Poller worker shutting down...");
                return;
            }
            _ = sleep_fn(options.tick) => {}
        }

        if deps.tokens.status().reauthorization_required {
            publish(deps.status, IntegrationStatus::ReauthorizationRequired);
            continue;
        }

        let now = Instant::now();
        let discovery_due = match last_discovery {
            None => now >= next_discovery_at,
            Some(at) => now.saturating_duration_since(at) >= options.rediscovery_interval,
        };
        if discovery_due {
            match deps.discovery.run().await {
                Ok(_) => {
                    last_discovery = Some(Instant::now());
                    discovery_failures = 0;
                }
                Err(e) if e.is_fatal() => {
                    error!("Discovery failed: {}", e);
                    publish(deps.status, IntegrationStatus::ReauthorizationRequired);
                    continue;
                }
                Err(e) => {
                    let wait = options.discovery_backoff.delay(discovery_failures);
                    discovery_failures = discovery_failures.saturating_add(1);
                    warn!("Discovery failed, retrying in {:?}: {}", wait, e);
                    next_discovery_at = Instant::now() + wait;
                    last_discovery = None;
                    if *deps.status.borrow() == IntegrationStatus::Connecting {
                        publish(deps.status, IntegrationStatus::Error);
                    }
                }
            }
        }

        let report = deps.scheduler.tick().await;
        match report.fatal {
            Some(e) => {
                error!("Polling halted until reauthorization: {}", e);
                publish(deps.status, IntegrationStatus::ReauthorizationRequired);
            }
            None => {
                let answered = report.polled > report.failed + report.rate_limited;
                if answered || last_discovery.is_some() {
                    publish(deps.status, IntegrationStatus::Connected);
                }
                debug!(
                    "Tick: {} due, {} polled, {} failed, {} rate limited",
                    report.due, report.polled, report.failed, report.rate_limited
                );
            }
        }
    }
}
