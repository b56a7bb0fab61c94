//! Adaptive poll scheduler

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::errors::BridgeError;
use crate::http::cloud::CloudClient;
use crate::scheduler::activity::{self, ActivityBucket};
use crate::state::cache::{state_from_status, PollOutcome, StateCache};

/// Poll scheduler options
#[derive(Debug, Clone)]
pub struct Options {
    pub tick: Duration,
    pub max_batch: usize,
    /// Consecutive failures before a device is marked unreachable
    pub failure_threshold: u32,
    /// Bound on each poll and on a verification read
    pub call_timeout: Duration,
    pub activity: activity::Options,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            max_batch: 4,
            failure_threshold: 5,
            call_timeout: Duration::from_secs(8),
            activity: activity::Options::default(),
        }
    }
}

/// A device due for a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueDevice {
    pub device_id: String,
    pub bucket: ActivityBucket,
    /// How far past its interval the device is; `None` if never polled
    pub overdue: Option<Duration>,
}

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub due: usize,
    pub polled: usize,
    pub changed: usize,
    pub discarded: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub newly_unreachable: usize,
    pub reaped: usize,
    /// An auth failure that stops polling until re-authorization
    pub fatal: Option<BridgeError>,
}

/// Decides each tick which devices to refresh
pub struct PollScheduler {
    options: Options,
    cloud: Arc<CloudClient>,
    cache: Arc<StateCache>,
}

impl PollScheduler {
    pub fn new(options: Options, cloud: Arc<CloudClient>, cache: Arc<StateCache>) -> Self {
        Self {
            options,
            cloud,
            cache,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Time past a command's verification deadline before it counts as
    /// orphaned. A live verification read finishes within one call timeout.
    pub fn reap_grace(&self) -> Duration {
        self.options.call_timeout + self.options.tick
    }

    /// Devices due at `now`, most overdue first. Devices with an outstanding
    /// command are left to the command coordinator.
    pub fn due_devices(&self, now: Instant) -> Vec<DueDevice> {
        let mut due: Vec<DueDevice> = self
            .cache
            .list()
            .into_iter()
            .filter(|record| record.pending_command.is_none())
            .filter_map(|record| {
                let bucket = self.options.activity.bucket(&record, now);
                let interval = self.options.activity.interval(bucket);
                let reference = match (record.last_updated_at, record.last_poll_attempt_at) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                let overdue = match reference {
                    None => None,
                    Some(t) => {
                        let elapsed = now.saturating_duration_since(t);
                        if elapsed < interval {
                            return None;
                        }
                        Some(elapsed - interval)
                    }
                };
                Some(DueDevice {
                    device_id: record.info.device_id,
                    bucket,
                    overdue,
                })
            })
            .collect();

        // never-polled first, then by how overdue
        due.sort_by(|a, b| match (a.overdue, b.overdue) {
            (None, None) => a.device_id.cmp(&b.device_id),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.device_id.cmp(&b.device_id)),
        });
        due
    }

    /// Run one scheduling pass
    pub async fn tick(&self) -> TickReport {
        let now = Instant::now();
        let mut report = TickReport {
            reaped: self.cache.reap_expired(now, self.reap_grace()).len(),
            ..TickReport::default()
        };

        let due = self.due_devices(now);
        report.due = due.len();
        if due.is_empty() {
            return report;
        }

        let budget = self.options.max_batch.min(self.cloud.limiter().available());
        if budget == 0 {
            debug!("{} devices due, no rate budget this tick", due.len());
            return report;
        }

        let batch: Vec<DueDevice> = due.into_iter().take(budget).collect();
        report.polled = batch.len();
        debug!(
            "Polling {} devices: {:?}",
            batch.len(),
            batch.iter().map(|d| d.device_id.as_str()).collect::<Vec<_>>()
        );

        let results = join_all(batch.iter().map(|d| self.poll_one(&d.device_id))).await;

        for (device, result) in batch.iter().zip(results) {
            let device_id = device.device_id.as_str();
            match result {
                Ok(PollOutcome::Applied { changed }) => {
                    if changed {
                        report.changed += 1;
                    }
                }
                Ok(PollOutcome::Stale | PollOutcome::Suspended) => report.discarded += 1,
                Ok(PollOutcome::UnknownDevice) => {}
                Err(e) if e.is_fatal() => {
                    error!("Polling stopped: {}", e);
                    if report.fatal.is_none() {
                        report.fatal = Some(e);
                    }
                }
                Err(e) if e.is_rate_limited() => {
                    debug!("Poll of {} deferred by rate limit", device_id);
                    report.rate_limited += 1;
                }
                Err(e) if e.is_transient() => {
                    debug!("Poll of {} failed: {}", device_id, e);
                    report.failed += 1;
                    if self
                        .cache
                        .record_poll_failure(device_id, self.options.failure_threshold)
                    {
                        report.newly_unreachable += 1;
                    }
                }
                Err(e) => {
                    warn!("Poll of {} rejected: {}", device_id, e);
                    report.failed += 1;
                }
            }
        }

        if report.changed > 0 || report.newly_unreachable > 0 {
            info!(
                "Poll tick: {} polled, {} changed, {} newly unreachable",
                report.polled, report.changed, report.newly_unreachable
            );
        }
        report
    }

    async fn poll_one(&self, device_id: &str) -> Result<PollOutcome, BridgeError> {
        let started = Instant::now();
        self.cache.record_poll_attempt(device_id, started);

        let status = tokio::time::timeout(
            self.options.call_timeout,
            self.cloud.device_status(device_id, true),
        )
        .await
        .map_err(|_| {
            BridgeError::transient(
                &format!("/devices/{}/status", device_id),
                None,
                "poll timed out",
            )
            .with_device(device_id)
        })??;

        Ok(self
            .cache
            .apply_poll(device_id, state_from_status(&status), started))
    }
}
