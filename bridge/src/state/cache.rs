//! Per-device state cache

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cloud_api::models::DeviceStatus;

use crate::devices::capability::{state_key, Capability, StateMap};
use crate::devices::kind::DeviceKind;
use crate::errors::BridgeError;

/// Static device description, as discovered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub kind: Option<DeviceKind>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A command whose outcome is not yet known
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command_id: u64,
    pub device_id: String,
    pub capability: Capability,
    pub command: String,
    pub predicted_state: StateMap,
    pub issued_at: Instant,
    pub verify_deadline: Instant,
}

/// Cached state and bookkeeping for one device
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub info: DeviceInfo,
    pub state: StateMap,
    /// When the cached state was last confirmed by the cloud
    pub last_updated_at: Option<Instant>,
    /// When a confirmed read last differed from the cache
    pub last_changed_at: Option<Instant>,
    pub last_command_at: Option<Instant>,
    pub last_poll_attempt_at: Option<Instant>,
    pub pending_optimistic: bool,
    pub pending_command: Option<PendingCommand>,
    /// Values the pending prediction replaced, `None` where absent
    prior_values: BTreeMap<String, Option<Value>>,
    /// Whether those values were themselves an unverified prediction
    prior_optimistic: bool,
    pub consecutive_poll_failures: u32,
    pub unreachable: bool,
}

impl DeviceRecord {
    fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            state: StateMap::new(),
            last_updated_at: None,
            last_changed_at: None,
            last_command_at: None,
            last_poll_attempt_at: None,
            pending_optimistic: false,
            pending_command: None,
            prior_values: BTreeMap::new(),
            prior_optimistic: false,
            consecutive_poll_failures: 0,
            unreachable: false,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.info.device_id
    }

    /// Time since the state was last confirmed
    pub fn staleness(&self, now: Instant) -> Option<Duration> {
        self.last_updated_at.map(|t| now.saturating_duration_since(t))
    }

    /// Merge a confirmed read; returns whether any value changed
    fn merge_confirmed(&mut self, observed: StateMap, observed_at: Instant) -> bool {
        let mut changed = false;
        for (key, value) in observed {
            match self.state.get(&key) {
                Some(current) if values_match(current, &value) => {}
                _ => {
                    changed = true;
                    self.state.insert(key, value);
                }
            }
        }
        self.last_updated_at = Some(observed_at);
        if changed {
            self.last_changed_at = Some(observed_at);
        }
        self.consecutive_poll_failures = 0;
        self.unreachable = false;
        changed
    }

    fn clear_pending(&mut self) {
        self.pending_optimistic = false;
        self.pending_command = None;
        self.prior_values.clear();
        self.prior_optimistic = false;
    }
}

/// Outcome of verifying a command against a confirmed read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Every predicted attribute matched
    Confirmed,
    /// The cloud disagreed; the cache now holds its values
    Corrected,
    /// A newer command owns the device; nothing was written
    Superseded,
}

/// Outcome of applying a poll result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Applied { changed: bool },
    /// The read started before the cache's newest information
    Stale,
    /// A command is outstanding for the device
    Suspended,
    UnknownDevice,
}

/// Flatten the `main` component of a status read into a state map
pub fn state_from_status(status: &DeviceStatus) -> StateMap {
    let mut state = StateMap::new();
    if let Some(main) = status.main() {
        for (capability, attributes) in main {
            for (attribute, value) in attributes {
                state.insert(state_key(capability, attribute), value.value.clone());
            }
        }
    }
    state
}

/// Compare JSON values, treating numerically equal numbers as equal
pub fn values_match(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

/// In-memory device state cache
pub struct StateCache {
    records: RwLock<HashMap<String, DeviceRecord>>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DeviceRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DeviceRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a device or refresh its description, keeping its state
    pub fn upsert(&self, info: DeviceInfo) {
        let mut records = self.write();
        match records.get_mut(&info.device_id) {
            Some(record) => record.info = info,
            None => {
                debug!("Tracking device {} ({})", info.device_id, info.label);
                records.insert(info.device_id.clone(), DeviceRecord::new(info));
            }
        }
    }

    /// Drop every device not in `keep`; returns the removed ids
    pub fn retain(&self, keep: &HashSet<String>) -> Vec<String> {
        let mut records = self.write();
        let removed: Vec<String> = records
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        for id in &removed {
            info!("Device {} no longer listed, removing", id);
            records.remove(id);
        }
        removed
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.read().get(device_id).cloned()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.read().contains_key(device_id)
    }

    /// All records, ordered by device id
    pub fn list(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.read().values().cloned().collect();
        records.sort_by(|a, b| a.info.device_id.cmp(&b.info.device_id));
        records
    }

    /// Device descriptions, for the on-disk device cache
    pub fn infos(&self) -> Vec<DeviceInfo> {
        self.list().into_iter().map(|r| r.info).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn unreachable_count(&self) -> usize {
        self.read().values().filter(|r| r.unreachable).count()
    }

    /// Write a prediction ahead of dispatch. A command already pending on the
    /// device is superseded; the values it predicted become the ones a
    /// failed dispatch reverts to.
    pub fn apply_optimistic(&self, pending: PendingCommand) -> Result<(), BridgeError> {
        let mut records = self.write();
        let record = records
            .get_mut(&pending.device_id)
            .ok_or_else(|| BridgeError::NotFound(format!("device {}", pending.device_id)))?;

        if let Some(previous) = &record.pending_command {
            debug!(
                "Command {} supersedes command {} on {}",
                pending.command_id, previous.command_id, pending.device_id
            );
        }

        record.prior_values.clear();
        record.prior_optimistic = record.pending_optimistic;
        for (key, value) in &pending.predicted_state {
            record
                .prior_values
                .insert(key.clone(), record.state.get(key).cloned());
            record.state.insert(key.clone(), value.clone());
        }

        record.last_command_at = Some(pending.issued_at);
        record.pending_optimistic = true;
        record.pending_command = Some(pending);
        Ok(())
    }

    /// Move the verification deadline of `command_id` once it has been sent
    pub fn arm_verification(&self, device_id: &str, command_id: u64, deadline: Instant) -> bool {
        let mut records = self.write();
        match records
            .get_mut(device_id)
            .and_then(|r| r.pending_command.as_mut())
        {
            Some(pending) if pending.command_id == command_id => {
                pending.verify_deadline = deadline;
                true
            }
            _ => false,
        }
    }

    /// Undo a failed dispatch. Only the command that still owns the device
    /// is reverted; returns whether anything was undone. When the replaced
    /// values were an earlier unverified prediction the device stays
    /// optimistic, released to the poller.
    pub fn revert_optimistic(&self, device_id: &str, command_id: u64) -> bool {
        let mut records = self.write();
        let Some(record) = records.get_mut(device_id) else {
            return false;
        };
        if record.pending_command.as_ref().map(|p| p.command_id) != Some(command_id) {
            return false;
        }

        let prior = std::mem::take(&mut record.prior_values);
        for (key, value) in prior {
            match value {
                Some(v) => record.state.insert(key, v),
                None => record.state.remove(&key),
            };
        }
        let still_optimistic = record.prior_optimistic;
        record.clear_pending();
        record.pending_optimistic = still_optimistic;
        true
    }

    /// Compare a verification read with the prediction of `command_id`
    pub fn reconcile(
        &self,
        device_id: &str,
        command_id: u64,
        observed: StateMap,
        observed_at: Instant,
    ) -> Reconciliation {
        let mut records = self.write();
        let Some(record) = records.get_mut(device_id) else {
            return Reconciliation::Superseded;
        };
        let predicted = match &record.pending_command {
            Some(p) if p.command_id == command_id => p.predicted_state.clone(),
            _ => return Reconciliation::Superseded,
        };

        let confirmed = predicted.iter().all(|(key, value)| {
            observed
                .get(key)
                .map(|o| values_match(o, value))
                .unwrap_or(false)
        });

        record.merge_confirmed(observed, observed_at);
        record.clear_pending();

        if confirmed {
            Reconciliation::Confirmed
        } else {
            Reconciliation::Corrected
        }
    }

    /// Verification did not happen; hand the device back to the poller with
    /// the optimistic flag still set. Returns whether `command_id` was current.
    pub fn release_pending(&self, device_id: &str, command_id: u64) -> bool {
        let mut records = self.write();
        match records.get_mut(device_id) {
            Some(record)
                if record.pending_command.as_ref().map(|p| p.command_id) == Some(command_id) =>
            {
                record.pending_command = None;
                true
            }
            _ => false,
        }
    }

    /// Drop pending commands whose verification window plus `grace` has
    /// passed; returns `(device_id, command_id)` of each one reaped.
    pub fn reap_expired(&self, now: Instant, grace: Duration) -> Vec<(String, u64)> {
        let mut records = self.write();
        let mut reaped = Vec::new();
        for record in records.values_mut() {
            let expired = matches!(
                &record.pending_command,
                Some(p) if p.verify_deadline + grace <= now
            );
            if expired {
                if let Some(p) = record.pending_command.take() {
                    warn!(
                        "Reaping command {} on {} past its verification deadline",
                        p.command_id, p.device_id
                    );
                    reaped.push((p.device_id, p.command_id));
                }
            }
        }
        reaped
    }

    pub fn record_poll_attempt(&self, device_id: &str, at: Instant) {
        if let Some(record) = self.write().get_mut(device_id) {
            record.last_poll_attempt_at = Some(at);
        }
    }

    /// Apply a poll read that was issued at `observed_at`
    pub fn apply_poll(&self, device_id: &str, observed: StateMap, observed_at: Instant) -> PollOutcome {
        let mut records = self.write();
        let Some(record) = records.get_mut(device_id) else {
            return PollOutcome::UnknownDevice;
        };

        if record.pending_command.is_some() {
            return PollOutcome::Suspended;
        }
        if record.last_updated_at.is_some_and(|t| observed_at < t)
            || record.last_command_at.is_some_and(|t| observed_at < t)
        {
            debug!("Discarding stale poll for {}", device_id);
            return PollOutcome::Stale;
        }

        let changed = record.merge_confirmed(observed, observed_at);
        if record.pending_optimistic {
            debug!("Poll resolved optimistic state of {}", device_id);
            record.clear_pending();
        }
        PollOutcome::Applied { changed }
    }

    /// Count a failed poll; returns true when this failure made the device
    /// unreachable.
    pub fn record_poll_failure(&self, device_id: &str, threshold: u32) -> bool {
        let mut records = self.write();
        let Some(record) = records.get_mut(device_id) else {
            return false;
        };
        record.consecutive_poll_failures = record.consecutive_poll_failures.saturating_add(1);
        if !record.unreachable && record.consecutive_poll_failures >= threshold {
            record.unreachable = true;
            warn!(
                "Device {} unreachable after {} failed polls",
                device_id, record.consecutive_poll_failures
            );
            return true;
        }
        false
    }
}
