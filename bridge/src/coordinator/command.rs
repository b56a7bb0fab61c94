//! Optimistic command execution with delayed verification

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::coordinator::fsm::{CommandEvent, CommandFsm, CommandState};
use crate::devices::capability::{Capability, StateMap};
use crate::errors::BridgeError;
use crate::http::cloud::CloudClient;
use crate::state::cache::{state_from_status, PendingCommand, Reconciliation, StateCache};

/// Command coordinator options
#[derive(Debug, Clone)]
pub struct Options {
    /// Wait between a successful dispatch and the verification read
    pub verification_delay: Duration,

    /// Write predicted state before dispatch
    pub optimistic_updates: bool,

    /// Bound on a dispatch, including any rate limit wait
    pub dispatch_timeout: Duration,

    /// Bound on the verification read, token refresh and 401 retry included
    pub verification_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verification_delay: Duration::from_millis(1500),
            optimistic_updates: true,
            dispatch_timeout: Duration::from_secs(18), // rate window + call timeout
            verification_timeout: Duration::from_secs(8),
        }
    }
}

/// Handle to a dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTicket {
    pub command_id: u64,
    pub device_id: String,
    pub state: CommandState,
}

struct Dispatched {
    pending: PendingCommand,
    fsm: CommandFsm,
}

/// Runs the dispatch / verify / reconcile protocol for device commands
pub struct CommandCoordinator {
    options: Options,
    cloud: Arc<CloudClient>,
    cache: Arc<StateCache>,
    next_id: AtomicU64,
}

impl CommandCoordinator {
    pub fn new(options: Options, cloud: Arc<CloudClient>, cache: Arc<StateCache>) -> Self {
        Self {
            options,
            cloud,
            cache,
            next_id: AtomicU64::new(0),
        }
    }

    /// Dispatch a command and return once the cloud accepted it.
    /// Verification continues on a spawned task.
    pub async fn execute(
        self: &Arc<Self>,
        device_id: &str,
        capability: &str,
        command: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<CommandTicket, BridgeError> {
        let dispatched = self.dispatch(device_id, capability, command, args).await?;
        let ticket = CommandTicket {
            command_id: dispatched.pending.command_id,
            device_id: device_id.to_string(),
            state: dispatched.fsm.state(),
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.verify(dispatched).await;
        });

        Ok(ticket)
    }

    /// Dispatch a command and wait for its verification to finish
    pub async fn execute_and_verify(
        &self,
        device_id: &str,
        capability: &str,
        command: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<CommandTicket, BridgeError> {
        let dispatched = self.dispatch(device_id, capability, command, args).await?;
        let command_id = dispatched.pending.command_id;
        let state = self.verify(dispatched).await;
        Ok(CommandTicket {
            command_id,
            device_id: device_id.to_string(),
            state,
        })
    }

    async fn dispatch(
        &self,
        device_id: &str,
        capability_id: &str,
        command: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<Dispatched, BridgeError> {
        // validate before touching any state
        let capability = Capability::parse(capability_id)?;
        let prediction = capability.predict(command, &args)?;
        if !self.cache.contains(device_id) {
            return Err(BridgeError::NotFound(format!("device {}", device_id)));
        }

        let predicted_state = if self.options.optimistic_updates {
            prediction
        } else {
            StateMap::new()
        };

        let command_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let issued_at = Instant::now();
        let pending = PendingCommand {
            command_id,
            device_id: device_id.to_string(),
            capability,
            command: command.to_string(),
            predicted_state,
            issued_at,
            verify_deadline: issued_at + self.options.dispatch_timeout + self.options.verification_delay,
        };
        self.cache.apply_optimistic(pending.clone())?;
        debug!(
            "Command {} dispatched: {}.{} on {}",
            command_id, capability_id, command, device_id
        );

        let mut fsm = CommandFsm::new();
        let sent = tokio::time::timeout(
            self.options.dispatch_timeout,
            self.cloud.send_command(device_id, capability_id, command, args),
        )
        .await
        .unwrap_or_else(|_| {
            Err(BridgeError::transient(
                &format!("/devices/{}/commands", device_id),
                None,
                "dispatch timed out",
            )
            .with_device(device_id))
        });

        match sent {
            Ok(()) => {
                self.transition(&mut fsm, command_id, CommandEvent::DispatchSucceeded);
                self.cache.arm_verification(
                    device_id,
                    command_id,
                    Instant::now() + self.options.verification_delay,
                );
                Ok(Dispatched { pending, fsm })
            }
            Err(e) => {
                let event = if self.cache.revert_optimistic(device_id, command_id) {
                    CommandEvent::DispatchFailed(e.to_string())
                } else {
                    CommandEvent::Superseded
                };
                self.transition(&mut fsm, command_id, event);
                error!("Command {} on {} failed: {}", command_id, device_id, e);

                let unreachable = self.cache.get(device_id).is_some_and(|r| r.unreachable);
                if unreachable && e.is_transient() {
                    return Err(BridgeError::DeviceUnreachable(device_id.to_string()));
                }
                Err(e)
            }
        }
    }

    async fn verify(&self, dispatched: Dispatched) -> CommandState {
        let Dispatched { pending, mut fsm } = dispatched;
        let device_id = pending.device_id.as_str();

        tokio::time::sleep(self.options.verification_delay).await;

        // one read, and only if the rate budget allows it right now
        let read_at = Instant::now();
        let read = tokio::time::timeout(
            self.options.verification_timeout,
            self.cloud.device_status(device_id, true),
        )
        .await
        .unwrap_or_else(|_| {
            Err(BridgeError::transient(
                &format!("/devices/{}/status", device_id),
                None,
                "verification read timed out",
            )
            .with_device(device_id))
        });
        let event = match read {
            Ok(status) => {
                let observed = state_from_status(&status);
                match self
                    .cache
                    .reconcile(device_id, pending.command_id, observed, read_at)
                {
                    Reconciliation::Confirmed => CommandEvent::Confirmed,
                    Reconciliation::Corrected => CommandEvent::Corrected,
                    Reconciliation::Superseded => CommandEvent::Superseded,
                }
            }
            Err(e) => {
                if self.cache.release_pending(device_id, pending.command_id) {
                    warn!(
                        "Verification of command {} on {} skipped: {}",
                        pending.command_id, device_id, e
                    );
                    CommandEvent::VerifySkipped(e.to_string())
                } else {
                    CommandEvent::Superseded
                }
            }
        };

        self.transition(&mut fsm, pending.command_id, event)
    }

    fn transition(&self, fsm: &mut CommandFsm, command_id: u64, event: CommandEvent) -> CommandState {
        match fsm.process(event) {
            Ok(state) => {
                match state {
                    CommandState::Corrected => {
                        info!("Command {} corrected by cloud state", command_id)
                    }
                    state if state.is_terminal() => {
                        debug!("Command {} finished: {:?}", command_id, state)
                    }
                    _ => {}
                }
                state
            }
            Err(e) => {
                error!("Command {}: {}", command_id, e);
                fsm.state()
            }
        }
    }
}
