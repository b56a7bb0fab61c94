//! Finite state machine for a single device command

use serde::{Deserialize, Serialize};

/// Command state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    /// Prediction written and command sent
    Dispatched,

    /// Sent successfully, waiting for the verification read
    Verifying,

    /// Verification read matched the prediction
    Confirmed,

    /// Verification read differed; the cache holds the cloud's values
    Corrected,

    /// No verification read; the poller resolves the prediction
    TimedOut,

    /// A newer command took over the device
    Superseded,

    /// Dispatch failed; the prediction was reverted
    Failed,
}

impl CommandState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandState::Dispatched | CommandState::Verifying)
    }
}

/// Command event
#[derive(Debug, Clone)]
pub enum CommandEvent {
    /// The cloud accepted the command
    DispatchSucceeded,

    /// The command could not be sent
    DispatchFailed(String),

    /// Verification read agreed with the prediction
    Confirmed,

    /// Verification read disagreed
    Corrected,

    /// Verification read failed or was skipped
    VerifySkipped(String),

    /// A newer command for the same device was issued
    Superseded,
}

/// Command FSM
#[derive(Debug, Clone)]
pub struct CommandFsm {
    state: CommandState,
    error: Option<String>,
}

impl CommandFsm {
    /// Create a new FSM; commands start out dispatched
    pub fn new() -> Self {
        Self {
            state: CommandState::Dispatched,
            error: None,
        }
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: CommandEvent) -> Result<CommandState, String> {
        let new_state = match (&self.state, &event) {
            (CommandState::Dispatched, CommandEvent::DispatchSucceeded) => CommandState::Verifying,
            (CommandState::Dispatched, CommandEvent::DispatchFailed(err)) => {
                self.error = Some(err.clone());
                CommandState::Failed
            }

            (CommandState::Verifying, CommandEvent::Confirmed) => CommandState::Confirmed,
            (CommandState::Verifying, CommandEvent::Corrected) => CommandState::Corrected,
            (CommandState::Verifying, CommandEvent::VerifySkipped(reason)) => {
                self.error = Some(reason.clone());
                CommandState::TimedOut
            }

            (CommandState::Dispatched | CommandState::Verifying, CommandEvent::Superseded) => {
                CommandState::Superseded
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for CommandFsm {
    fn default() -> Self {
        Self::new()
    }
}
