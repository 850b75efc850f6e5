//! Finite State Machine for a supervised operation's lifecycle

use serde::{Deserialize, Serialize};

/// Lifecycle state of an operation under signal supervision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    /// Not present in the registry
    Unregistered,

    /// Registered and running
    Registered,

    /// Operation returned (successfully or with an error)
    Completed,

    /// Cancelled by a signal
    Cancelled,

    /// Operation panicked
    Panicked,
}

/// Lifecycle event
#[derive(Debug, Clone)]
pub enum OperationEvent {
    /// Added to the registry
    Register,

    /// Operation returned a result
    Complete,

    /// A signal or upstream cancellation stopped the operation
    Cancel(String),

    /// The operation panicked
    Panic(String),

    /// Removed from the registry
    Unregister,
}

/// Operation lifecycle FSM
#[derive(Debug, Clone)]
pub struct OperationFsm {
    state: OperationState,
    reason: Option<String>,
}

impl OperationFsm {
    /// Create a new FSM in the unregistered state
    pub fn new() -> Self {
        Self {
            state: OperationState::Unregistered,
            reason: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &OperationState {
        &self.state
    }

    /// Why the operation was cancelled or panicked, if it was
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: OperationEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (OperationState::Unregistered, OperationEvent::Register) => {
                self.reason = None;
                OperationState::Registered
            }

            (OperationState::Registered, OperationEvent::Complete) => OperationState::Completed,
            (OperationState::Registered, OperationEvent::Cancel(reason)) => {
                self.reason = Some(reason.clone());
                OperationState::Cancelled
            }
            (OperationState::Registered, OperationEvent::Panic(message)) => {
                self.reason = Some(message.clone());
                OperationState::Panicked
            }

            // a panic can surface while the signal path is already cleaning up
            (OperationState::Cancelled, OperationEvent::Panic(_)) => OperationState::Cancelled,

            // cleanup runs on every exit path, including before a terminal state
            (OperationState::Registered, OperationEvent::Unregister)
            | (OperationState::Completed, OperationEvent::Unregister)
            | (OperationState::Cancelled, OperationEvent::Unregister)
            | (OperationState::Panicked, OperationEvent::Unregister) => OperationState::Unregistered,

            // Invalid transitions
            (state, event) => {
                return Err(format!(
                    "Invalid transition: {:?} -> {:?}",
                    state, event
                ));
            }
        };

        self.state = new_state;
        Ok(())
    }

    /// Whether the operation reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            OperationState::Completed | OperationState::Cancelled | OperationState::Panicked
        )
    }
}

impl Default for OperationFsm {
    fn default() -> Self {
        Self::new()
    }
}
