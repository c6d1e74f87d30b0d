//! [`CommandDispatcher`] – routes inbound remote messages to the
//! [`LockController`].
//!
//! A message is first parsed into a typed [`Command`] from its slash-delimited
//! topic and its JSON payload, then executed:
//!
//! | Topic | Payload | Outcome |
//! |-------|---------|---------|
//! | `cmd/lock/state` | `{"state":"lock"}` | `engage()` → [`DispatchOutcome::Actuated`] |
//! | `cmd/lock/state` | `{"state":"unlock"}` | `release()` → [`DispatchOutcome::Actuated`] |
//! | `cmd/lock/state` | any other `state` value | [`LatchError::UnsupportedCommand`] |
//! | `cmd/lock/state` | no string `state` field | [`LatchError::MalformedPayload`] |
//! | `cmd/...` (anything else) | – | [`LatchError::UnsupportedCommand`] |
//! | `dt/...` | – | [`DispatchOutcome::Ignored`] |
//! | any other root, or a single segment | – | [`LatchError::UnsupportedCommand`] |
//!
//! `dt/...` topics are outbound telemetry that some brokers echo back to the
//! publisher, so they are accepted and ignored.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use latchkey_hal::{LockController, SimLock};
//! use latchkey_kernel::{CommandDispatcher, DispatchOutcome};
//! use latchkey_types::LockState;
//! use serde_json::json;
//!
//! let controller = Arc::new(LockController::new(Box::new(SimLock::new("front_door"))));
//! let dispatcher = CommandDispatcher::new(controller);
//!
//! let outcome = dispatcher.dispatch("cmd/lock/state", &json!({"state": "unlock"})).unwrap();
//! assert_eq!(outcome, DispatchOutcome::Actuated(LockState::Unlocked));
//! ```

use std::sync::Arc;

use latchkey_hal::LockController;
use latchkey_types::{LatchError, LockState};
use serde_json::Value;
use tracing::{debug, instrument};

/// A routable command decoded from one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Drive the lock to the given state.
    SetLockState(LockState),
    /// Echo of an outbound telemetry topic.
    Telemetry { topic: String },
}

impl Command {
    /// Decode `topic` and `payload` into a [`Command`].
    ///
    /// # Errors
    ///
    /// - [`LatchError::UnsupportedCommand`] – unknown topic or `state` value.
    /// - [`LatchError::MalformedPayload`] – `state` field missing or not a string.
    pub fn parse(topic: &str, payload: &Value) -> Result<Self, LatchError> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() < 2 {
            return Err(unsupported(topic, "topic needs at least two segments"));
        }

        match segments[0] {
            "cmd" => match &segments[1..] {
                ["lock", "state"] => Self::parse_lock_state(topic, payload),
                _ => Err(unsupported(topic, "unrecognised command path")),
            },
            "dt" => Ok(Command::Telemetry {
                topic: topic.to_string(),
            }),
            other => Err(unsupported(topic, &format!("unknown topic root '{other}'"))),
        }
    }

    fn parse_lock_state(topic: &str, payload: &Value) -> Result<Self, LatchError> {
        let state = match payload.get("state") {
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(LatchError::MalformedPayload(format!(
                    "'state' must be a string, got {other}"
                )));
            }
            None => {
                return Err(LatchError::MalformedPayload(
                    "missing 'state' field".to_string(),
                ));
            }
        };
        LockState::from_wire(state)
            .map(Command::SetLockState)
            .ok_or_else(|| unsupported(topic, &format!("unsupported state '{state}'")))
    }
}

fn unsupported(topic: &str, details: &str) -> LatchError {
    LatchError::UnsupportedCommand {
        topic: topic.to_string(),
        details: details.to_string(),
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The controller confirmed this state; the caller should publish it.
    Actuated(LockState),
    /// Accepted as a no-op.
    Ignored,
}

/// Executes [`Command`]s against a shared [`LockController`].
pub struct CommandDispatcher {
    controller: Arc<LockController>,
}

impl CommandDispatcher {
    pub fn new(controller: Arc<LockController>) -> Self {
        Self { controller }
    }

    /// Parse and execute one inbound message.
    ///
    /// # Errors
    ///
    /// Parse errors from [`Command::parse`], plus any
    /// [`LatchError::HardwareFault`] raised by the controller.
    #[instrument(skip(self, payload))]
    pub fn dispatch(&self, topic: &str, payload: &Value) -> Result<DispatchOutcome, LatchError> {
        match Command::parse(topic, payload)? {
            Command::SetLockState(LockState::Locked) => {
                self.controller.engage().map(DispatchOutcome::Actuated)
            }
            Command::SetLockState(LockState::Unlocked) => {
                self.controller.release().map(DispatchOutcome::Actuated)
            }
            Command::Telemetry { topic } => {
                debug!(topic = %topic, "ignoring telemetry echo");
                Ok(DispatchOutcome::Ignored)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_hal::SimLock;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn dispatcher() -> (CommandDispatcher, Arc<LockController>) {
        let controller = Arc::new(LockController::new(Box::new(SimLock::new("front_door"))));
        (CommandDispatcher::new(Arc::clone(&controller)), controller)
    }

    #[test]
    fn lock_command_engages() {
        let (d, controller) = dispatcher();
        controller.release().unwrap();
        let outcome = d.dispatch("cmd/lock/state", &json!({"state": "lock"})).unwrap();
        assert_eq!(outcome, DispatchOutcome::Actuated(LockState::Locked));
        assert_eq!(controller.current_state(), LockState::Locked);
    }

    #[test]
    fn unlock_command_releases() {
        let (d, controller) = dispatcher();
        let outcome = d.dispatch("cmd/lock/state", &json!({"state": "unlock"})).unwrap();
        assert_eq!(outcome, DispatchOutcome::Actuated(LockState::Unlocked));
        assert_eq!(controller.current_state(), LockState::Unlocked);
    }

    #[test]
    fn unknown_state_is_unsupported() {
        let (d, controller) = dispatcher();
        let result = d.dispatch("cmd/lock/state", &json!({"state": "toggle"}));
        assert!(matches!(result, Err(LatchError::UnsupportedCommand { .. })));
        assert_eq!(controller.current_state(), LockState::Locked);
    }

    #[test]
    fn telemetry_topics_are_ignored() {
        let (d, _) = dispatcher();
        assert_eq!(
            d.dispatch("dt/anything", &json!({})).unwrap(),
            DispatchOutcome::Ignored
        );
        assert_eq!(
            d.dispatch("dt/lock/state", &json!({"state": "unlock"})).unwrap(),
            DispatchOutcome::Ignored
        );
    }

    #[test]
    fn unknown_root_is_unsupported() {
        let (d, _) = dispatcher();
        let result = d.dispatch("bogus/x", &json!({}));
        assert!(
            matches!(&result, Err(LatchError::UnsupportedCommand { topic, .. }) if topic == "bogus/x"),
            "got: {result:?}"
        );
    }

    #[test]
    fn single_segment_topics_are_unsupported() {
        let (d, _) = dispatcher();
        for topic in ["cmd", "dt", ""] {
            let result = d.dispatch(topic, &json!({"state": "lock"}));
            assert!(
                matches!(result, Err(LatchError::UnsupportedCommand { .. })),
                "{topic:?} should be unsupported"
            );
        }
    }

    #[test]
    fn unrecognised_cmd_paths_are_unsupported() {
        let (d, _) = dispatcher();
        for topic in ["cmd/lock", "cmd/door/state", "cmd/lock/state/extra"] {
            let result = d.dispatch(topic, &json!({"state": "lock"}));
            assert!(
                matches!(result, Err(LatchError::UnsupportedCommand { .. })),
                "{topic:?} should be unsupported"
            );
        }
    }

    #[test]
    fn missing_or_non_string_state_is_malformed() {
        let (d, _) = dispatcher();
        assert!(matches!(
            d.dispatch("cmd/lock/state", &json!({})),
            Err(LatchError::MalformedPayload(_))
        ));
        assert!(matches!(
            d.dispatch("cmd/lock/state", &json!({"state": 1})),
            Err(LatchError::MalformedPayload(_))
        ));
    }

    #[test]
    fn rejected_commands_never_reach_the_device() {
        let device = SimLock::new("front_door");
        let actuations = device.actuation_counter();
        let d = CommandDispatcher::new(Arc::new(LockController::new(Box::new(device))));

        let _ = d.dispatch("cmd/lock/state", &json!({"state": "toggle"}));
        let _ = d.dispatch("bogus/x", &json!({}));
        let _ = d.dispatch("dt/lock/state", &json!({"state": "lock"}));
        assert_eq!(actuations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn parse_produces_typed_command() {
        assert_eq!(
            Command::parse("cmd/lock/state", &json!({"state": "lock"})).unwrap(),
            Command::SetLockState(LockState::Locked)
        );
        assert_eq!(
            Command::parse("dt/lock/state", &json!(null)).unwrap(),
            Command::Telemetry {
                topic: "dt/lock/state".to_string()
            }
        );
    }
}
