//! Outbound lock-state notifications.
//!
//! Stages run on plain threads and cannot await the broker, so they hand
//! confirmed states to a [`StatePublisher`].  The supervisor drains the
//! matching [`StateUpdates`] and publishes each one to
//! [`STATE_TOPIC`][latchkey_middleware::STATE_TOPIC] at least once.

use latchkey_types::{LatchError, LockState, StatePayload};
use tokio::sync::mpsc;

/// A confirmed state change waiting to be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateUpdate {
    pub state: LockState,
    /// Stage that caused the change, for logs.
    pub origin: &'static str,
}

/// Receiving half, owned by the supervisor.
pub type StateUpdates = mpsc::UnboundedReceiver<StateUpdate>;

/// Sending half, cloned into every stage that can change the lock state.
#[derive(Debug, Clone)]
pub struct StatePublisher {
    tx: mpsc::UnboundedSender<StateUpdate>,
}

/// Create a connected publisher / receiver pair.
pub fn state_channel() -> (StatePublisher, StateUpdates) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StatePublisher { tx }, rx)
}

impl StatePublisher {
    /// Queue `state` for publication.  Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::Channel`] when the supervisor has stopped
    /// draining updates.
    pub fn publish_state(&self, state: LockState, origin: &'static str) -> Result<(), LatchError> {
        self.tx
            .send(StateUpdate { state, origin })
            .map_err(|_| LatchError::Channel("state publisher closed".to_string()))
    }
}

/// Encode `state` as the `{"state":"lock"|"unlock"}` wire payload.
///
/// # Errors
///
/// Returns [`LatchError::MalformedPayload`] if serialisation fails.
pub fn encode_state(state: LockState) -> Result<Vec<u8>, LatchError> {
    serde_json::to_vec(&StatePayload { state })
        .map_err(|e| LatchError::MalformedPayload(format!("cannot encode state: {e}")))
}
