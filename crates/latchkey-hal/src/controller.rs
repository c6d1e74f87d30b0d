//! [`LockController`] – owner of the canonical lock state.
//!
//! Every actuation request, local or remote, goes through
//! [`LockController::engage`] or [`LockController::release`].  Both run inside
//! one mutual-exclusion domain around the [`LockDevice`], so at most one
//! actuation is in flight at a time.  The canonical state is only written
//! after the driver confirms the move, and is published through an atomic so
//! [`LockController::current_state`] never waits on an actuation.
//!
//! The controller does not publish anything itself; it returns the new state
//! to whoever asked for the change.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use latchkey_types::{LatchError, LockState};
use tracing::{debug, info, instrument};

use crate::lock_device::LockDevice;

const LOCKED: u8 = 0;
const UNLOCKED: u8 = 1;

fn encode(state: LockState) -> u8 {
    match state {
        LockState::Locked => LOCKED,
        LockState::Unlocked => UNLOCKED,
    }
}

fn decode(raw: u8) -> LockState {
    if raw == UNLOCKED {
        LockState::Unlocked
    } else {
        LockState::Locked
    }
}

/// Single source of truth for the deadbolt state.
///
/// Share it between stages as `Arc<LockController>`.
pub struct LockController {
    component: String,
    device: Mutex<Box<dyn LockDevice>>,
    state: AtomicU8,
}

impl LockController {
    /// Wrap `device`.  The canonical state starts as [`LockState::Locked`].
    pub fn new(device: Box<dyn LockDevice>) -> Self {
        Self {
            component: device.id().to_string(),
            device: Mutex::new(device),
            state: AtomicU8::new(encode(LockState::Locked)),
        }
    }

    /// Identifier of the wrapped device.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Lock the door and return the confirmed state.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::HardwareFault`] if the driver fails or confirms
    /// an unexpected state.  The canonical state is left untouched.
    pub fn engage(&self) -> Result<LockState, LatchError> {
        self.actuate(LockState::Locked)
    }

    /// Unlock the door and return the confirmed state.
    ///
    /// # Errors
    ///
    /// See [`LockController::engage`].
    pub fn release(&self) -> Result<LockState, LatchError> {
        self.actuate(LockState::Unlocked)
    }

    /// Snapshot of the canonical state.  Never blocks on an actuation.
    pub fn current_state(&self) -> LockState {
        decode(self.state.load(Ordering::Acquire))
    }

    #[instrument(skip(self), fields(component = %self.component))]
    fn actuate(&self, target: LockState) -> Result<LockState, LatchError> {
        let mut device = self.device.lock().map_err(|_| LatchError::HardwareFault {
            component: self.component.clone(),
            details: "lock device mutex poisoned by an earlier panic".to_string(),
        })?;

        debug!(component = %self.component, target = %target, "actuating lock device");
        let confirmed = match target {
            LockState::Locked => device.lock()?,
            LockState::Unlocked => device.unlock()?,
        };
        if confirmed != target {
            return Err(LatchError::HardwareFault {
                component: self.component.clone(),
                details: format!("device confirmed {confirmed} after {target} request"),
            });
        }

        let previous = decode(self.state.swap(encode(confirmed), Ordering::AcqRel));
        info!(
            component = %self.component,
            from = %previous,
            to = %confirmed,
            "lock state confirmed"
        );
        Ok(confirmed)
    }
}
