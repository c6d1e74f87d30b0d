//! In-process simulated drivers for running the pipeline without hardware.
//!
//! # Example
//!
//! ```rust
//! use latchkey_hal::controller::LockController;
//! use latchkey_hal::sim::SimLock;
//! use latchkey_types::LockState;
//!
//! let controller = LockController::new(Box::new(SimLock::new("front_door")));
//! assert_eq!(controller.release().unwrap(), LockState::Unlocked);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use latchkey_types::{Frame, LatchError, LockState};

use crate::camera::Camera;
use crate::lock_device::LockDevice;

// ────────────────────────────────────────────────────────────────────────────
// Simulated deadbolt
// ────────────────────────────────────────────────────────────────────────────

/// A simulated deadbolt that starts locked, sleeps for the configured
/// actuation delay and always confirms the requested state.
pub struct SimLock {
    id: String,
    state: LockState,
    delay: Duration,
    actuations: Arc<AtomicUsize>,
}

impl SimLock {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: LockState::Locked,
            delay: Duration::ZERO,
            actuations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Simulate a motor that takes `delay` per actuation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared counter of completed actuations, readable after the device has
    /// been moved into a controller.
    pub fn actuation_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.actuations)
    }

    fn drive(&mut self, target: LockState) -> LockState {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.state = target;
        self.actuations.fetch_add(1, Ordering::SeqCst);
        self.state
    }
}

impl LockDevice for SimLock {
    fn id(&self) -> &str {
        &self.id
    }

    fn lock(&mut self) -> Result<LockState, LatchError> {
        Ok(self.drive(LockState::Locked))
    }

    fn unlock(&mut self) -> Result<LockState, LatchError> {
        Ok(self.drive(LockState::Unlocked))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera
// ────────────────────────────────────────────────────────────────────────────

/// Placeholder image bytes emitted by [`SimCamera`].
pub const SIM_FRAME: &[u8] = b"\x89PNG\r\n\x1a\nlatchkey-sim-frame";

/// A simulated camera that returns [`SIM_FRAME`] on every read once opened.
pub struct SimCamera {
    id: String,
    open: bool,
    sequence: u64,
}

impl SimCamera {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            open: false,
            sequence: 0,
        }
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&mut self) -> Result<(), LatchError> {
        self.open = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, LatchError> {
        if !self.open {
            return Err(LatchError::CameraUnavailable(format!(
                "camera '{}' is not open",
                self.id
            )));
        }
        self.sequence += 1;
        Ok(Frame::new(SIM_FRAME.to_vec(), self.sequence))
    }

    fn release(&mut self) {
        self.open = false;
    }
}
