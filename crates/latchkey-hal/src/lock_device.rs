//! Generic `LockDevice` trait for the physical (or simulated) deadbolt.

use latchkey_types::{LatchError, LockState};

/// A deadbolt actuator.
///
/// Both operations block until the hardware confirms the resulting state.
/// Drivers are only ever called from inside the
/// [`LockController`][crate::controller::LockController] critical section, so
/// implementations do not need their own synchronisation.
pub trait LockDevice: Send {
    /// Stable identifier for this device, e.g. `"front_door"`.
    fn id(&self) -> &str;

    /// Drive the bolt out and return the state the hardware reports.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::HardwareFault`] if the bolt cannot be moved.
    fn lock(&mut self) -> Result<LockState, LatchError>;

    /// Retract the bolt and return the state the hardware reports.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::HardwareFault`] if the bolt cannot be moved.
    fn unlock(&mut self) -> Result<LockState, LatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockLock {
        id: String,
        state: LockState,
    }

    impl LockDevice for MockLock {
        fn id(&self) -> &str {
            &self.id
        }

        fn lock(&mut self) -> Result<LockState, LatchError> {
            self.state = LockState::Locked;
            Ok(self.state)
        }

        fn unlock(&mut self) -> Result<LockState, LatchError> {
            self.state = LockState::Unlocked;
            Ok(self.state)
        }
    }

    #[test]
    fn mock_lock_toggle() {
        let mut device = MockLock {
            id: "front_door".to_string(),
            state: LockState::Locked,
        };
        assert_eq!(device.id(), "front_door");
        assert_eq!(device.unlock().unwrap(), LockState::Unlocked);
        assert_eq!(device.lock().unwrap(), LockState::Locked);
    }
}
