//! `latchkey-hal` – Hardware Abstraction Layer
//!
//! Driver traits for the deadbolt and the door camera, simulated drivers, and
//! the [`LockController`] that serialises every actuation.
//!
//! # Modules
//!
//! - [`lock_device`] – [`LockDevice`]: engage/release a physical deadbolt.
//! - [`camera`] – [`Camera`]: open/read/release an image source, plus
//!   [`DirectoryCamera`] which replays image files.
//! - [`controller`] – [`LockController`]: canonical [`LockState`][latchkey_types::LockState]
//!   behind one mutex.
//! - [`sim`] – [`SimLock`] and [`SimCamera`] for headless runs and tests.

pub mod camera;
pub mod controller;
pub mod lock_device;
pub mod sim;

pub use camera::{Camera, DirectoryCamera};
pub use controller::LockController;
pub use lock_device::LockDevice;
pub use sim::{SimCamera, SimLock};
