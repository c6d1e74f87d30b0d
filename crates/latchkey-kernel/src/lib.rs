//! `latchkey-kernel` – Coordination & Routing
//!
//! The rules every stage obeys: when to stop, and which remote messages are
//! allowed to move the lock.
//!
//! # Modules
//!
//! - [`signal`] – [`PipelineSignal`][signal::PipelineSignal]:
//!   the set-once cooperative stop flag shared by all stages.
//! - [`dispatcher`] – [`CommandDispatcher`][dispatcher::CommandDispatcher]:
//!   parses a topic path and payload into a typed
//!   [`Command`][dispatcher::Command] and routes it to the
//!   [`LockController`][latchkey_hal::LockController].

pub mod dispatcher;
pub mod signal;

pub use dispatcher::{Command, CommandDispatcher, DispatchOutcome};
pub use signal::PipelineSignal;
