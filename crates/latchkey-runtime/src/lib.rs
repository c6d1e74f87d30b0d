//! `latchkey-runtime` – the concurrent lock pipeline.
//!
//! Three stages run on their own threads, connected by bounded queues and a
//! shared stop signal:
//!
//! ```text
//!  camera ──► CaptureStage ──frames──► AuthorizationStage ──┐
//!                                                            ├──► StatePublisher ──► Supervisor ──► broker
//!  broker ──► command_handler ──commands──► CommandStage ───┘
//! ```
//!
//! - [`supervisor`] – [`Supervisor`]: lifecycle, broker session, state
//!   publication and stage joins.
//! - [`capture`] – frame reading and rate-limited submission.
//! - [`authorization`] – presence check, face comparison, lock release.
//! - [`command_stage`] – remote `cmd/lock/state` handling.
//! - [`queue`] – named bounded queues with timed offer / poll.
//! - [`publisher`] – state updates from stage threads to the supervisor.
//! - [`telemetry`] – [`init_tracing`].

pub mod authorization;
pub mod capture;
pub mod command_stage;
pub mod publisher;
pub mod queue;
pub mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use authorization::{AuthorizationConfig, AuthorizationReport, AuthorizationStage, Decision};
pub use capture::{CaptureConfig, CaptureReport, CaptureStage};
pub use command_stage::{CommandReport, CommandStage, command_handler};
pub use publisher::{StatePublisher, StateUpdate, StateUpdates, encode_state, state_channel};
pub use queue::{OfferError, QueueReceiver, QueueSender, queue};
pub use supervisor::{PipelineConfig, PipelineReport, PipelineState, Supervisor};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
