//! Command stage: broker callback → command queue → dispatcher → publish.
//!
//! The broker callback built by [`command_handler`] only enqueues; it never
//! blocks the connection task.  Parsing, dispatch and publishing all happen
//! on the stage's own thread.

use std::sync::Arc;
use std::time::Duration;

use latchkey_kernel::{CommandDispatcher, DispatchOutcome, PipelineSignal};
use latchkey_middleware::MessageHandler;
use latchkey_types::{InboundMessage, LatchError, LockState};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::publisher::StatePublisher;
use crate::queue::{OfferError, QueueReceiver, QueueSender};

const STAGE: &str = "command";

/// Build the subscription callback that feeds `commands`.
///
/// A full queue drops the message with an error log carrying its topic and
/// payload.
pub fn command_handler(commands: QueueSender<InboundMessage>) -> MessageHandler {
    Arc::new(move |topic: &str, payload: &[u8]| {
        let message = InboundMessage::new(topic, payload);
        match commands.try_offer(message) {
            Ok(()) => debug!(stage = STAGE, topic, "command enqueued"),
            Err(OfferError::Full(message)) => error!(
                stage = STAGE,
                topic,
                payload = %message.payload_lossy(),
                queue = commands.name(),
                "command queue full, command dropped"
            ),
            Err(OfferError::Disconnected(message)) => warn!(
                stage = STAGE,
                topic,
                payload = %message.payload_lossy(),
                "command stage stopped, command dropped"
            ),
        }
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandReport {
    pub received: u64,
    pub actuated: u64,
    pub rejected: u64,
}

pub struct CommandStage {
    commands: QueueReceiver<InboundMessage>,
    dispatcher: CommandDispatcher,
    publisher: StatePublisher,
    signal: PipelineSignal,
    dequeue_timeout: Duration,
}

impl CommandStage {
    pub fn new(
        commands: QueueReceiver<InboundMessage>,
        dispatcher: CommandDispatcher,
        publisher: StatePublisher,
        signal: PipelineSignal,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            commands,
            dispatcher,
            publisher,
            signal,
            dequeue_timeout,
        }
    }

    /// Decode and dispatch one message, publishing any resulting state.
    ///
    /// # Errors
    ///
    /// [`LatchError::MalformedPayload`] for non-JSON payloads, otherwise
    /// whatever [`CommandDispatcher::dispatch`] returns.
    #[instrument(name = "command.handle", skip_all, fields(topic = %message.topic))]
    pub fn handle(&self, message: &InboundMessage) -> Result<Option<LockState>, LatchError> {
        let payload: Value = serde_json::from_slice(&message.payload)
            .map_err(|e| LatchError::MalformedPayload(format!("invalid JSON: {e}")))?;
        match self.dispatcher.dispatch(&message.topic, &payload)? {
            DispatchOutcome::Actuated(state) => {
                info!(stage = STAGE, topic = %message.topic, state = %state, "command applied");
                if let Err(e) = self.publisher.publish_state(state, STAGE) {
                    warn!(stage = STAGE, error = %e, "state update not published");
                }
                Ok(Some(state))
            }
            DispatchOutcome::Ignored => Ok(None),
        }
    }

    /// Process commands until the signal is raised.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::HardwareFault`] if an actuation fails.  The
    /// signal is raised before returning.  Every other error is logged and
    /// the message dropped.
    #[instrument(name = "command.run", skip_all, fields(stage = STAGE))]
    pub fn run(self) -> Result<CommandReport, LatchError> {
        let mut report = CommandReport::default();
        info!(stage = STAGE, "command processing started");

        while !self.signal.is_set() {
            let message = match self.commands.poll(self.dequeue_timeout) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    debug!(stage = STAGE, error = %e, "command queue closed");
                    break;
                }
            };
            report.received += 1;
            match self.handle(&message) {
                Ok(Some(_)) => report.actuated += 1,
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    error!(
                        stage = STAGE,
                        topic = %message.topic,
                        payload = %message.payload_lossy(),
                        error = %e,
                        "command actuation failed"
                    );
                    self.signal.trigger("command actuation failed");
                    return Err(e);
                }
                Err(e) => {
                    report.rejected += 1;
                    warn!(
                        stage = STAGE,
                        topic = %message.topic,
                        payload = %message.payload_lossy(),
                        error = %e,
                        "command rejected"
                    );
                }
            }
        }

        info!(
            stage = STAGE,
            received = report.received,
            actuated = report.actuated,
            rejected = report.rejected,
            "command processing stopped"
        );
        Ok(report)
    }
}
