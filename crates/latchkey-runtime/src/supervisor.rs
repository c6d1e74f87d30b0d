//! [`Supervisor`] – pipeline lifecycle.
//!
//! ```text
//! Init ──► Running ──► Stopping ──► Stopped
//! ```
//!
//! * **Init** – connect the broker, subscribe to
//!   [`COMMAND_TOPIC`], publish the controller's current state once.
//! * **Running** – capture, authorization and command stages run on their own
//!   threads; the supervisor publishes their state updates and watches the
//!   broker connection.
//! * **Stopping** – the [`PipelineSignal`] is up; stages finish their current
//!   iteration and exit.
//! * **Stopped** – stages joined, pending updates published, broker
//!   disconnected.
//!
//! There is no way back from Stopping or Stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use latchkey_hal::{Camera, LockController};
use latchkey_kernel::{CommandDispatcher, PipelineSignal};
use latchkey_middleware::{Broker, COMMAND_TOPIC, ConnectionEvent, STATE_TOPIC};
use latchkey_types::{Frame, InboundMessage, LatchError, QoS};
use latchkey_vision::VisionService;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::authorization::{AuthorizationConfig, AuthorizationReport, AuthorizationStage};
use crate::capture::{CaptureConfig, CaptureReport, CaptureStage};
use crate::command_stage::{CommandReport, CommandStage, command_handler};
use crate::publisher::{StateUpdate, StateUpdates, encode_state, state_channel};
use crate::queue::queue;

/// How often the supervisor checks the stop signal.
const SIGNAL_POLL: Duration = Duration::from_millis(50);

/// Lifecycle phase, observable through [`Supervisor::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Init,
    Running,
    Stopping,
    Stopped,
}

/// Every tunable of the pipeline.  Defaults are the design values.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub submit_interval: Duration,
    pub frame_period: Duration,
    pub enqueue_timeout: Duration,
    pub dequeue_timeout: Duration,
    pub frame_queue_capacity: usize,
    /// `0` means unbounded.
    pub command_queue_capacity: usize,
    pub max_read_failures: u32,
    pub presence_threshold: f32,
    pub similarity_threshold: f32,
    pub reference_image: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        let auth = AuthorizationConfig::default();
        Self {
            submit_interval: capture.submit_interval,
            frame_period: capture.frame_period,
            enqueue_timeout: capture.enqueue_timeout,
            dequeue_timeout: auth.dequeue_timeout,
            frame_queue_capacity: 4,
            command_queue_capacity: 256,
            max_read_failures: capture.max_read_failures,
            presence_threshold: auth.presence_threshold,
            similarity_threshold: auth.similarity_threshold,
            reference_image: auth.reference_image,
        }
    }
}

impl PipelineConfig {
    fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            submit_interval: self.submit_interval,
            frame_period: self.frame_period,
            enqueue_timeout: self.enqueue_timeout,
            max_read_failures: self.max_read_failures,
        }
    }

    fn authorization(&self) -> AuthorizationConfig {
        AuthorizationConfig {
            presence_threshold: self.presence_threshold,
            similarity_threshold: self.similarity_threshold,
            reference_image: self.reference_image.clone(),
            dequeue_timeout: self.dequeue_timeout,
        }
    }
}

/// Per-stage counters plus the reason the pipeline stopped.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub capture: CaptureReport,
    pub authorization: AuthorizationReport,
    pub commands: CommandReport,
    pub published: u64,
    pub stop_reason: Option<String>,
}

type StageHandle<T> = JoinHandle<Result<T, LatchError>>;

struct Stages {
    capture: StageHandle<CaptureReport>,
    authorization: StageHandle<AuthorizationReport>,
    command: StageHandle<CommandReport>,
}

/// Owns the stop signal, the queues, the broker connection and the stage
/// threads.
pub struct Supervisor {
    config: PipelineConfig,
    broker: Arc<dyn Broker>,
    controller: Arc<LockController>,
    signal: PipelineSignal,
    state: watch::Sender<PipelineState>,
    quit: Option<Receiver<()>>,
}

impl Supervisor {
    pub fn new(
        config: PipelineConfig,
        broker: Arc<dyn Broker>,
        controller: Arc<LockController>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Init);
        Self {
            config,
            broker,
            controller,
            signal: PipelineSignal::new(),
            state,
            quit: None,
        }
    }

    /// Forward an operator quit input to the capture stage.
    pub fn with_quit(mut self, quit: Receiver<()>) -> Self {
        self.quit = Some(quit);
        self
    }

    /// Handle to the stop signal, for Ctrl-C handlers and tests.
    pub fn signal(&self) -> PipelineSignal {
        self.signal.clone()
    }

    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    fn advance(&self, next: PipelineState) {
        self.state.send_if_modified(|current| {
            if next > *current {
                info!(from = ?*current, to = ?next, "pipeline state");
                *current = next;
                true
            } else {
                false
            }
        });
    }

    async fn publish(&self, update: StateUpdate) -> Result<(), LatchError> {
        let payload = encode_state(update.state)?;
        self.broker
            .publish(STATE_TOPIC, payload, QoS::AtLeastOnce)
            .await?;
        info!(topic = STATE_TOPIC, state = %update.state, origin = update.origin, "state published");
        Ok(())
    }

    async fn publish_logged(&self, update: StateUpdate, report: &mut PipelineReport) {
        match self.publish(update).await {
            Ok(()) => report.published += 1,
            Err(e) => error!(topic = STATE_TOPIC, state = %update.state, error = %e, "state publish failed"),
        }
    }

    async fn resubscribe(&self) -> Result<(), LatchError> {
        let results = self.broker.resubscribe_existing().await?;
        for (topic, granted) in results {
            match granted {
                Some(qos) => info!(topic = %topic, qos = ?qos, "resubscribed"),
                None => return Err(LatchError::ResubscribeRejected(topic)),
            }
        }
        Ok(())
    }

    /// Drive the pipeline through its whole lifecycle.
    ///
    /// Returns once the stop signal has been raised and every stage has
    /// exited.
    ///
    /// # Errors
    ///
    /// Broker errors during Init, or the first fatal error raised by a stage
    /// or by resubscription.  Shutdown is always completed first.
    pub async fn run(
        self,
        camera: Box<dyn Camera>,
        vision: Box<dyn VisionService>,
    ) -> Result<PipelineReport, LatchError> {
        let mut report = PipelineReport::default();
        let mut events = self.broker.connection_events();

        // ── Init ─────────────────────────────────────────────────────────
        self.broker.connect().await?;
        let (command_tx, command_rx) =
            queue::<InboundMessage>("commands", self.config.command_queue_capacity);
        let (frame_tx, frame_rx) =
            queue::<Frame>("frames", self.config.frame_queue_capacity.max(1));
        let (publisher, mut updates) = state_channel();

        let init = async {
            let granted = self
                .broker
                .subscribe(COMMAND_TOPIC, QoS::AtLeastOnce, command_handler(command_tx))
                .await?;
            info!(topic = COMMAND_TOPIC, qos = ?granted, "subscribed");
            self.publish(StateUpdate {
                state: self.controller.current_state(),
                origin: "supervisor",
            })
            .await
        };
        if let Err(e) = init.await {
            error!(error = %e, "pipeline init failed");
            self.finish().await;
            return Err(e);
        }
        report.published += 1;

        // ── Running ──────────────────────────────────────────────────────
        let mut capture = CaptureStage::new(
            camera,
            Arc::clone(&self.controller),
            frame_tx,
            self.signal.clone(),
            self.config.capture(),
        );
        if let Some(quit) = self.quit.clone() {
            capture = capture.with_quit(quit);
        }
        let authorization = AuthorizationStage::new(
            frame_rx,
            vision,
            Arc::clone(&self.controller),
            publisher.clone(),
            self.signal.clone(),
            self.config.authorization(),
        );
        let command = CommandStage::new(
            command_rx,
            CommandDispatcher::new(Arc::clone(&self.controller)),
            publisher,
            self.signal.clone(),
            self.config.dequeue_timeout,
        );

        let stages = match spawn_stages(capture, authorization, command) {
            Ok(stages) => stages,
            Err(e) => {
                self.signal.trigger("stage spawn failed");
                self.finish().await;
                return Err(e);
            }
        };
        self.advance(PipelineState::Running);

        let mut fatal: Option<LatchError> = None;
        let mut events_open = true;
        let mut ticker = tokio::time::interval(SIGNAL_POLL);
        loop {
            tokio::select! {
                Some(update) = updates.recv() => {
                    self.publish_logged(update, &mut report).await;
                }
                event = events.recv(), if events_open => match event {
                    Ok(ConnectionEvent::Interrupted { error }) => {
                        warn!(error = %error, "broker connection interrupted");
                    }
                    Ok(ConnectionEvent::Resumed { return_code, session_present }) => {
                        info!(?return_code, session_present, "broker connection resumed");
                        if return_code.is_accepted() {
                            let resubscribed = if session_present {
                                Ok(())
                            } else {
                                self.resubscribe().await
                            };
                            match resubscribed {
                                // Updates published during the outage were lost.
                                Ok(()) => {
                                    let update = StateUpdate {
                                        state: self.controller.current_state(),
                                        origin: "resync",
                                    };
                                    self.publish_logged(update, &mut report).await;
                                }
                                Err(e) => {
                                    error!(error = %e, "resubscribe failed");
                                    self.signal.trigger("resubscribe rejected");
                                    fatal.get_or_insert(e);
                                }
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!(missed = n, "connection events lagged"),
                    Err(RecvError::Closed) => events_open = false,
                },
                _ = ticker.tick() => {
                    if self.signal.is_set() {
                        break;
                    }
                }
            }
        }

        // ── Stopping ─────────────────────────────────────────────────────
        self.advance(PipelineState::Stopping);
        report.stop_reason = self.signal.reason();
        let joined = tokio::task::spawn_blocking(move || {
            (
                join_stage("capture", stages.capture),
                join_stage("authorization", stages.authorization),
                join_stage("command", stages.command),
            )
        })
        .await
        .map_err(|e| LatchError::Channel(format!("stage join task failed: {e}")));

        drain(&self, &mut updates, &mut report).await;
        self.finish().await;

        let (capture, authorization, command) = joined?;
        match capture {
            Ok(r) => report.capture = r,
            Err(e) => {
                fatal.get_or_insert(e);
            }
        }
        match authorization {
            Ok(r) => report.authorization = r,
            Err(e) => {
                fatal.get_or_insert(e);
            }
        }
        match command {
            Ok(r) => report.commands = r,
            Err(e) => {
                fatal.get_or_insert(e);
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Disconnect and enter Stopped.
    async fn finish(&self) {
        if let Err(e) = self.broker.disconnect().await {
            warn!(error = %e, "broker disconnect failed");
        }
        self.advance(PipelineState::Stopped);
    }
}

async fn drain(supervisor: &Supervisor, updates: &mut StateUpdates, report: &mut PipelineReport) {
    while let Ok(update) = updates.try_recv() {
        supervisor.publish_logged(update, report).await;
    }
}

fn spawn_stages(
    capture: CaptureStage,
    authorization: AuthorizationStage,
    command: CommandStage,
) -> Result<Stages, LatchError> {
    let spawn_err = |name: &str, e: std::io::Error| {
        LatchError::Channel(format!("failed to spawn {name} stage: {e}"))
    };
    let capture = thread::Builder::new()
        .name("latchkey-capture".into())
        .spawn(move || capture.run())
        .map_err(|e| spawn_err("capture", e))?;
    let authorization = thread::Builder::new()
        .name("latchkey-authorization".into())
        .spawn(move || authorization.run())
        .map_err(|e| spawn_err("authorization", e))?;
    let command = thread::Builder::new()
        .name("latchkey-command".into())
        .spawn(move || command.run())
        .map_err(|e| spawn_err("command", e))?;
    Ok(Stages {
        capture,
        authorization,
        command,
    })
}

fn join_stage<T>(name: &str, handle: StageHandle<T>) -> Result<T, LatchError> {
    handle
        .join()
        .map_err(|_| LatchError::Channel(format!("{name} stage panicked")))?
}
