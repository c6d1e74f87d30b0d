//! Capture stage: camera → frame queue.
//!
//! Frames are read every `frame_period`, but only one frame is offered to
//! the frame queue per `submit_interval`, and only while the lock is
//! LOCKED.  A full queue drops the frame after `enqueue_timeout`; capture
//! never stalls on backpressure.
//!
//! The camera is released exactly once on every exit path, including a
//! failed open.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use latchkey_hal::{Camera, LockController};
use latchkey_kernel::PipelineSignal;
use latchkey_types::{Frame, LatchError, LockState};
use tracing::{debug, error, info, instrument, warn};

use crate::queue::{OfferError, QueueSender};

const STAGE: &str = "capture";

/// Timing knobs for [`CaptureStage`].
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub submit_interval: Duration,
    pub frame_period: Duration,
    pub enqueue_timeout: Duration,
    /// Consecutive read failures tolerated before the camera counts as lost.
    pub max_read_failures: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            submit_interval: Duration::from_secs(2),
            frame_period: Duration::from_millis(100),
            enqueue_timeout: Duration::from_secs(1),
            max_read_failures: 30,
        }
    }
}

/// Counters reported when the stage exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub frames_read: u64,
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    pub read_failures: u64,
}

/// Owns the camera and releases it when dropped.
struct CameraGuard {
    camera: Box<dyn Camera>,
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        self.camera.release();
        info!(stage = STAGE, camera = %self.camera.id(), "camera released");
    }
}

pub struct CaptureStage {
    camera: Box<dyn Camera>,
    controller: Arc<LockController>,
    frames: QueueSender<Frame>,
    signal: PipelineSignal,
    quit: Option<Receiver<()>>,
    config: CaptureConfig,
}

impl CaptureStage {
    pub fn new(
        camera: Box<dyn Camera>,
        controller: Arc<LockController>,
        frames: QueueSender<Frame>,
        signal: PipelineSignal,
        config: CaptureConfig,
    ) -> Self {
        Self {
            camera,
            controller,
            frames,
            signal,
            quit: None,
            config,
        }
    }

    /// Stop when a `()` arrives on `quit` (the operator quit input).
    pub fn with_quit(mut self, quit: Receiver<()>) -> Self {
        self.quit = Some(quit);
        self
    }

    fn quit_requested(quit: Option<&Receiver<()>>) -> bool {
        match quit.map(Receiver::try_recv) {
            Some(Ok(())) => true,
            // A closed input (e.g. stdin at EOF) is not a quit request.
            Some(Err(TryRecvError::Empty | TryRecvError::Disconnected)) | None => false,
        }
    }

    /// Run until the signal is raised, the operator quits, or the camera is
    /// lost.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::CameraUnavailable`] if the camera cannot be
    /// opened or keeps failing to deliver frames.  The signal is raised
    /// before returning.
    #[instrument(name = "capture.run", skip_all, fields(stage = STAGE))]
    pub fn run(self) -> Result<CaptureReport, LatchError> {
        let CaptureStage {
            camera,
            controller,
            frames,
            signal,
            quit,
            config,
        } = self;
        let mut guard = CameraGuard { camera };
        let mut report = CaptureReport::default();

        if let Err(e) = guard.camera.open() {
            error!(stage = STAGE, camera = %guard.camera.id(), error = %e, "camera failed to open");
            signal.trigger("camera failed to open");
            return Err(e);
        }
        info!(stage = STAGE, camera = %guard.camera.id(), "capture started");

        let max_failures = config.max_read_failures.max(1);
        let mut consecutive_failures = 0u32;
        let mut last_submit: Option<Instant> = None;

        loop {
            if signal.is_set() {
                break;
            }
            if Self::quit_requested(quit.as_ref()) {
                info!(stage = STAGE, "operator quit received");
                signal.trigger("operator quit");
                break;
            }

            match guard.camera.read_frame() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    report.frames_read += 1;
                    let due = last_submit.is_none_or(|t| t.elapsed() >= config.submit_interval);
                    if due {
                        last_submit = Some(Instant::now());
                        if controller.current_state() == LockState::Locked {
                            let sequence = frame.sequence;
                            match frames.offer(frame, config.enqueue_timeout) {
                                Ok(()) => {
                                    report.frames_submitted += 1;
                                    debug!(stage = STAGE, sequence, "frame submitted");
                                }
                                Err(OfferError::Full(_)) => {
                                    report.frames_dropped += 1;
                                    debug!(
                                        stage = STAGE,
                                        sequence,
                                        queue = frames.name(),
                                        "frame queue full, frame dropped"
                                    );
                                }
                                Err(OfferError::Disconnected(_)) => {
                                    warn!(stage = STAGE, "authorization stage gone, stopping capture");
                                    break;
                                }
                            }
                        } else {
                            debug!(stage = STAGE, "lock not LOCKED, skipping submission");
                        }
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    report.read_failures += 1;
                    warn!(
                        stage = STAGE,
                        error = %e,
                        consecutive_failures,
                        "frame read failed"
                    );
                    if consecutive_failures >= max_failures {
                        error!(stage = STAGE, "camera lost");
                        signal.trigger("camera lost");
                        return Err(LatchError::CameraUnavailable(format!(
                            "{consecutive_failures} consecutive read failures on '{}'",
                            guard.camera.id()
                        )));
                    }
                }
            }

            if signal.wait_timeout(config.frame_period) {
                break;
            }
        }

        info!(
            stage = STAGE,
            read = report.frames_read,
            submitted = report.frames_submitted,
            dropped = report.frames_dropped,
            "capture stopped"
        );
        Ok(report)
    }
}
