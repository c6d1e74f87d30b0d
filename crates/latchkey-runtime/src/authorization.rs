//! Authorization stage: frame queue → vision service → lock release.
//!
//! Decision policy for each dequeued frame:
//!
//! 1. lock not LOCKED → skip, no vision call;
//! 2. presence confidence ≤ `presence_threshold` → no action;
//! 3. reference image unreadable → skip the frame;
//! 4. comparison matched → `release()` and publish the new state.
//!
//! Vision failures count as "no face" / "no match" for that frame only.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use latchkey_hal::LockController;
use latchkey_kernel::PipelineSignal;
use latchkey_types::{Frame, LatchError, LockState};
use latchkey_vision::VisionService;
use tracing::{debug, error, info, instrument, warn};

use crate::publisher::StatePublisher;
use crate::queue::QueueReceiver;

const STAGE: &str = "authorization";

#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    /// Presence confidence, in `[0, 1]`, that must be exceeded.
    pub presence_threshold: f32,
    /// Face similarity percentage required for a match.
    pub similarity_threshold: f32,
    pub reference_image: PathBuf,
    pub dequeue_timeout: Duration,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            presence_threshold: 0.75,
            similarity_threshold: 99.5,
            reference_image: PathBuf::from("reference.jpg"),
            dequeue_timeout: Duration::from_secs(1),
        }
    }
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    SkippedUnlocked,
    NoFace { confidence: f32 },
    ReferenceUnavailable,
    NoMatch { confidence: f32 },
    Authorized { confidence: f32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorizationReport {
    pub frames: u64,
    pub skipped: u64,
    pub authorized: u64,
}

pub struct AuthorizationStage {
    frames: QueueReceiver<Frame>,
    vision: Box<dyn VisionService>,
    controller: Arc<LockController>,
    publisher: StatePublisher,
    signal: PipelineSignal,
    config: AuthorizationConfig,
}

impl AuthorizationStage {
    pub fn new(
        frames: QueueReceiver<Frame>,
        vision: Box<dyn VisionService>,
        controller: Arc<LockController>,
        publisher: StatePublisher,
        signal: PipelineSignal,
        config: AuthorizationConfig,
    ) -> Self {
        Self {
            frames,
            vision,
            controller,
            publisher,
            signal,
            config,
        }
    }

    /// Consume frames until the signal is raised or capture has exited.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::HardwareFault`] if releasing the lock fails.  The
    /// signal is raised before returning.
    #[instrument(name = "authorization.run", skip_all, fields(stage = STAGE))]
    pub fn run(self) -> Result<AuthorizationReport, LatchError> {
        let mut report = AuthorizationReport::default();
        info!(stage = STAGE, "authorization started");

        while !self.signal.is_set() {
            let frame = match self.frames.poll(self.config.dequeue_timeout) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    debug!(stage = STAGE, error = %e, "frame queue closed");
                    break;
                }
            };
            report.frames += 1;
            match self.process(&frame) {
                Ok(Decision::Authorized { .. }) => report.authorized += 1,
                Ok(Decision::SkippedUnlocked) => report.skipped += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(stage = STAGE, sequence = frame.sequence, error = %e, "lock release failed");
                    self.signal.trigger("lock release failed");
                    return Err(e);
                }
            }
        }

        info!(
            stage = STAGE,
            frames = report.frames,
            authorized = report.authorized,
            "authorization stopped"
        );
        Ok(report)
    }

    /// Apply the decision policy to one frame.
    ///
    /// # Errors
    ///
    /// Only actuation failures are returned; every vision or reference
    /// problem resolves to a non-authorizing [`Decision`].
    #[instrument(name = "authorization.process", skip_all, fields(sequence = frame.sequence))]
    pub fn process(&self, frame: &Frame) -> Result<Decision, LatchError> {
        if self.controller.current_state() != LockState::Locked {
            debug!(stage = STAGE, sequence = frame.sequence, "lock not LOCKED, skipping frame");
            return Ok(Decision::SkippedUnlocked);
        }

        let confidence = match self.vision.detect_face_presence(&frame.data) {
            Ok(c) => c,
            Err(e) => {
                warn!(stage = STAGE, sequence = frame.sequence, error = %e, "presence check failed");
                0.0
            }
        };
        // NaN never authorizes.
        if confidence.is_nan() || confidence <= self.config.presence_threshold {
            debug!(stage = STAGE, sequence = frame.sequence, confidence, "no face present");
            return Ok(Decision::NoFace { confidence });
        }

        let reference = match fs::read(&self.config.reference_image) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    stage = STAGE,
                    path = %self.config.reference_image.display(),
                    error = %e,
                    "reference image unreadable, skipping frame"
                );
                return Ok(Decision::ReferenceUnavailable);
            }
        };

        let matched = match self.vision.compare_faces(
            &frame.data,
            &reference,
            self.config.similarity_threshold,
        ) {
            Ok(m) => m,
            Err(e) => {
                warn!(stage = STAGE, sequence = frame.sequence, error = %e, "face comparison failed");
                false
            }
        };
        if !matched {
            info!(stage = STAGE, sequence = frame.sequence, confidence, "face did not match");
            return Ok(Decision::NoMatch { confidence });
        }

        let state = self.controller.release()?;
        info!(stage = STAGE, sequence = frame.sequence, confidence, state = %state, "face authorized");
        if let Err(e) = self.publisher.publish_state(state, STAGE) {
            warn!(stage = STAGE, error = %e, "state update not published");
        }
        Ok(Decision::Authorized { confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{StateUpdates, state_channel};
    use crate::queue::{QueueSender, queue};
    use crate::test_support::Recorder;
    use latchkey_hal::{LockDevice, SimLock};
    use latchkey_vision::{ScriptedVision, VisionCalls};
    use std::thread;
    use tempfile::NamedTempFile;

    struct Harness {
        stage: AuthorizationStage,
        frames: QueueSender<Frame>,
        controller: Arc<LockController>,
        calls: VisionCalls,
        updates: StateUpdates,
        signal: PipelineSignal,
        _reference: NamedTempFile,
    }

    fn harness(vision: ScriptedVision) -> Harness {
        harness_with_device(vision, Box::new(SimLock::new("front_door")))
    }

    fn harness_with_device(vision: ScriptedVision, device: Box<dyn LockDevice>) -> Harness {
        let reference = NamedTempFile::new().unwrap();
        std::fs::write(reference.path(), b"reference-face").unwrap();
        let (tx, rx) = queue("frames", 4);
        let controller = Arc::new(LockController::new(device));
        let (publisher, updates) = state_channel();
        let signal = PipelineSignal::new();
        let calls = vision.calls();
        let stage = AuthorizationStage::new(
            rx,
            Box::new(vision),
            Arc::clone(&controller),
            publisher,
            signal.clone(),
            AuthorizationConfig {
                reference_image: reference.path().to_path_buf(),
                dequeue_timeout: Duration::from_millis(20),
                ..AuthorizationConfig::default()
            },
        );
        Harness {
            stage,
            frames: tx,
            controller,
            calls,
            updates,
            signal,
            _reference: reference,
        }
    }

    fn frame() -> Frame {
        Frame::new(b"door-frame".to_vec(), 1)
    }

    #[test]
    fn confident_match_releases_and_publishes_once() {
        let mut h = harness(ScriptedVision::new(0.92, true));
        let decision = h.stage.process(&frame()).unwrap();
        assert_eq!(decision, Decision::Authorized { confidence: 0.92 });
        assert_eq!(h.controller.current_state(), LockState::Unlocked);

        let update = h.updates.try_recv().unwrap();
        assert_eq!(update.state, LockState::Unlocked);
        assert_eq!(update.origin, "authorization");
        assert!(h.updates.try_recv().is_err());
    }

    #[test]
    fn low_confidence_skips_comparison() {
        let mut h = harness(ScriptedVision::new(0.40, true));
        let decision = h.stage.process(&frame()).unwrap();
        assert_eq!(decision, Decision::NoFace { confidence: 0.40 });
        assert_eq!(h.calls.presence(), 1);
        assert_eq!(h.calls.compare(), 0);
        assert_eq!(h.controller.current_state(), LockState::Locked);
        assert!(h.updates.try_recv().is_err());
    }

    #[test]
    fn threshold_must_be_exceeded() {
        let h = harness(ScriptedVision::new(0.75, true));
        assert!(matches!(
            h.stage.process(&frame()).unwrap(),
            Decision::NoFace { .. }
        ));
        assert_eq!(h.calls.compare(), 0);
    }

    #[test]
    fn nan_confidence_never_compares() {
        let h = harness(ScriptedVision::new(f32::NAN, true));
        assert!(matches!(
            h.stage.process(&frame()).unwrap(),
            Decision::NoFace { confidence } if confidence.is_nan()
        ));
        assert_eq!(h.calls.compare(), 0);
        assert_eq!(h.controller.current_state(), LockState::Locked);
    }

    #[test]
    fn process_runs_inside_a_span() {
        let h = harness(ScriptedVision::new(0.10, false));
        let recorder = Recorder::default();
        recorder.record(|| h.stage.process(&frame())).unwrap();
        assert!(
            recorder.spans().iter().any(|s| s == "authorization.process"),
            "spans: {:?}",
            recorder.spans()
        );
    }

    #[test]
    fn unlocked_lock_means_zero_vision_calls() {
        let h = harness(ScriptedVision::new(0.99, true));
        h.controller.release().unwrap();
        assert_eq!(h.stage.process(&frame()).unwrap(), Decision::SkippedUnlocked);
        assert_eq!(h.calls.total(), 0);
    }

    #[test]
    fn mismatch_leaves_lock_engaged() {
        let mut h = harness(ScriptedVision::new(0.95, false));
        assert_eq!(
            h.stage.process(&frame()).unwrap(),
            Decision::NoMatch { confidence: 0.95 }
        );
        assert_eq!(h.calls.compare(), 1);
        assert_eq!(h.controller.current_state(), LockState::Locked);
        assert!(h.updates.try_recv().is_err());
    }

    #[test]
    fn vision_failure_fails_closed() {
        let h = harness(ScriptedVision::new(0.99, true).failing());
        assert_eq!(
            h.stage.process(&frame()).unwrap(),
            Decision::NoFace { confidence: 0.0 }
        );
        assert_eq!(h.controller.current_state(), LockState::Locked);
    }

    #[test]
    fn unreadable_reference_skips_frame() {
        let h = harness(ScriptedVision::new(0.99, true));
        std::fs::remove_file(h._reference.path()).unwrap();
        assert_eq!(
            h.stage.process(&frame()).unwrap(),
            Decision::ReferenceUnavailable
        );
        assert_eq!(h.calls.compare(), 0);
        assert_eq!(h.controller.current_state(), LockState::Locked);
    }

    #[test]
    fn release_fault_is_fatal() {
        struct StuckBolt;
        impl LockDevice for StuckBolt {
            fn id(&self) -> &str {
                "stuck"
            }
            fn lock(&mut self) -> Result<LockState, LatchError> {
                Ok(LockState::Locked)
            }
            fn unlock(&mut self) -> Result<LockState, LatchError> {
                Err(LatchError::HardwareFault {
                    component: "stuck".into(),
                    details: "bolt jammed".into(),
                })
            }
        }

        let h = harness_with_device(ScriptedVision::new(0.99, true), Box::new(StuckBolt));
        h.frames.offer(frame(), Duration::from_millis(10)).unwrap();
        let signal = h.signal.clone();
        let result = h.stage.run();
        assert!(matches!(result, Err(LatchError::HardwareFault { .. })));
        assert!(signal.is_set());
        assert_eq!(h.controller.current_state(), LockState::Locked);
    }

    #[test]
    fn run_drains_queue_until_signalled() {
        let h = harness(ScriptedVision::new(0.10, false));
        for _ in 0..3 {
            h.frames.offer(frame(), Duration::from_millis(10)).unwrap();
        }
        let signal = h.signal.clone();
        let calls = h.calls.clone();
        let stage = h.stage;
        let handle = thread::spawn(move || stage.run());
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while calls.presence() < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        signal.trigger("test");
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.frames, 3);
        assert_eq!(report.authorized, 0);
        drop(h.frames);
    }
}
