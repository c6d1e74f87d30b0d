//! Scripted vision service for headless runs and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use latchkey_types::LatchError;

use crate::service::VisionService;

/// Shared call counters, readable after the service has been moved into a
/// stage.
#[derive(Debug, Clone, Default)]
pub struct VisionCalls {
    presence: Arc<AtomicUsize>,
    compare: Arc<AtomicUsize>,
}

impl VisionCalls {
    pub fn presence(&self) -> usize {
        self.presence.load(Ordering::SeqCst)
    }

    pub fn compare(&self) -> usize {
        self.compare.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.presence() + self.compare()
    }
}

/// Returns a fixed presence confidence and a fixed comparison result.
#[derive(Debug)]
pub struct ScriptedVision {
    confidence: f32,
    matched: bool,
    failing: bool,
    calls: VisionCalls,
}

impl ScriptedVision {
    pub fn new(confidence: f32, matched: bool) -> Self {
        Self {
            confidence,
            matched,
            failing: false,
            calls: VisionCalls::default(),
        }
    }

    /// Every call fails with [`LatchError::Vision`], as with bad credentials.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> VisionCalls {
        self.calls.clone()
    }
}

impl VisionService for ScriptedVision {
    fn detect_face_presence(&self, _image: &[u8]) -> Result<f32, LatchError> {
        self.calls.presence.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(LatchError::Vision("scripted credential failure".to_string()));
        }
        Ok(self.confidence)
    }

    fn compare_faces(
        &self,
        _source: &[u8],
        _reference: &[u8],
        _similarity_threshold: f32,
    ) -> Result<bool, LatchError> {
        self.calls.compare.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(LatchError::Vision("scripted credential failure".to_string()));
        }
        Ok(self.matched)
    }
}
