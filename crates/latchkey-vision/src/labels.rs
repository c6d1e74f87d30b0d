//! Presence scoring from detected image labels.
//!
//! A label detector reports names with a confidence in percent.  The
//! presence score is
//!
//! ```text
//! presence = (1 - counterfeit) * human * face
//! ```
//!
//! where `human` and `face` are the `Human` / `Face` confidences scaled to
//! `[0, 1]` ([`ABSENT_LABEL_SCORE`] when the label is missing) and
//! `counterfeit` is `1` when any screen-like label ([`COUNTERFEIT_LABELS`])
//! exceeds [`COUNTERFEIT_CONFIDENCE`] percent, which catches a photo held up
//! on a phone or monitor.

use serde::{Deserialize, Serialize};

/// Score used for `Human` / `Face` when the detector did not report them.
pub const ABSENT_LABEL_SCORE: f32 = 0.001;

/// Labels that indicate the face is shown on a device.
pub const COUNTERFEIT_LABELS: [&str; 3] = ["Electronics", "Monitor", "Phone"];

/// Percent confidence above which a counterfeit label vetoes presence.
pub const COUNTERFEIT_CONFIDENCE: f32 = 50.0;

/// One detected label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    /// Percent, `0.0..=100.0`.
    pub confidence: f32,
}

impl Label {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

fn score(labels: &[Label], name: &str) -> f32 {
    labels
        .iter()
        .find(|l| l.name == name)
        .map(|l| l.confidence / 100.0)
        .unwrap_or(ABSENT_LABEL_SCORE)
}

/// Combine `labels` into a presence confidence in `[0, 1]`.
pub fn presence_confidence(labels: &[Label]) -> f32 {
    let counterfeit = labels.iter().any(|l| {
        COUNTERFEIT_LABELS.contains(&l.name.as_str()) && l.confidence > COUNTERFEIT_CONFIDENCE
    });
    if counterfeit {
        return 0.0;
    }
    (score(labels, "Human") * score(labels, "Face")).clamp(0.0, 1.0)
}
