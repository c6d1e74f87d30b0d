use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Canonical two-valued state of the deadbolt.
///
/// On the wire the variants are spelled `"lock"` / `"unlock"` so that a
/// [`StatePayload`] serialises to `{"state":"lock"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockState {
    #[default]
    #[serde(rename = "lock")]
    Locked,
    #[serde(rename = "unlock")]
    Unlocked,
}

impl LockState {
    /// Wire spelling used in topic payloads.
    pub fn as_wire(&self) -> &'static str {
        match self {
            LockState::Locked => "lock",
            LockState::Unlocked => "unlock",
        }
    }

    /// Parse the wire spelling. Returns `None` for anything other than
    /// `"lock"` or `"unlock"`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "lock" => Some(LockState::Locked),
            "unlock" => Some(LockState::Unlocked),
            _ => None,
        }
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockState::Locked => write!(f, "LOCKED"),
            LockState::Unlocked => write!(f, "UNLOCKED"),
        }
    }
}

/// Payload carried on both `cmd/lock/state` and `dt/lock/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub state: LockState,
}

/// An encoded image buffer captured from the camera.
///
/// Owned by whichever queue slot holds it and discarded once the
/// authorization decision has been made.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image bytes (PNG / JPEG).
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    /// Monotonic per-camera counter, for log correlation.
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self {
            data,
            captured_at: Utc::now(),
            sequence,
        }
    }
}

/// A raw message handed over by the broker's subscription callback.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    /// Slash-delimited topic path, e.g. `cmd/lock/state`.
    pub topic: String,
    /// Undecoded payload bytes.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload rendered for log lines; invalid UTF-8 is replaced.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Messaging quality of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

/// Workspace-wide error type covering actuation, capture, routing and
/// transport failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LatchError {
    #[error("Unsupported command on {topic}: {details}")]
    UnsupportedCommand { topic: String, details: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Vision service error: {0}")]
    Vision(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Server rejected resubscribe to topic: {0}")]
    ResubscribeRejected(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LatchError {
    /// `true` for errors that must terminate the process: actuation faults,
    /// camera loss and rejected resubscriptions.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LatchError::HardwareFault { .. }
                | LatchError::CameraUnavailable(_)
                | LatchError::ResubscribeRejected(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_state_defaults_to_locked() {
        assert_eq!(LockState::default(), LockState::Locked);
    }

    #[test]
    fn state_payload_uses_wire_spelling() {
        let json = serde_json::to_string(&StatePayload {
            state: LockState::Unlocked,
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"unlock"}"#);

        let back: StatePayload = serde_json::from_str(r#"{"state":"lock"}"#).unwrap();
        assert_eq!(back.state, LockState::Locked);
    }

    #[test]
    fn state_payload_rejects_unknown_state() {
        let result = serde_json::from_str::<StatePayload>(r#"{"state":"toggle"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn from_wire_matches_as_wire() {
        for state in [LockState::Locked, LockState::Unlocked] {
            assert_eq!(LockState::from_wire(state.as_wire()), Some(state));
        }
        assert_eq!(LockState::from_wire("LOCKED"), None);
    }

    #[test]
    fn inbound_message_payload_lossy() {
        let msg = InboundMessage::new("cmd/lock/state", vec![b'{', 0xff, b'}']);
        assert_eq!(msg.topic, "cmd/lock/state");
        assert!(msg.payload_lossy().starts_with('{'));
    }

    #[test]
    fn fatal_classification() {
        assert!(
            LatchError::HardwareFault {
                component: "deadbolt".into(),
                details: "jammed".into(),
            }
            .is_fatal()
        );
        assert!(LatchError::CameraUnavailable("no device".into()).is_fatal());
        assert!(LatchError::ResubscribeRejected("cmd/lock/state".into()).is_fatal());
        assert!(
            !LatchError::UnsupportedCommand {
                topic: "bogus/x".into(),
                details: "unknown root".into(),
            }
            .is_fatal()
        );
        assert!(!LatchError::Vision("credentials".into()).is_fatal());
    }

    #[test]
    fn error_display() {
        let err = LatchError::HardwareFault {
            component: "deadbolt".to_string(),
            details: "motor stalled".to_string(),
        };
        assert!(err.to_string().contains("deadbolt"));
        let err = LatchError::ResubscribeRejected("cmd/lock/state".into());
        assert!(err.to_string().contains("cmd/lock/state"));
    }
}
