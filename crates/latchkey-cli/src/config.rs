//! Configuration Vault – reads/writes `~/.latchkey/config.toml`.
//!
//! Every field carries a serde default, so a missing file, a missing section
//! or a missing key all fall back to the values below.

use latchkey_runtime::PipelineConfig;
use latchkey_types::LatchError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Loopback,
    Rosbridge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisionKind {
    #[default]
    Scripted,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    #[default]
    Sim,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    #[default]
    Sim,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub kind: BrokerKind,
    /// rosbridge WebSocket URL.
    pub url: String,
    pub client_id: String,
    pub reconnect_delay_ms: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            url: "ws://localhost:9090".to_string(),
            client_id: "latchkey".to_string(),
            reconnect_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub submit_interval_ms: u64,
    pub frame_period_ms: u64,
    pub enqueue_timeout_ms: u64,
    pub dequeue_timeout_ms: u64,
    pub frame_queue_capacity: usize,
    /// `0` means unbounded.
    pub command_queue_capacity: usize,
    pub max_read_failures: u32,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            submit_interval_ms: 2_000,
            frame_period_ms: 100,
            enqueue_timeout_ms: 1_000,
            dequeue_timeout_ms: 1_000,
            frame_queue_capacity: 4,
            command_queue_capacity: 256,
            max_read_failures: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationSection {
    pub presence_threshold: f32,
    pub similarity_threshold: f32,
    pub reference_image: PathBuf,
}

impl Default for AuthorizationSection {
    fn default() -> Self {
        Self {
            presence_threshold: 0.75,
            similarity_threshold: 99.5,
            reference_image: PathBuf::from("reference.jpg"),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSection {
    pub kind: VisionKind,
    pub endpoint: String,
    /// Bearer token for the HTTP vision service (stored as plain text; the
    /// file is written owner-only).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub timeout_ms: u64,
    pub scripted_confidence: f32,
    pub scripted_match: bool,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            kind: VisionKind::default(),
            endpoint: "http://localhost:8000".to_string(),
            api_key: String::new(),
            timeout_ms: 5_000,
            scripted_confidence: 0.0,
            scripted_match: false,
        }
    }
}

impl std::fmt::Debug for VisionSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionSection")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("timeout_ms", &self.timeout_ms)
            .field("scripted_confidence", &self.scripted_confidence)
            .field("scripted_match", &self.scripted_match)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSection {
    pub kind: CameraKind,
    pub id: String,
    /// Used by the `directory` camera.
    pub image_dir: PathBuf,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            kind: CameraKind::default(),
            id: "door_cam".to_string(),
            image_dir: PathBuf::from("frames"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSection {
    pub kind: LockKind,
    pub id: String,
    pub actuation_delay_ms: u64,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            kind: LockKind::default(),
            id: "front_door".to_string(),
            actuation_delay_ms: 0,
        }
    }
}

/// Persisted configuration stored in `~/.latchkey/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerSection,
    pub pipeline: PipelineSection,
    pub authorization: AuthorizationSection,
    pub vision: VisionSection,
    pub camera: CameraSection,
    pub lock: LockSection,
}

impl Config {
    /// Timing and threshold settings for the supervisor.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let p = &self.pipeline;
        PipelineConfig {
            submit_interval: Duration::from_millis(p.submit_interval_ms),
            frame_period: Duration::from_millis(p.frame_period_ms),
            enqueue_timeout: Duration::from_millis(p.enqueue_timeout_ms),
            dequeue_timeout: Duration::from_millis(p.dequeue_timeout_ms),
            frame_queue_capacity: p.frame_queue_capacity,
            command_queue_capacity: p.command_queue_capacity,
            max_read_failures: p.max_read_failures,
            presence_threshold: self.authorization.presence_threshold,
            similarity_threshold: self.authorization.similarity_threshold,
            reference_image: self.authorization.reference_image.clone(),
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), LatchError> {
        let auth = &self.authorization;
        if !(0.0..=1.0).contains(&auth.presence_threshold) {
            return Err(LatchError::Config(format!(
                "authorization.presence_threshold must be within [0, 1], got {}",
                auth.presence_threshold
            )));
        }
        if !(0.0..=100.0).contains(&auth.similarity_threshold) {
            return Err(LatchError::Config(format!(
                "authorization.similarity_threshold must be within [0, 100], got {}",
                auth.similarity_threshold
            )));
        }
        if self.pipeline.submit_interval_ms == 0 {
            return Err(LatchError::Config(
                "pipeline.submit_interval_ms must be positive".to_string(),
            ));
        }
        if self.pipeline.frame_period_ms == 0 {
            return Err(LatchError::Config(
                "pipeline.frame_period_ms must be positive".to_string(),
            ));
        }
        if self.pipeline.dequeue_timeout_ms == 0 {
            return Err(LatchError::Config(
                "pipeline.dequeue_timeout_ms must be positive".to_string(),
            ));
        }
        if self.pipeline.frame_queue_capacity == 0 {
            return Err(LatchError::Config(
                "pipeline.frame_queue_capacity must be positive".to_string(),
            ));
        }
        if self.pipeline.max_read_failures == 0 {
            return Err(LatchError::Config(
                "pipeline.max_read_failures must be positive".to_string(),
            ));
        }
        if self.vision.kind == VisionKind::Http && self.vision.endpoint.trim().is_empty() {
            return Err(LatchError::Config(
                "vision.endpoint is required for the http vision service".to_string(),
            ));
        }
        if self.broker.kind == BrokerKind::Rosbridge && self.broker.url.trim().is_empty() {
            return Err(LatchError::Config(
                "broker.url is required for the rosbridge broker".to_string(),
            ));
        }
        Ok(())
    }
}

/// `$LATCHKEY_CONFIG`, or `~/.latchkey/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("LATCHKEY_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".latchkey").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, LatchError> {
    load_from(&config_path())
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, LatchError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        LatchError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| LatchError::Config(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Apply `LATCHKEY_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LATCHKEY_BROKER_URL` | `broker.url` |
/// | `LATCHKEY_VISION_ENDPOINT` | `vision.endpoint` |
/// | `LATCHKEY_VISION_API_KEY` | `vision.api_key` |
/// | `LATCHKEY_CAMERA_DIR` | `camera.image_dir` |
/// | `LATCHKEY_REFERENCE_IMAGE` | `authorization.reference_image` |
/// | `LATCHKEY_SUBMIT_INTERVAL_MS` | `pipeline.submit_interval_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("LATCHKEY_BROKER_URL") {
        cfg.broker.url = v;
    }
    if let Some(v) = lookup("LATCHKEY_VISION_ENDPOINT") {
        cfg.vision.endpoint = v;
    }
    if let Some(v) = lookup("LATCHKEY_VISION_API_KEY") {
        cfg.vision.api_key = v;
    }
    if let Some(v) = lookup("LATCHKEY_CAMERA_DIR") {
        cfg.camera.image_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("LATCHKEY_REFERENCE_IMAGE") {
        cfg.authorization.reference_image = PathBuf::from(v);
    }
    if let Some(v) = lookup("LATCHKEY_SUBMIT_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.pipeline.submit_interval_ms = ms;
    }
}

/// Save the config, creating its directory if necessary.
pub fn save(cfg: &Config) -> Result<(), LatchError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), LatchError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            LatchError::Config(format!("failed to create config directory: {e}"))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                LatchError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| LatchError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| LatchError::Config(format!("failed to write config at {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_design_values() {
        let cfg = Config::default();
        let p = cfg.pipeline_config();
        assert_eq!(p.submit_interval, Duration::from_secs(2));
        assert_eq!(p.enqueue_timeout, Duration::from_secs(1));
        assert_eq!(p.dequeue_timeout, Duration::from_secs(1));
        assert_eq!(p.presence_threshold, 0.75);
        assert_eq!(p.similarity_threshold, 99.5);
        assert_eq!(cfg.broker.kind, BrokerKind::Loopback);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [authorization]
            presence_threshold = 0.9

            [broker]
            kind = "rosbridge"
            url = "ws://door-hub:9090"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.authorization.presence_threshold, 0.9);
        assert_eq!(cfg.authorization.similarity_threshold, 99.5);
        assert_eq!(cfg.broker.kind, BrokerKind::Rosbridge);
        assert_eq!(cfg.broker.url, "ws://door-hub:9090");
        assert_eq!(cfg.broker.reconnect_delay_ms, 5_000);
        assert_eq!(cfg.pipeline, PipelineSection::default());
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[camera]\nkind = \"webcam\"\n").unwrap();
        assert!(matches!(load_from(&path), Err(LatchError::Config(_))));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut cfg = Config::default();
        cfg.vision.api_key = "vk-super-secret".to_string();
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("vk-super-secret"));
        assert!(debug_str.contains("<redacted>"));
        assert!(format!("{:?}", Config::default()).contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let mut cfg = Config::default();
        cfg.camera.kind = CameraKind::Directory;
        cfg.camera.image_dir = PathBuf::from("/var/lib/latchkey/frames");
        cfg.vision.kind = VisionKind::Http;
        cfg.vision.api_key = "vk-123".to_string();
        save_to(&cfg, &path).unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).unwrap().is_none());
    }

    #[test]
    fn config_path_points_to_latchkey_dir() {
        let p = config_path_for_home("/home/door");
        assert!(p.to_string_lossy().contains(".latchkey"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn env_overrides_replace_fields() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            overrides(&[
                ("LATCHKEY_BROKER_URL", "ws://hub:9090"),
                ("LATCHKEY_VISION_API_KEY", "vk-env"),
                ("LATCHKEY_CAMERA_DIR", "/tmp/frames"),
                ("LATCHKEY_REFERENCE_IMAGE", "/tmp/owner.jpg"),
                ("LATCHKEY_SUBMIT_INTERVAL_MS", "500"),
            ]),
        );
        assert_eq!(cfg.broker.url, "ws://hub:9090");
        assert_eq!(cfg.vision.api_key, "vk-env");
        assert_eq!(cfg.camera.image_dir, PathBuf::from("/tmp/frames"));
        assert_eq!(
            cfg.authorization.reference_image,
            PathBuf::from("/tmp/owner.jpg")
        );
        assert_eq!(cfg.pipeline.submit_interval_ms, 500);
    }

    #[test]
    fn invalid_numeric_override_is_ignored() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            overrides(&[("LATCHKEY_SUBMIT_INTERVAL_MS", "soon")]),
        );
        assert_eq!(cfg.pipeline.submit_interval_ms, 2_000);
    }

    #[test]
    fn validate_rejects_zero_poll_periods() {
        let mut cfg = Config::default();
        cfg.pipeline.frame_period_ms = 0;
        assert!(matches!(cfg.validate(), Err(LatchError::Config(m)) if m.contains("frame_period_ms")));

        let mut cfg = Config::default();
        cfg.pipeline.dequeue_timeout_ms = 0;
        assert!(matches!(cfg.validate(), Err(LatchError::Config(m)) if m.contains("dequeue_timeout_ms")));

        let mut cfg = Config::default();
        cfg.pipeline.enqueue_timeout_ms = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_thresholds() {
        let mut cfg = Config::default();
        cfg.authorization.presence_threshold = 1.5;
        assert!(matches!(cfg.validate(), Err(LatchError::Config(_))));

        let mut cfg = Config::default();
        cfg.authorization.similarity_threshold = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.pipeline.frame_queue_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.vision.kind = VisionKind::Http;
        cfg.vision.endpoint = "  ".to_string();
        assert!(cfg.validate().is_err());
    }
}
