//! Builds the drivers, broker and vision client named by the config.

use std::sync::Arc;
use std::time::Duration;

use latchkey_hal::{Camera, DirectoryCamera, LockController, SimCamera, SimLock};
use latchkey_middleware::{Broker, LoopbackBroker, RosbridgeBroker};
use latchkey_vision::{HttpVisionService, ScriptedVision, VisionService};
use tracing::info;

use crate::config::{BrokerKind, CameraKind, Config, LockKind, VisionKind};

pub fn build_controller(cfg: &Config) -> LockController {
    match cfg.lock.kind {
        LockKind::Sim => {
            let device = SimLock::new(cfg.lock.id.clone())
                .with_delay(Duration::from_millis(cfg.lock.actuation_delay_ms));
            LockController::new(Box::new(device))
        }
    }
}

pub fn build_camera(cfg: &Config) -> Box<dyn Camera> {
    match cfg.camera.kind {
        CameraKind::Sim => Box::new(SimCamera::new(cfg.camera.id.clone())),
        CameraKind::Directory => Box::new(DirectoryCamera::new(
            cfg.camera.id.clone(),
            cfg.camera.image_dir.clone(),
        )),
    }
}

pub fn build_vision(cfg: &Config) -> Box<dyn VisionService> {
    let v = &cfg.vision;
    match v.kind {
        VisionKind::Scripted => Box::new(ScriptedVision::new(v.scripted_confidence, v.scripted_match)),
        VisionKind::Http => {
            let api_key = (!v.api_key.is_empty()).then(|| v.api_key.clone());
            Box::new(HttpVisionService::new(
                v.endpoint.clone(),
                api_key,
                Duration::from_millis(v.timeout_ms),
            ))
        }
    }
}

pub fn build_broker(cfg: &Config) -> Arc<dyn Broker> {
    let b = &cfg.broker;
    match b.kind {
        BrokerKind::Loopback => {
            info!(client_id = %b.client_id, "using in-process loopback broker");
            Arc::new(LoopbackBroker::new())
        }
        BrokerKind::Rosbridge => {
            info!(client_id = %b.client_id, url = %b.url, "using rosbridge broker");
            Arc::new(RosbridgeBroker::new(
                b.url.clone(),
                Duration::from_millis(b.reconnect_delay_ms),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_types::{LatchError, LockState};

    #[test]
    fn default_config_builds_simulated_stack() {
        let cfg = Config::default();
        let controller = build_controller(&cfg);
        assert_eq!(controller.current_state(), LockState::Locked);
        assert_eq!(controller.component(), "front_door");

        let mut camera = build_camera(&cfg);
        assert_eq!(camera.id(), "door_cam");
        camera.open().unwrap();
        assert!(!camera.read_frame().unwrap().data.is_empty());
        camera.release();

        let vision = build_vision(&cfg);
        assert_eq!(vision.detect_face_presence(b"frame").unwrap(), 0.0);
    }

    #[test]
    fn directory_camera_uses_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.camera.kind = CameraKind::Directory;
        cfg.camera.image_dir = dir.path().join("absent");
        let mut camera = build_camera(&cfg);
        assert!(matches!(camera.open(), Err(LatchError::CameraUnavailable(_))));
    }

    #[tokio::test]
    async fn loopback_broker_connects() {
        let broker = build_broker(&Config::default());
        broker.connect().await.unwrap();
        broker.disconnect().await.unwrap();
    }
}
