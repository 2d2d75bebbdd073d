use std::sync::Arc;

use tracing::info;

use crate::{
    camera::traits::CameraBackend,
    config::AppConfig,
    core::state::ServerStatus,
    robot::RobotController,
    session::registry::ConnectionRegistry,
    stream::{FpsMeter, FrameSource, StreamSupervisor},
};

/// Everything sessions share. Hardware is owned here once and handed to
/// every connection by reference.
pub struct AppState {
    pub config: AppConfig,
    pub robot: RobotController,
    pub stream: StreamSupervisor,
    pub registry: ConnectionRegistry,
    pub fps: Arc<FpsMeter>,
}

impl AppState {
    pub fn new(config: AppConfig, robot: RobotController, camera: Box<dyn CameraBackend>) -> Self {
        let source = FrameSource::new(camera, config.capture_settings());
        Self {
            config,
            robot,
            stream: StreamSupervisor::new(source),
            registry: ConnectionRegistry::new(),
            fps: Arc::new(FpsMeter::new()),
        }
    }

    pub async fn status(&self) -> ServerStatus {
        ServerStatus {
            sessions: self.registry.len().await,
            viewers: self.stream.viewer_count().await,
            camera: self.stream.source().state(),
            robot: self.robot.get_state(),
        }
    }

    /// Stops the camera and hands the motor pins back.
    pub async fn shutdown(&self) {
        self.stream.shutdown().await;
        self.robot.cleanup();
        info!("{} shut down", self.config.app_name);
    }

    #[cfg(test)]
    pub fn for_tests(camera: crate::camera::testing::FakeCamera) -> Arc<Self> {
        use crate::camera::testing::FakeCamera;

        let config = AppConfig {
            frame_width: FakeCamera::settings().width,
            frame_height: FakeCamera::settings().height,
            target_fps: FakeCamera::settings().target_fps,
            jpeg_quality: FakeCamera::settings().jpeg_quality,
            ..AppConfig::default()
        };
        let robot = RobotController::simulated(config.left_motor_pins, config.right_motor_pins);
        Arc::new(Self::new(config, robot, Box::new(camera)))
    }
}
