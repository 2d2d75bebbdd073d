mod app_state;
mod camera;
mod config;
mod core;
mod protocol;
mod robot;
mod session;
mod stream;
mod web;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use app_state::AppState;
use camera::{
    ffmpeg_backend::FfmpegBackend, test_pattern::TestPatternBackend, traits::CameraBackend,
};
use config::{AppConfig, CameraBackendKind};
use robot::RobotController;
use tracing::{info, warn};
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env()?;

    tokio::fs::create_dir_all(&config.log_dir)
        .await
        .with_context(|| format!("cannot create log dir {}", config.log_dir.display()))?;
    let file_appender = rolling::daily(&config.log_dir, "robolink.log");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    for note in &config.fallbacks {
        warn!("{note}");
    }

    tokio::fs::create_dir_all(&config.static_dir).await?;

    let camera: Box<dyn CameraBackend> = match config.camera_backend {
        CameraBackendKind::Ffmpeg => Box::new(FfmpegBackend::new(
            config.camera_device.clone(),
            config.camera_input_format.clone(),
        )),
        CameraBackendKind::TestPattern => Box::new(TestPatternBackend::new()),
    };
    let robot = RobotController::simulated(config.left_motor_pins, config.right_motor_pins);
    info!(
        left = %config.left_motor_pins,
        right = %config.right_motor_pins,
        camera = %config.camera_backend,
        device = %config.camera_device,
        "hardware configured"
    );

    let state = Arc::new(AppState::new(config.clone(), robot, camera));
    let app = web::routes::build_router(state.clone());

    info!("{} listening on {}", config.app_name, config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => warn!("cannot listen for ctrl-c: {err}"),
    }
}
