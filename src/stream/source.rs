use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tokio::{
    sync::{Mutex as AsyncMutex, watch},
    task::JoinHandle,
    time::{Duration, Instant, sleep_until, timeout_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    channel::{FrameSubscriber, LatestFrameChannel},
    frame::Frame,
};
use crate::{
    camera::traits::{CameraBackend, CaptureSettings},
    core::{errors::CameraError, state::SourceState},
};

/// Consecutive capture failures after which the loop logs at error level.
const FAILURE_ALERT_THRESHOLD: u32 = 30;

/// How long `stop` waits on the capture loop and the release before it
/// hands the release to the background.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

type SharedCamera = Arc<Mutex<Box<dyn CameraBackend>>>;

struct CaptureLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the camera and the capture loop that feeds [`LatestFrameChannel`].
///
/// Every camera call (open, read, release) runs on the blocking pool behind
/// one mutex, so device calls never overlap and never stall the scheduler.
pub struct FrameSource {
    camera: SharedCamera,
    settings: CaptureSettings,
    channel: Arc<LatestFrameChannel>,
    state: watch::Sender<SourceState>,
    capture: AsyncMutex<Option<CaptureLoop>>,
    /// Release still waiting on a wedged device call. `start` joins it first.
    draining: AsyncMutex<Option<JoinHandle<()>>>,
    stop_timeout: Duration,
}

impl FrameSource {
    pub fn new(camera: Box<dyn CameraBackend>, settings: CaptureSettings) -> Self {
        let (state, _) = watch::channel(SourceState::Idle);
        Self {
            camera: Arc::new(Mutex::new(camera)),
            settings,
            channel: Arc::new(LatestFrameChannel::new()),
            state,
            capture: AsyncMutex::new(None),
            draining: AsyncMutex::new(None),
            stop_timeout: STOP_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Opens the camera and starts the capture loop. A no-op while active.
    /// On failure the source stays in `Failed` until the next call retries.
    pub async fn start(&self) -> Result<(), CameraError> {
        let mut capture = self.capture.lock().await;
        if capture.is_some() {
            return Ok(());
        }
        let pending = self.draining.lock().await.take();
        if let Some(pending) = pending {
            debug!("waiting for previous camera release");
            if let Err(err) = pending.await {
                warn!("background camera release failed: {err}");
            }
        }

        self.state.send_replace(SourceState::Initializing);
        let settings = self.settings.clone();
        let opened = run_blocking(&self.camera, move |camera| {
            let result = camera.configure(&settings).and_then(|()| camera.open());
            if result.is_err() {
                camera.release();
            }
            result
        })
        .await;

        if let Err(err) = opened {
            let reason = format!("{err:#}");
            error!(error = %reason, "camera initialization failed");
            self.state.send_replace(SourceState::Failed(reason.clone()));
            return Err(CameraError::Open(reason));
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(capture_frames(
            self.camera.clone(),
            self.channel.clone(),
            self.settings.frame_interval(),
            cancel.clone(),
        ));
        *capture = Some(CaptureLoop { cancel, handle });
        self.state.send_replace(SourceState::Active);
        info!(
            width = self.settings.width,
            height = self.settings.height,
            fps = self.settings.target_fps,
            "frame source started"
        );
        Ok(())
    }

    /// Stops the capture loop, waits for it to exit, then releases the
    /// camera. Idempotent.
    ///
    /// Waits at most `stop_timeout`. A device call still blocked by then
    /// keeps running, and the release follows it in the background.
    pub async fn stop(&self) {
        let mut capture = self.capture.lock().await;
        let Some(active) = capture.take() else {
            if matches!(*self.state.borrow(), SourceState::Failed(_)) {
                self.state.send_replace(SourceState::Idle);
            }
            return;
        };

        let deadline = Instant::now() + self.stop_timeout;
        active.cancel.cancel();
        let mut handle = active.handle;
        match timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("capture loop ended abnormally: {err}"),
            Err(_) => {
                warn!("capture loop did not stop in time, aborting it");
                handle.abort();
            }
        }

        let camera = Arc::clone(&self.camera);
        let mut release = tokio::task::spawn_blocking(move || {
            camera.lock().unwrap_or_else(PoisonError::into_inner).release();
        });
        match timeout_at(deadline, &mut release).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("camera release failed: {err}"),
            Err(_) => {
                error!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "camera is still busy, releasing it in the background"
                );
                *self.draining.lock().await = Some(release);
            }
        }

        self.state.send_replace(SourceState::Stopped);
        self.channel.clear();
        self.state.send_replace(SourceState::Idle);
        info!("frame source stopped");
    }

    pub fn subscribe(&self) -> FrameSubscriber {
        self.channel.subscribe()
    }

    pub fn state(&self) -> SourceState {
        self.state.borrow().clone()
    }

    #[cfg(test)]
    pub fn watch_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }
}

/// Runs one camera call on the blocking pool while holding the camera lock.
async fn run_blocking<T, F>(camera: &SharedCamera, op: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn CameraBackend) -> anyhow::Result<T> + Send + 'static,
{
    let camera = Arc::clone(camera);
    tokio::task::spawn_blocking(move || {
        let mut guard = camera.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut **guard)
    })
    .await
    .context("camera worker panicked")?
}

async fn capture_frames(
    camera: SharedCamera,
    channel: Arc<LatestFrameChannel>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut sequence = 0_u64;
    let mut consecutive_failures = 0_u32;
    let mut next_due = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep_until(next_due) => {}
        }
        next_due = Instant::now() + interval;

        match run_blocking(&camera, |camera| camera.read_frame()).await {
            Ok(payload) => {
                sequence += 1;
                consecutive_failures = 0;
                channel.publish(Frame::new(payload, sequence));
            }
            Err(err) => {
                consecutive_failures += 1;
                let err = CameraError::Capture(format!("{err:#}"));
                if consecutive_failures == FAILURE_ALERT_THRESHOLD {
                    error!(failures = consecutive_failures, "{err}; camera keeps failing");
                } else {
                    warn!(failures = consecutive_failures, "{err}; frame dropped");
                }
            }
        }

        tokio::task::yield_now().await;
    }

    debug!(frames = sequence, "capture loop exited");
}
