use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;

/// Geometry, rate and encode quality of the captured stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub jpeg_quality: u8,
}

impl CaptureSettings {
    /// Minimum spacing between two captures.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(1)))
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 480,
            height: 360,
            target_fps: 60,
            jpeg_quality: 65,
        }
    }
}

/// Blocking camera boundary. Every call may block on the device, so callers
/// run them on a blocking worker and never on the async scheduler.
///
/// `configure` is applied before `open`; geometry is fixed once the device
/// is open.
pub trait CameraBackend: Send {
    fn configure(&mut self, settings: &CaptureSettings) -> Result<()>;
    fn open(&mut self) -> Result<()>;
    /// Captures, scales and encodes one frame, returning JPEG bytes.
    fn read_frame(&mut self) -> Result<Bytes>;
    fn release(&mut self);
}
