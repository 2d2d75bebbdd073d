use std::{
    io::Read,
    path::Path,
    process::{Child, ChildStdout, Command, Stdio},
};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use tracing::{info, warn};

use super::{
    jpeg::JpegFrameAccumulator,
    traits::{CameraBackend, CaptureSettings},
};

const READ_CHUNK_BYTES: usize = 16 * 1024;

/// V4L2 capture through an `ffmpeg` child process that scales, rate-limits
/// and JPEG-encodes the device stream into MJPEG on its stdout.
#[derive(Debug)]
pub struct FfmpegBackend {
    device: String,
    input_format: String,
    settings: CaptureSettings,
    stream: Option<RunningStream>,
}

#[derive(Debug)]
struct RunningStream {
    child: Child,
    stdout: ChildStdout,
    frames: JpegFrameAccumulator,
    buffer: Vec<u8>,
}

impl FfmpegBackend {
    pub fn new(device: String, input_format: String) -> Self {
        Self {
            device,
            input_format,
            settings: CaptureSettings::default(),
            stream: None,
        }
    }

    fn stream_args(&self) -> Vec<String> {
        let CaptureSettings {
            width,
            height,
            target_fps,
            jpeg_quality,
        } = self.settings;

        let fps = target_fps.to_string();
        let size = format!("{width}x{height}");
        let scale = format!("scale={width}:{height}");
        let quality = qscale(jpeg_quality).to_string();

        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "v4l2",
            "-input_format",
            self.input_format.as_str(),
            "-framerate",
            fps.as_str(),
            "-video_size",
            size.as_str(),
            "-i",
            self.device.as_str(),
            "-vf",
            scale.as_str(),
            "-r",
            fps.as_str(),
            "-q:v",
            quality.as_str(),
            "-f",
            "mpjpeg",
            "-boundary_tag",
            "robolink",
            "pipe:1",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect()
    }
}

impl CameraBackend for FfmpegBackend {
    fn configure(&mut self, settings: &CaptureSettings) -> Result<()> {
        if self.stream.is_some() {
            bail!("release the camera before reconfiguring");
        }
        self.settings = settings.clone();
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if !Path::new(&self.device).exists() {
            bail!("camera device not found: {}", self.device);
        }

        let mut child = Command::new("ffmpeg")
            .args(self.stream_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to spawn ffmpeg capture process")?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            bail!("missing ffmpeg stdout pipe");
        };

        self.stream = Some(RunningStream {
            child,
            stdout,
            frames: JpegFrameAccumulator::new(),
            buffer: vec![0_u8; READ_CHUNK_BYTES],
        });

        // ffmpeg starts even when the device is busy; the first frame proves
        // the capture actually works.
        if let Err(err) = self.read_frame() {
            self.release();
            return Err(err.context(format!("camera {} produced no frames", self.device)));
        }

        info!(
            device = %self.device,
            width = self.settings.width,
            height = self.settings.height,
            fps = self.settings.target_fps,
            "ffmpeg capture opened"
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Bytes> {
        let stream = self.stream.as_mut().context("camera is not open")?;
        loop {
            let read = stream
                .stdout
                .read(&mut stream.buffer)
                .context("failed to read ffmpeg output")?;
            if read == 0 {
                bail!("ffmpeg capture stream ended");
            }
            if let Some(frame) = stream.frames.push_chunk(&stream.buffer[..read]) {
                return Ok(frame);
            }
        }
    }

    fn release(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        if let Err(err) = stream.child.kill() {
            warn!("failed to kill ffmpeg capture child: {err}");
        }
        if let Err(err) = stream.child.wait() {
            warn!("failed to wait ffmpeg capture child: {err}");
        }
        info!(device = %self.device, "ffmpeg capture released");
    }
}

impl Drop for FfmpegBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Maps a 1-100 JPEG quality onto ffmpeg's 2-31 qscale (lower is better).
fn qscale(quality: u8) -> u8 {
    let quality = u32::from(quality.clamp(1, 100));
    (2 + (100 - quality) * 29 / 99) as u8
}
