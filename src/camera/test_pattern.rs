use anyhow::{Context, Result, bail};
use bytes::Bytes;
use image::{ExtendedColorType, codecs::jpeg::JpegEncoder};

use super::traits::{CameraBackend, CaptureSettings};

const BAR_WIDTH: u32 = 24;

/// Synthetic camera: a horizontal gradient with a bar sweeping across it,
/// JPEG-encoded at the configured quality. Lets the server run on machines
/// without a capture device.
#[derive(Debug, Default)]
pub struct TestPatternBackend {
    settings: CaptureSettings,
    open: bool,
    frame_index: u32,
}

impl TestPatternBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn render(&self) -> Vec<u8> {
        let CaptureSettings { width, height, .. } = self.settings;
        let bar_x = self.frame_index.wrapping_mul(4) % width.max(1);
        let mut rgb = Vec::with_capacity(rgb_len(width, height));

        for y in 0..height {
            for x in 0..width {
                if x >= bar_x && x < bar_x + BAR_WIDTH {
                    rgb.extend_from_slice(&[240, 240, 240]);
                } else {
                    let r = (x * 255 / width.max(1)) as u8;
                    let g = (y * 255 / height.max(1)) as u8;
                    rgb.extend_from_slice(&[r, g, 96]);
                }
            }
        }
        rgb
    }
}

/// Byte length of a packed RGB frame, computed in `usize` so large
/// geometries cannot wrap in `u32`.
fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

impl CameraBackend for TestPatternBackend {
    fn configure(&mut self, settings: &CaptureSettings) -> Result<()> {
        if settings.width == 0 || settings.height == 0 {
            bail!(
                "invalid test pattern size {}x{}",
                settings.width,
                settings.height
            );
        }
        self.settings = settings.clone();
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        self.frame_index = 0;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Bytes> {
        if !self.open {
            bail!("test pattern is not open");
        }

        let rgb = self.render();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.settings.jpeg_quality.clamp(1, 100))
            .encode(
                &rgb,
                self.settings.width,
                self.settings.height,
                ExtendedColorType::Rgb8,
            )
            .context("failed to encode test pattern frame")?;

        self.frame_index = self.frame_index.wrapping_add(1);
        Ok(Bytes::from(jpeg))
    }

    fn release(&mut self) {
        self.open = false;
    }
}
