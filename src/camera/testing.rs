//! Scripted camera for exercising the stream pipeline without hardware.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use bytes::Bytes;

use super::traits::{CameraBackend, CaptureSettings};

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    releases: AtomicUsize,
    reads: AtomicUsize,
    failing_opens: AtomicUsize,
    read_delay_ms: AtomicU64,
    glitch_every_other_read: AtomicBool,
}

/// Handle kept by the test to observe and steer a [`FakeCamera`] after it
/// has been moved into the frame source.
#[derive(Clone, Default)]
pub struct CameraProbe(Arc<Counters>);

impl CameraProbe {
    pub fn opens(&self) -> usize {
        self.0.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.0.releases.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.0.reads.load(Ordering::SeqCst)
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.0.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.0
            .read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn glitch_every_other_read(&self, enabled: bool) {
        self.0
            .glitch_every_other_read
            .store(enabled, Ordering::SeqCst);
    }
}

pub struct FakeCamera {
    probe: CameraProbe,
    open: bool,
    sequence: u64,
}

impl FakeCamera {
    pub fn new() -> (Self, CameraProbe) {
        let probe = CameraProbe::default();
        let camera = Self {
            probe: probe.clone(),
            open: false,
            sequence: 0,
        };
        (camera, probe)
    }

    /// Settings fast enough that tests see frames within a few milliseconds.
    pub fn settings() -> CaptureSettings {
        CaptureSettings {
            width: 32,
            height: 24,
            target_fps: 200,
            jpeg_quality: 50,
        }
    }
}

impl CameraBackend for FakeCamera {
    fn configure(&mut self, _settings: &CaptureSettings) -> Result<()> {
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        let counters = &self.probe.0;
        counters.opens.fetch_add(1, Ordering::SeqCst);
        let failing = counters.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            counters.failing_opens.store(failing - 1, Ordering::SeqCst);
            bail!("no camera attached");
        }
        self.open = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Bytes> {
        if !self.open {
            bail!("camera is not open");
        }
        let counters = &self.probe.0;
        let reads = counters.reads.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = counters.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if counters.glitch_every_other_read.load(Ordering::SeqCst) && reads % 2 == 0 {
            bail!("simulated read glitch");
        }

        self.sequence += 1;
        Ok(Bytes::from(format!("frame-{}", self.sequence)))
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.probe.0.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}
