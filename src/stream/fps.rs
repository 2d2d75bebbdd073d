use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

const WINDOW: Duration = Duration::from_secs(1);

struct Window {
    started: Instant,
    frames: u32,
}

/// Rolling frames-per-second over one-second windows.
///
/// One meter is shared by every forwarding task, so the figure counts frames
/// delivered to all viewers together and is attached to whichever frame
/// closes the window.
pub struct FpsMeter {
    window: Mutex<Window>,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(started: Instant) -> Self {
        Self {
            window: Mutex::new(Window { started, frames: 0 }),
        }
    }

    /// Counts one delivered frame. Returns the rate, rounded to one decimal,
    /// at most once per window.
    pub fn tick(&self, now: Instant) -> Option<f64> {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.frames += 1;

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed < WINDOW {
            return None;
        }

        let fps = f64::from(window.frames) / elapsed.as_secs_f64();
        window.frames = 0;
        window.started = now;
        Some((fps * 10.0).round() / 10.0)
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}
