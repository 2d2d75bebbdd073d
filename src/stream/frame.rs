use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// One encoded camera frame. Cloning shares the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
    pub captured_at: SystemTime,
    pub sequence: u64,
}

impl Frame {
    pub fn new(payload: Bytes, sequence: u64) -> Self {
        Self {
            payload,
            captured_at: SystemTime::now(),
            sequence,
        }
    }

    /// Capture time as fractional UNIX seconds, the wire timestamp format.
    pub fn timestamp(&self) -> f64 {
        unix_seconds(self.captured_at)
    }
}

pub fn unix_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
