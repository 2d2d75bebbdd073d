use thiserror::Error;

/// Failures at the camera hardware boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    /// The device could not be opened or configured. The stream stays idle
    /// and a later start may retry.
    #[error("camera unavailable: {0}")]
    Open(String),
    /// A single capture or encode failed; the frame is dropped.
    #[error("frame capture failed: {0}")]
    Capture(String),
}

/// An inbound message the session could not act on. Reported back on the
/// same connection, which stays open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
    #[error("binary frames are not supported")]
    Binary,
}

/// The outbound side of a connection is gone.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("connection closed")]
pub struct SendError;
