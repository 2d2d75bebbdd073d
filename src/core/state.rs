use serde::Serialize;

use crate::robot::RobotState;

/// Lifecycle of the shared frame source. Only the stream supervisor drives
/// transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SourceState {
    Idle,
    Initializing,
    Active,
    Failed(String),
    Stopped,
}

impl SourceState {
    pub fn is_active(&self) -> bool {
        matches!(self, SourceState::Active)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub sessions: usize,
    pub viewers: usize,
    pub camera: SourceState,
    pub robot: RobotState,
}
