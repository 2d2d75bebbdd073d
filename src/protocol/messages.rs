use std::time::SystemTime;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    core::errors::ProtocolError,
    robot::{DriveCommand, Power, RobotState},
    stream::frame::{Frame, unix_seconds},
};

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct MovementPayload {
    command: String,
    #[serde(default)]
    power: Option<Value>,
}

#[derive(Deserialize)]
struct PowerPayload {
    #[serde(default)]
    power: Option<Value>,
}

/// Drive request as received. Unknown commands and non-numeric power are
/// kept so the reply can echo what was ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub command: String,
    /// `None` when the client sent a power that is not a number.
    pub power: Option<Power>,
}

impl MovementRequest {
    pub fn drive(&self) -> Option<DriveCommand> {
        self.command.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    MovementCommand(MovementRequest),
    PowerUpdate { power: Power },
    StartVideo,
    StopVideo,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|err| ProtocolError::Malformed(err.to_string()))?;

        match envelope.kind.as_str() {
            "movement_command" => {
                let payload: MovementPayload = decode_payload("movement_command", envelope.data)?;
                Ok(ClientMessage::MovementCommand(MovementRequest {
                    command: payload.command,
                    power: match payload.power {
                        None => Some(Power::default()),
                        Some(raw) => raw.as_f64().map(Power::clamped),
                    },
                }))
            }
            "power_update" => {
                let payload: PowerPayload = decode_payload("power_update", envelope.data)?;
                let power = match payload.power {
                    None => Power::default(),
                    Some(raw) => raw.as_f64().map(Power::clamped).ok_or_else(|| {
                        ProtocolError::InvalidPayload {
                            kind: "power_update",
                            reason: format!("power must be a number, got {raw}"),
                        }
                    })?,
                };
                Ok(ClientMessage::PowerUpdate { power })
            }
            "start_video" => Ok(ClientMessage::StartVideo),
            "stop_video" => Ok(ClientMessage::StopVideo),
            other => Err(ProtocolError::UnknownType(other.to_owned())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::MovementCommand(_) => "movement_command",
            ClientMessage::PowerUpdate { .. } => "power_update",
            ClientMessage::StartVideo => "start_video",
            ClientMessage::StopVideo => "stop_video",
        }
    }
}

fn decode_payload<T: for<'de> Deserialize<'de>>(
    kind: &'static str,
    data: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|err| ProtocolError::InvalidPayload {
        kind,
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Executed,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub status: CommandStatus,
    pub command: String,
    pub power: Option<Power>,
    pub state: RobotState,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoFrame {
    /// Base64 JPEG.
    pub frame: String,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionStatus {
        status: &'static str,
    },
    CommandResponse(CommandResponse),
    VideoFrame(VideoFrame),
    Error {
        message: String,
        request: Option<&'static str>,
    },
}

impl ServerMessage {
    pub fn connected() -> Self {
        ServerMessage::ConnectionStatus {
            status: "connected",
        }
    }

    pub fn command_response(
        status: CommandStatus,
        request: &MovementRequest,
        state: RobotState,
    ) -> Self {
        ServerMessage::CommandResponse(CommandResponse {
            status,
            command: request.command.clone(),
            power: request.power,
            state,
            timestamp: unix_seconds(SystemTime::now()),
        })
    }

    pub fn video_frame(frame: &Frame, fps: Option<f64>) -> Self {
        ServerMessage::VideoFrame(VideoFrame {
            frame: STANDARD.encode(&frame.payload),
            timestamp: frame.timestamp(),
            fps,
        })
    }

    pub fn error(message: impl Into<String>, request: Option<&'static str>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request,
        }
    }
}
