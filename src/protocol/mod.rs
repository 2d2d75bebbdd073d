//! JSON messages exchanged over the control WebSocket.

pub mod messages;

pub use messages::{ClientMessage, CommandStatus, MovementRequest, ServerMessage};
