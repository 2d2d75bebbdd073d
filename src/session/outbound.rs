use tokio::sync::mpsc;

use crate::{core::errors::SendError, protocol::ServerMessage};

/// Sending half of a connection. Control replies go on an unbounded lane the
/// writer always drains first; video frames share a one-slot lane so a slow
/// socket throttles the forwarding task instead of delaying replies.
#[derive(Debug, Clone)]
pub struct Outbound {
    control: mpsc::UnboundedSender<ServerMessage>,
    video: mpsc::Sender<ServerMessage>,
}

#[derive(Debug)]
pub struct OutboundLanes {
    control: mpsc::UnboundedReceiver<ServerMessage>,
    video: mpsc::Receiver<ServerMessage>,
}

pub fn outbound_channel() -> (Outbound, OutboundLanes) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (video_tx, video_rx) = mpsc::channel(1);
    (
        Outbound {
            control: control_tx,
            video: video_tx,
        },
        OutboundLanes {
            control: control_rx,
            video: video_rx,
        },
    )
}

impl Outbound {
    pub fn send(&self, message: ServerMessage) -> Result<(), SendError> {
        self.control.send(message).map_err(|_| SendError)
    }

    pub async fn send_video(&self, message: ServerMessage) -> Result<(), SendError> {
        self.video.send(message).await.map_err(|_| SendError)
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed() || self.video.is_closed()
    }
}

impl OutboundLanes {
    /// Next message for the socket, control lane first. `None` once every
    /// sender is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        tokio::select! {
            biased;
            Some(message) = self.control.recv() => Some(message),
            Some(message) = self.video.recv() => Some(message),
            else => None,
        }
    }

    #[cfg(test)]
    pub fn try_recv_video(&mut self) -> Option<ServerMessage> {
        self.video.try_recv().ok()
    }
}
