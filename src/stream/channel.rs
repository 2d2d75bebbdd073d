use tokio::sync::watch;

use super::frame::Frame;

/// Single-slot, freshest-wins frame channel.
///
/// Publishing never blocks and never queues: a frame nobody has read yet is
/// simply replaced. Every viewer holds its own [`FrameSubscriber`], so a slow
/// viewer skips frames instead of holding the others back.
#[derive(Debug)]
pub struct LatestFrameChannel {
    slot: watch::Sender<Option<Frame>>,
}

impl LatestFrameChannel {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    pub fn publish(&self, frame: Frame) {
        self.slot.send_replace(Some(frame));
    }

    /// Empties the slot so a restarted source never replays an old frame.
    pub fn clear(&self) {
        self.slot.send_replace(None);
    }

    /// New subscribers only see frames published after this call.
    pub fn subscribe(&self) -> FrameSubscriber {
        FrameSubscriber {
            slot: self.slot.subscribe(),
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.slot.receiver_count()
    }
}

impl Default for LatestFrameChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct FrameSubscriber {
    slot: watch::Receiver<Option<Frame>>,
}

impl FrameSubscriber {
    /// Waits for a frame this subscriber has not seen yet and takes it.
    /// Returns `None` once the channel is gone.
    pub async fn next(&mut self) -> Option<Frame> {
        loop {
            self.slot.changed().await.ok()?;
            if let Some(frame) = self.slot.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}
