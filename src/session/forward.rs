use std::{sync::Arc, time::Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{outbound::Outbound, registry::SessionId};
use crate::{
    protocol::ServerMessage,
    stream::{FpsMeter, FrameSubscriber},
};

/// Relays frames from the shared channel to one connection until cancelled
/// or the connection stops accepting writes. At most one frame wait is
/// abandoned on cancellation.
pub async fn forward_frames(
    session_id: SessionId,
    mut frames: FrameSubscriber,
    outbound: Outbound,
    fps: Arc<FpsMeter>,
    cancel: CancellationToken,
) {
    let mut forwarded = 0_u64;
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = frames.next() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let rate = fps.tick(Instant::now());
        if outbound.is_closed() {
            debug!(session_id = %session_id, "connection no longer writable");
            break;
        }

        let message = ServerMessage::video_frame(&frame, rate);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = outbound.send_video(message) => {
                if let Err(err) = sent {
                    warn!(session_id = %session_id, "video send failed: {err}");
                    break;
                }
            }
        }
        forwarded += 1;
    }

    debug!(session_id = %session_id, frames = forwarded, "video forwarding ended");
}
