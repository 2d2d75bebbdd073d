use std::collections::BTreeSet;

use tokio::sync::Mutex;
use tracing::info;

use super::{channel::FrameSubscriber, source::FrameSource};
use crate::{core::errors::CameraError, session::registry::SessionId};

/// Reference-counts viewers of the shared frame source: the first viewer
/// starts it, the last one to leave stops it.
///
/// The viewer set and the start/stop call form one critical section, so a
/// viewer arriving while the last one leaves cannot interleave a stop after
/// a start.
pub struct StreamSupervisor {
    source: FrameSource,
    viewers: Mutex<BTreeSet<SessionId>>,
}

impl StreamSupervisor {
    pub fn new(source: FrameSource) -> Self {
        Self {
            source,
            viewers: Mutex::new(BTreeSet::new()),
        }
    }

    /// Attaches a viewer and returns its frame subscription, starting the
    /// source for the first viewer. On a camera failure the viewer is not
    /// registered.
    pub async fn acquire(&self, viewer: SessionId) -> Result<FrameSubscriber, CameraError> {
        let mut viewers = self.viewers.lock().await;
        if viewers.is_empty() {
            self.source.start().await?;
        }

        let frames = self.source.subscribe();
        if viewers.insert(viewer) {
            info!(session_id = %viewer, viewers = viewers.len(), "viewer attached");
        }
        Ok(frames)
    }

    /// Detaches a viewer, stopping the source once nobody is watching.
    /// Returns whether the viewer was attached.
    pub async fn release(&self, viewer: SessionId) -> bool {
        let mut viewers = self.viewers.lock().await;
        if !viewers.remove(&viewer) {
            return false;
        }

        info!(session_id = %viewer, viewers = viewers.len(), "viewer detached");
        if viewers.is_empty() {
            self.source.stop().await;
        }
        true
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.lock().await.len()
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Drops every viewer and stops the source.
    pub async fn shutdown(&self) {
        let mut viewers = self.viewers.lock().await;
        viewers.clear();
        self.source.stop().await;
    }
}
