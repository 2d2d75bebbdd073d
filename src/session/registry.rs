use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use serde::Serialize;
use tokio::sync::Mutex;

/// Stable identifier of one connection, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
struct SessionEntry {
    peer: Option<SocketAddr>,
    connected_at: Instant,
    video_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub peer: Option<SocketAddr>,
    pub connected_secs: u64,
    pub video_active: bool,
}

/// Process-wide table of live sessions.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Adds a session and returns the number of live sessions.
    pub async fn register(&self, id: SessionId, peer: Option<SocketAddr>) -> usize {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            id,
            SessionEntry {
                peer,
                connected_at: Instant::now(),
                video_active: false,
            },
        );
        sessions.len()
    }

    /// Removes a session and returns how many remain, or `None` if it was
    /// not registered.
    pub async fn deregister(&self, id: SessionId) -> Option<usize> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&id)?;
        Some(sessions.len())
    }

    pub async fn set_video_active(&self, id: SessionId, active: bool) {
        if let Some(entry) = self.sessions.lock().await.get_mut(&id) {
            entry.video_active = active;
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock().await;
        let mut summaries: Vec<_> = sessions
            .iter()
            .map(|(id, entry)| SessionSummary {
                id: *id,
                peer: entry.peer,
                connected_secs: entry.connected_at.elapsed().as_secs(),
                video_active: entry.video_active,
            })
            .collect();
        summaries.sort_by_key(|summary| summary.id);
        summaries
    }
}
