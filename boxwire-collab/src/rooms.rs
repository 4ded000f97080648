//! Room registry: which sessions are connected and which design each is in.
//!
//! Fan-out encodes an event once and queues the shared frame on every
//! member's bounded outbound queue. A full queue means a slow peer; the
//! event is dropped for that peer only and counted. Lost events are never
//! retried: the peer recovers by re-joining and receiving a fresh snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use boxwire_core::DesignId;

use crate::protocol::{PeerInfo, ProtocolError, ServerEvent, SessionId};
use crate::session::{Delivery, Frame, Session};

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_sessions: usize,
    pub active_rooms: usize,
}

/// Lock-free counters, read via [`RoomRegistry::stats`].
#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Outcome of registering a session in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Newly added to the room.
    Joined,
    /// Was already a member of this room.
    Rejoined,
    /// Unknown session (already disconnected).
    UnknownSession,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Session>,
    rooms: HashMap<DesignId, HashSet<SessionId>>,
}

/// Maps design ids to the sessions subscribed to them.
pub struct RoomRegistry {
    inner: RwLock<Registry>,
    stats: AtomicBroadcastStats,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Registry::default()),
            stats: AtomicBroadcastStats::default(),
        }
    }

    /// Register a freshly connected session (not in any room yet).
    pub async fn register(&self, session: Session) {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id(), session);
    }

    /// Remove a session entirely. Callers leave the room first.
    pub async fn unregister(&self, session_id: &SessionId) -> Option<Session> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let mut session = inner.sessions.remove(session_id)?;
        if let Some(design_id) = session.exit() {
            // Normally already removed by leave().
            remove_member(&mut inner.rooms, &design_id, session_id);
        }
        Some(session)
    }

    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.inner.read().await.sessions.contains_key(session_id)
    }

    pub async fn room_of(&self, session_id: &SessionId) -> Option<DesignId> {
        let inner = self.inner.read().await;
        inner.sessions.get(session_id)?.room().cloned()
    }

    /// The user id of `session_id` if it is currently a member of `design_id`.
    /// Outer `None` means "not a member".
    pub async fn member_user(
        &self,
        session_id: &SessionId,
        design_id: &DesignId,
    ) -> Option<Option<String>> {
        let inner = self.inner.read().await;
        let session = inner.sessions.get(session_id)?;
        (session.room() == Some(design_id)).then(|| session.user_id().map(str::to_string))
    }

    pub async fn user_of(&self, session_id: &SessionId) -> Option<String> {
        let inner = self.inner.read().await;
        inner.sessions.get(session_id)?.user_id().map(str::to_string)
    }

    /// Put a session into `design_id`. The caller has already left any other room.
    pub async fn join(
        &self,
        session_id: &SessionId,
        design_id: &DesignId,
        user_id: Option<String>,
    ) -> JoinOutcome {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return JoinOutcome::UnknownSession;
        };
        session.set_user_id(user_id);
        if session.room() == Some(design_id) {
            return JoinOutcome::Rejoined;
        }
        let previous = session.exit();
        session.enter(design_id.clone());
        if let Some(previous) = previous {
            remove_member(&mut inner.rooms, &previous, session_id);
        }
        inner.rooms.entry(design_id.clone()).or_default().insert(*session_id);
        JoinOutcome::Joined
    }

    /// Remove a session from `design_id` if, and only if, it is still there.
    /// Returns the departing member so exactly one caller announces it.
    pub async fn leave(&self, session_id: &SessionId, design_id: &DesignId) -> Option<PeerInfo> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let session = inner.sessions.get_mut(session_id)?;
        if session.room() != Some(design_id) {
            return None;
        }
        session.exit();
        let info = session.peer_info();
        remove_member(&mut inner.rooms, design_id, session_id);
        Some(info)
    }

    /// Members of a room.
    pub async fn members(&self, design_id: &DesignId) -> Vec<PeerInfo> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.rooms.get(design_id) else {
            return Vec::new();
        };
        let mut members: Vec<PeerInfo> = ids
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .map(Session::peer_info)
            .collect();
        members.sort_by_key(|p| p.session_id);
        members
    }

    pub async fn member_count(&self, design_id: &DesignId) -> usize {
        self.inner.read().await.rooms.get(design_id).map_or(0, HashSet::len)
    }

    /// Send an event to one session.
    pub async fn send_to(
        &self,
        session_id: &SessionId,
        event: &ServerEvent,
    ) -> Result<bool, ProtocolError> {
        let frame: Frame = Arc::from(event.encode()?);
        let inner = self.inner.read().await;
        let Some(session) = inner.sessions.get(session_id) else {
            return Ok(false);
        };
        Ok(self.record(session, frame) == Delivery::Queued)
    }

    /// Send an event to every member of `design_id` except `except`.
    /// Returns the number of sessions it was queued for.
    pub async fn broadcast(
        &self,
        design_id: &DesignId,
        event: &ServerEvent,
        except: Option<&SessionId>,
    ) -> Result<usize, ProtocolError> {
        let frame: Frame = Arc::from(event.encode()?);
        let inner = self.inner.read().await;
        let Some(ids) = inner.rooms.get(design_id) else {
            return Ok(0);
        };

        let mut queued = 0;
        for id in ids.iter().filter(|id| Some(*id) != except) {
            if let Some(session) = inner.sessions.get(id) {
                if self.record(session, frame.clone()) == Delivery::Queued {
                    queued += 1;
                }
            }
        }
        Ok(queued)
    }

    fn record(&self, session: &Session, frame: Frame) -> Delivery {
        let delivery = session.deliver(frame);
        match delivery {
            Delivery::Queued => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Dropped => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Session {} is lagging; dropped an outbound event", session.id());
            }
            Delivery::Closed => {
                log::debug!("Session {} transport already closed", session.id());
            }
        }
        delivery
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    /// Designs that currently have at least one member.
    pub async fn active_rooms(&self) -> Vec<DesignId> {
        self.inner.read().await.rooms.keys().cloned().collect()
    }

    pub async fn stats(&self) -> BroadcastStats {
        let inner = self.inner.read().await;
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_sessions: inner.sessions.len(),
            active_rooms: inner.rooms.len(),
        }
    }
}

fn remove_member(
    rooms: &mut HashMap<DesignId, HashSet<SessionId>>,
    design_id: &DesignId,
    session_id: &SessionId,
) {
    if let Some(members) = rooms.get_mut(design_id) {
        members.remove(session_id);
        if members.is_empty() {
            rooms.remove(design_id);
        }
    }
}
