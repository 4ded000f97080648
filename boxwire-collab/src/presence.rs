//! Client-side presence: who else is in the room and where their cursor is.
//!
//! Presence is ephemeral and never part of the replicated graph. It is
//! rebuilt from `user-joined`/`user-left`/`connected-users` and
//! `cursor-moved` events, and cleared whenever a new snapshot arrives.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{PeerInfo, ServerEvent, SessionId};

/// 2D position in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// Presence state of one remote session.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePeer {
    pub session_id: SessionId,
    pub user_id: Option<String>,
    /// Last reported cursor, if any.
    pub cursor: Option<CursorPosition>,
    /// Server timestamp of `cursor`.
    last_timestamp: u64,
}

impl RemotePeer {
    fn new(session_id: SessionId, user_id: Option<String>) -> Self {
        Self {
            session_id,
            user_id,
            cursor: None,
            last_timestamp: 0,
        }
    }

    /// Apply a cursor update unless it is older than the one we have.
    fn update_cursor(&mut self, position: CursorPosition, timestamp: u64) -> bool {
        if timestamp < self.last_timestamp {
            return false;
        }
        self.cursor = Some(position);
        self.last_timestamp = timestamp;
        true
    }
}

/// Remote peers of the current room plus the local cursor throttle.
pub struct PresenceRoom {
    peers: HashMap<SessionId, RemotePeer>,
    /// Our own session, as announced in the last snapshot. Never a peer.
    local_session: Option<SessionId>,
    last_cursor_broadcast: Option<Instant>,
    cursor_interval: Duration,
}

impl PresenceRoom {
    pub fn new(cursor_interval: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            local_session: None,
            last_cursor_broadcast: None,
            cursor_interval,
        }
    }

    /// Update presence from a server event. Returns whether anything changed.
    pub fn handle_event(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::UserJoined { session_id, .. }
            | ServerEvent::CursorMoved { session_id, .. }
                if self.is_local(session_id) =>
            {
                false
            }
            ServerEvent::UserJoined { user_id, session_id } => {
                self.peers
                    .insert(*session_id, RemotePeer::new(*session_id, user_id.clone()));
                true
            }
            ServerEvent::UserLeft { session_id, .. } => self.peers.remove(session_id).is_some(),
            ServerEvent::ConnectedUsers(users) => {
                self.replace_peers(users);
                true
            }
            ServerEvent::CursorMoved { session_id, user_id, x, y, timestamp } => {
                // A cursor from someone we have not seen join: they were
                // there before us.
                let peer = self
                    .peers
                    .entry(*session_id)
                    .or_insert_with(|| RemotePeer::new(*session_id, user_id.clone()));
                peer.update_cursor(CursorPosition { x: *x, y: *y }, *timestamp)
            }
            ServerEvent::DesignState { session_id, .. } => {
                if session_id.is_some() {
                    self.local_session = *session_id;
                }
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Replace the peer list with a `connected-users` reply, keeping known cursors.
    fn replace_peers(&mut self, users: &[PeerInfo]) {
        let mut previous = std::mem::take(&mut self.peers);
        let local = self.local_session;
        for user in users.iter().filter(|user| Some(user.session_id) != local) {
            let peer = previous
                .remove(&user.session_id)
                .unwrap_or_else(|| RemotePeer::new(user.session_id, user.user_id.clone()));
            self.peers.insert(user.session_id, peer);
        }
    }

    fn is_local(&self, session_id: &SessionId) -> bool {
        self.local_session.as_ref() == Some(session_id)
    }

    /// Whether a local cursor update may be sent now. Rate-limited to
    /// `cursor_interval`; records the send when it returns `true`.
    pub fn should_send_cursor(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_cursor_broadcast {
            if now.duration_since(last) < self.cursor_interval {
                return false;
            }
        }
        self.last_cursor_broadcast = Some(now);
        true
    }

    pub fn peer(&self, session_id: &SessionId) -> Option<&RemotePeer> {
        self.peers.get(session_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// The session id the server assigned us, once a snapshot has named it.
    pub fn local_session(&self) -> Option<SessionId> {
        self.local_session
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

impl Default for PresenceRoom {
    fn default() -> Self {
        Self::new(Duration::from_millis(33))
    }
}
