//! Sessions: one per live connection.
//!
//! The registry owns a [`Session`] record (identity, room, outbound queue
//! sender); the transport owns the matching [`SessionHandle`] and drains
//! encoded frames from it.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use boxwire_core::DesignId;

use crate::protocol::{PeerInfo, ProtocolError, ServerEvent, SessionId};

/// A pre-encoded server frame, shared between all recipients of a broadcast.
pub type Frame = Arc<str>;

/// Where a registered session currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    InRoom(DesignId),
}

/// Result of queueing a frame for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbound queue full: the peer is too slow and loses this event.
    Dropped,
    /// Transport already gone.
    Closed,
}

/// Registry-side record of a connected session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    user_id: Option<String>,
    state: SessionState,
    outbox: mpsc::Sender<Frame>,
}

impl Session {
    /// Create a session and the transport handle that drains its queue.
    pub fn open(capacity: usize) -> (Self, SessionHandle) {
        let id = Uuid::new_v4();
        let (outbox, rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            id,
            user_id: None,
            state: SessionState::Connected,
            outbox,
        };
        (session, SessionHandle { id, rx })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn set_user_id(&mut self, user_id: Option<String>) {
        if user_id.is_some() {
            self.user_id = user_id;
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn room(&self) -> Option<&DesignId> {
        match &self.state {
            SessionState::InRoom(design_id) => Some(design_id),
            SessionState::Connected => None,
        }
    }

    pub(crate) fn enter(&mut self, design_id: DesignId) {
        self.state = SessionState::InRoom(design_id);
    }

    /// Leave the current room, returning it. `None` if not in a room.
    pub(crate) fn exit(&mut self) -> Option<DesignId> {
        match std::mem::replace(&mut self.state, SessionState::Connected) {
            SessionState::InRoom(design_id) => Some(design_id),
            SessionState::Connected => None,
        }
    }

    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            session_id: self.id,
            user_id: self.user_id.clone(),
        }
    }

    /// Queue a frame without waiting.
    pub fn deliver(&self, frame: Frame) -> Delivery {
        match self.outbox.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Transport-side end of a session: receives frames to write to the socket.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    rx: mpsc::Receiver<Frame>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next outbound frame. `None` once the registry dropped the session.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next outbound event, decoded. Convenient for in-process peers.
    pub async fn recv_event(&mut self) -> Option<Result<ServerEvent, ProtocolError>> {
        let frame = self.rx.recv().await?;
        Some(ServerEvent::decode(&frame))
    }

    /// Drain everything queued right now.
    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            match ServerEvent::decode(&frame) {
                Ok(event) => events.push(event),
                Err(e) => log::warn!("Session {} queued an undecodable frame: {e}", self.id),
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_transitions() {
        let (mut session, handle) = Session::open(4);
        assert_eq!(session.id(), handle.id());
        assert_eq!(session.state(), &SessionState::Connected);

        session.enter("d1".into());
        assert_eq!(session.room(), Some(&DesignId::from("d1")));

        assert_eq!(session.exit(), Some(DesignId::from("d1")));
        assert_eq!(session.exit(), None);
        assert_eq!(session.state(), &SessionState::Connected);
    }

    #[test]
    fn test_user_id_is_sticky() {
        let (mut session, _handle) = Session::open(4);
        session.set_user_id(Some("alice".into()));
        session.set_user_id(None);
        assert_eq!(session.user_id(), Some("alice"));
        assert_eq!(session.peer_info().user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_deliver_reports_full_and_closed() {
        let (session, mut handle) = Session::open(1);
        let frame: Frame = Arc::from("{}");

        assert_eq!(session.deliver(frame.clone()), Delivery::Queued);
        assert_eq!(session.deliver(frame.clone()), Delivery::Dropped);

        assert_eq!(handle.recv().await.as_deref(), Some("{}"));
        drop(handle);
        assert_eq!(session.deliver(frame), Delivery::Closed);
    }

    #[test]
    fn test_drain_events_decodes_frames() {
        let (session, mut handle) = Session::open(8);
        let event = ServerEvent::CardDeleted {
            id: "c1".into(),
            user_id: None,
            timestamp: 1,
        };
        session.deliver(Arc::from(event.encode().unwrap()));
        assert_eq!(handle.drain_events(), vec![event]);
        assert!(handle.drain_events().is_empty());
    }
}
