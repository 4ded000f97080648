//! Event router: the server-side gateway between sessions, the room
//! registry and the graph store.
//!
//! ## Ordering
//!
//! Every operation that touches a room (join, leave, graph mutation) runs
//! while holding that design's store lock, and fans out before releasing
//! it. Within one room, members therefore see events in exactly the order
//! they were applied; rooms never wait on each other.
//!
//! Membership is re-checked after the lock is taken, so a mutation racing
//! a leave either lands before the `user-left` broadcast or is dropped.
//!
//! ## Conflict policy
//!
//! Last write wins. The origin of a mutation never receives its own echo:
//! it already applied the change optimistically.

use std::sync::Arc;

use boxwire_core::{DesignId, Graph, GraphOp};

use crate::protocol::{now_millis, ClientEvent, ServerEvent, SessionId};
use crate::rooms::{JoinOutcome, RoomRegistry};
use crate::session::{Session, SessionHandle};
use crate::store::GraphStore;

pub struct EventRouter {
    store: Arc<GraphStore>,
    registry: Arc<RoomRegistry>,
    outbox_capacity: usize,
}

impl EventRouter {
    /// `outbox_capacity` bounds how many events may queue for one session.
    pub fn new(outbox_capacity: usize) -> Self {
        Self::with_parts(
            Arc::new(GraphStore::new()),
            Arc::new(RoomRegistry::new()),
            outbox_capacity,
        )
    }

    pub fn with_parts(
        store: Arc<GraphStore>,
        registry: Arc<RoomRegistry>,
        outbox_capacity: usize,
    ) -> Self {
        Self {
            store,
            registry,
            outbox_capacity,
        }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Register a new session. The handle yields frames for its transport.
    pub async fn connect(&self) -> SessionHandle {
        let (session, handle) = Session::open(self.outbox_capacity);
        log::debug!("Session {} connected", session.id());
        self.registry.register(session).await;
        handle
    }

    /// Dispatch one inbound client event.
    pub async fn handle(&self, session_id: SessionId, event: ClientEvent) {
        match event {
            ClientEvent::JoinDesign { design_id, user_id } => {
                self.join(session_id, design_id, user_id).await;
            }
            ClientEvent::LeaveDesign { design_id, .. } => {
                if self.registry.room_of(&session_id).await.as_ref() == Some(&design_id) {
                    self.leave(session_id).await;
                }
            }
            ClientEvent::GetConnectedUsers { design_id } => {
                self.connected_users(session_id, &design_id).await;
            }
            ClientEvent::CursorMove { design_id, x, y, .. } => {
                self.cursor_move(session_id, &design_id, x, y).await;
            }
            ClientEvent::AddCard { design_id, card } => {
                self.mutate(session_id, &design_id, GraphOp::UpsertCard(card)).await;
            }
            ClientEvent::UpdateCard { design_id, id, updates } => {
                self.mutate(session_id, &design_id, GraphOp::UpdateCard { id, updates }).await;
            }
            ClientEvent::DeleteCard { design_id, id } => {
                self.mutate(session_id, &design_id, GraphOp::DeleteCard { id }).await;
            }
            ClientEvent::MoveCard { design_id, id, x, y } => {
                self.mutate(session_id, &design_id, GraphOp::MoveCard { id, x, y }).await;
            }
            ClientEvent::AddConnection { design_id, connection } => {
                self.mutate(session_id, &design_id, GraphOp::UpsertConnection(connection)).await;
            }
            ClientEvent::DeleteConnection { design_id, id } => {
                self.mutate(session_id, &design_id, GraphOp::DeleteConnection { id }).await;
            }
            ClientEvent::LoadDesign { design_id, cards, connections } => {
                self.mutate(session_id, &design_id, GraphOp::ReplaceAll { cards, connections })
                    .await;
            }
            ClientEvent::ClearCanvas { design_id } => {
                self.mutate(session_id, &design_id, GraphOp::Clear).await;
            }
        }
    }

    /// Put a session into a room, leaving its previous room first. The
    /// joiner gets a `design-state` snapshot; the other members a
    /// `user-joined`. Re-joining the current room only re-sends the snapshot.
    pub async fn join(&self, session_id: SessionId, design_id: DesignId, user_id: Option<String>) {
        if let Some(current) = self.registry.room_of(&session_id).await {
            if current != design_id {
                self.leave(session_id).await;
            }
        }

        let graph = self.store.lock(&design_id).await;
        let outcome = self.registry.join(&session_id, &design_id, user_id).await;
        if outcome == JoinOutcome::UnknownSession {
            log::debug!("Join from unknown session {session_id} ignored");
            return;
        }

        let snapshot = graph.snapshot();
        let (cards, connections) = (snapshot.cards.len(), snapshot.connections.len());
        let state = ServerEvent::DesignState {
            cards: snapshot.cards,
            connections: snapshot.connections,
            session_id: Some(session_id),
        };
        if let Err(e) = self.registry.send_to(&session_id, &state).await {
            log::error!("Failed to send snapshot of {design_id} to {session_id}: {e}");
        }

        if outcome == JoinOutcome::Joined {
            let joined = ServerEvent::UserJoined {
                user_id: self.registry.user_of(&session_id).await,
                session_id,
            };
            if let Err(e) = self.registry.broadcast(&design_id, &joined, Some(&session_id)).await {
                log::error!("Failed to announce {session_id} in {design_id}: {e}");
            }
        }
        drop(graph);

        log::info!(
            "Session {session_id} joined {design_id} ({cards} cards, {connections} connections)"
        );
    }

    /// Leave the current room, if any. Returns whether a departure happened.
    pub async fn leave(&self, session_id: SessionId) -> bool {
        let Some(design_id) = self.registry.room_of(&session_id).await else {
            return false;
        };

        let graph = self.store.lock(&design_id).await;
        // Only the caller that actually removes the member announces it.
        let Some(info) = self.registry.leave(&session_id, &design_id).await else {
            return false;
        };
        let left = ServerEvent::UserLeft {
            user_id: info.user_id,
            session_id,
        };
        if let Err(e) = self.registry.broadcast(&design_id, &left, None).await {
            log::error!("Failed to announce departure of {session_id} from {design_id}: {e}");
        }
        drop(graph);

        log::info!("Session {session_id} left design {design_id}");
        true
    }

    /// Leave and forget the session. Safe to call more than once.
    pub async fn disconnect(&self, session_id: SessionId) {
        self.leave(session_id).await;
        if self.registry.unregister(&session_id).await.is_some() {
            log::debug!("Session {session_id} disconnected");
        }
    }

    /// Apply a graph mutation and broadcast it to the rest of the room.
    ///
    /// Dropped silently (returns `false`) when the session is not in
    /// `design_id`. Unknown card/connection ids are not errors.
    pub async fn mutate(&self, session_id: SessionId, design_id: &DesignId, op: GraphOp) -> bool {
        if self.registry.room_of(&session_id).await.as_ref() != Some(design_id) {
            log::debug!("Dropping {op:?} from {session_id}: not in design {design_id}");
            return false;
        }

        let mut graph = self.store.lock(design_id).await;
        let Some(user_id) = self.registry.member_user(&session_id, design_id).await else {
            log::debug!("Dropping mutation from {session_id}: left {design_id} meanwhile");
            return false;
        };

        let changed = graph.apply(&op);
        let event = canonical_event(design_id, op, user_id, &graph);
        match self.registry.broadcast(design_id, &event, Some(&session_id)).await {
            Ok(count) => log::debug!(
                "{} in {design_id} from {session_id} (changed: {changed}) sent to {count} peer(s)",
                event.name()
            ),
            Err(e) => log::error!("Failed to broadcast {} in {design_id}: {e}", event.name()),
        }
        true
    }

    /// Relay a cursor position to the rest of the room. Never touches the store.
    pub async fn cursor_move(
        &self,
        session_id: SessionId,
        design_id: &DesignId,
        x: f64,
        y: f64,
    ) -> bool {
        let Some(user_id) = self.registry.member_user(&session_id, design_id).await else {
            return false;
        };
        log::trace!("Cursor update from {session_id} in {design_id}");
        let event = ServerEvent::CursorMoved {
            session_id,
            user_id,
            x,
            y,
            timestamp: now_millis(),
        };
        if let Err(e) = self.registry.broadcast(design_id, &event, Some(&session_id)).await {
            log::error!("Failed to relay cursor in {design_id}: {e}");
        }
        true
    }

    /// Reply to the requester with the members of `design_id`.
    pub async fn connected_users(&self, session_id: SessionId, design_id: &DesignId) {
        let members = self.registry.members(design_id).await;
        let event = ServerEvent::ConnectedUsers(members);
        if let Err(e) = self.registry.send_to(&session_id, &event).await {
            log::error!("Failed to send connected users of {design_id}: {e}");
        }
    }
}

/// The event broadcast for an applied operation. A load carries the graph
/// as stored, so peers see exactly what survived validation.
fn canonical_event(
    design_id: &DesignId,
    op: GraphOp,
    user_id: Option<String>,
    graph: &Graph,
) -> ServerEvent {
    let timestamp = now_millis();
    match op {
        GraphOp::UpsertCard(card) => ServerEvent::CardAdded { card, user_id, timestamp },
        GraphOp::UpdateCard { id, updates } => ServerEvent::CardUpdated {
            id,
            updates,
            user_id,
            timestamp,
        },
        GraphOp::DeleteCard { id } => ServerEvent::CardDeleted { id, user_id, timestamp },
        GraphOp::MoveCard { id, x, y } => ServerEvent::CardMoved {
            id,
            x,
            y,
            user_id,
            timestamp,
        },
        GraphOp::UpsertConnection(connection) => ServerEvent::ConnectionAdded {
            connection,
            user_id,
            timestamp,
        },
        GraphOp::DeleteConnection { id } => {
            ServerEvent::ConnectionDeleted { id, user_id, timestamp }
        }
        GraphOp::ReplaceAll { .. } => {
            let snapshot = graph.snapshot();
            ServerEvent::DesignLoaded {
                design_id: design_id.clone(),
                cards: snapshot.cards,
                connections: snapshot.connections,
                user_id,
                timestamp,
            }
        }
        GraphOp::Clear => ServerEvent::CanvasCleared {
            design_id: design_id.clone(),
            user_id,
            timestamp,
        },
    }
}
