//! WebSocket sync client for connecting to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect with backoff)
//! - Optimistic local edits forwarded to the server
//! - Remote events applied to the local [`Replica`] and [`PresenceRoom`]
//!
//! Inbound events are queued by a reader task and applied only when the
//! application calls [`SyncClient::next_event`], so local edits and remote
//! events share one timeline and the replica needs no locking.
//!
//! Edits made while disconnected are applied locally but never sent. The
//! snapshot received when re-joining overwrites them.
//!
//! Every queued event carries the generation of the connection that produced
//! it. Once `disconnect` or `connect` has started a new generation, anything a
//! previous connection still delivers is discarded unapplied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use boxwire_core::{Card, CardUpdate, Connection, DesignId};

use crate::config::ClientConfig;
use crate::presence::PresenceRoom;
use crate::protocol::{ClientEvent, ProtocolError, ServerEvent, SessionId};
use crate::replica::Replica;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// An event from the server, already applied to the replica and presence
    Remote(ServerEvent),
}

/// The sync client.
pub struct SyncClient {
    config: ClientConfig,

    /// Identity sent with joins, leaves and cursor moves
    user_id: Option<String>,

    /// Connection state, shared with the reader task
    state: Arc<RwLock<ConnectionState>>,

    /// Bumped on every connect/disconnect. Readers of an old connection stop
    /// forwarding and their queued events are skipped.
    generation: Arc<AtomicU64>,

    replica: Replica,
    presence: PresenceRoom,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Inbound events tagged with their connection generation
    event_tx: mpsc::Sender<(u64, SyncEvent)>,
    event_rx: mpsc::Receiver<(u64, SyncEvent)>,
}

impl SyncClient {
    /// Create a new sync client.
    pub fn new(config: ClientConfig, user_id: Option<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        Self {
            presence: PresenceRoom::new(config.cursor_interval),
            config,
            user_id,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            generation: Arc::new(AtomicU64::new(0)),
            replica: Replica::new(),
            outgoing_tx: None,
            event_tx,
            event_rx,
        }
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages. If a
    /// design was joined before, it is joined again and the replica waits
    /// for a fresh snapshot.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.drop_connection();
        *self.state.write().await = ConnectionState::Connecting;

        let url = self.config.server_url.as_str();
        let ws_stream = match tokio_tungstenite::connect_async(url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let generation = self.generation.load(Ordering::SeqCst);

        // Writer task: forward outgoing channel to WebSocket. Dropping the
        // sender closes the socket.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.config.event_buffer.max(1));
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });
        self.outgoing_tx = Some(out_tx);
        self.emit_connected(generation);

        // Reader task: decode incoming frames into events for the application
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let current = self.generation.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                if current.load(Ordering::SeqCst) != generation {
                    return;
                }
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match ServerEvent::decode(text.as_str()) {
                    Ok(event) => {
                        let tagged = (generation, SyncEvent::Remote(event));
                        if event_tx.send(tagged).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => log::warn!("Failed to decode server event: {e}"),
                }
            }

            // Connection lost
            if current.load(Ordering::SeqCst) == generation {
                *state.write().await = ConnectionState::Disconnected;
                let _ = event_tx.send((generation, SyncEvent::Disconnected)).await;
            }
        });

        *self.state.write().await = ConnectionState::Connected;
        log::info!("Connected to {}", self.config.server_url);

        if let Some(design_id) = self.replica.design_id().cloned() {
            log::info!("Re-joining design {design_id}");
            self.join_design(design_id).await?;
        }
        Ok(())
    }

    /// Connect again, waiting `ClientConfig::backoff` between attempts.
    pub async fn reconnect(&mut self) -> Result<(), ProtocolError> {
        let mut last_error = ProtocolError::ConnectionClosed;
        for attempt in 0..self.config.reconnect_attempts.max(1) {
            *self.state.write().await = ConnectionState::Reconnecting;
            tokio::time::sleep(self.config.backoff(attempt)).await;

            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!(
                        "Reconnect attempt {} to {} failed: {e}",
                        attempt + 1,
                        self.config.server_url
                    );
                    last_error = e;
                }
            }
        }
        *self.state.write().await = ConnectionState::Disconnected;
        Err(last_error)
    }

    /// Close the connection. The replica keeps its state.
    pub async fn disconnect(&mut self) {
        self.drop_connection();
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Start a new generation and discard whatever the old connection queued.
    fn drop_connection(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.outgoing_tx = None;
        while self.event_rx.try_recv().is_ok() {}
    }

    /// Queue `Connected` ahead of anything the new reader delivers.
    fn emit_connected(&mut self, generation: u64) {
        let mut event = (generation, SyncEvent::Connected);
        loop {
            match self.event_tx.try_send(event) {
                Ok(()) => return,
                // Only readers of earlier connections can have filled the queue.
                Err(TrySendError::Full(back)) => {
                    event = back;
                    while self.event_rx.try_recv().is_ok() {}
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Wait for the next event and apply it to the replica and presence.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        loop {
            let (generation, event) = self.event_rx.recv().await?;
            if self.is_current(generation) {
                self.absorb(&event);
                return Some(event);
            }
            log::trace!("Dropping {event:?} from closed connection {generation}");
        }
    }

    /// Apply every event already received without waiting.
    pub fn poll_events(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok((generation, event)) = self.event_rx.try_recv() {
            if self.is_current(generation) {
                self.absorb(&event);
                events.push(event);
            }
        }
        events
    }

    fn absorb(&mut self, event: &SyncEvent) {
        if let SyncEvent::Remote(event) = event {
            self.replica.apply_remote(event);
            self.presence.handle_event(event);
        }
    }

    /// Join a design. Local state is discarded until its snapshot arrives.
    pub async fn join_design(
        &mut self,
        design_id: impl Into<DesignId>,
    ) -> Result<(), ProtocolError> {
        self.presence.clear();
        let event = self.replica.join(design_id.into(), self.user_id.clone());
        self.send(&event).await
    }

    pub async fn leave_design(&mut self) -> Result<(), ProtocolError> {
        self.presence.clear();
        let event = self.replica.leave(self.user_id.clone());
        self.forward(event).await
    }

    pub async fn add_card(&mut self, card: Card) -> Result<(), ProtocolError> {
        let event = self.replica.add_card(card);
        self.forward(event).await
    }

    pub async fn update_card(
        &mut self,
        id: impl Into<String>,
        updates: CardUpdate,
    ) -> Result<(), ProtocolError> {
        let event = self.replica.update_card(id, updates);
        self.forward(event).await
    }

    pub async fn delete_card(&mut self, id: impl Into<String>) -> Result<(), ProtocolError> {
        let event = self.replica.delete_card(id);
        self.forward(event).await
    }

    pub async fn move_card(
        &mut self,
        id: impl Into<String>,
        x: f64,
        y: f64,
    ) -> Result<(), ProtocolError> {
        let event = self.replica.move_card(id, x, y);
        self.forward(event).await
    }

    pub async fn add_connection(&mut self, connection: Connection) -> Result<(), ProtocolError> {
        let event = self.replica.add_connection(connection);
        self.forward(event).await
    }

    pub async fn delete_connection(&mut self, id: impl Into<String>) -> Result<(), ProtocolError> {
        let event = self.replica.delete_connection(id);
        self.forward(event).await
    }

    pub async fn load_design(
        &mut self,
        cards: Vec<Card>,
        connections: Vec<Connection>,
    ) -> Result<(), ProtocolError> {
        let event = self.replica.load_design(cards, connections);
        self.forward(event).await
    }

    pub async fn clear_canvas(&mut self) -> Result<(), ProtocolError> {
        let event = self.replica.clear_canvas();
        self.forward(event).await
    }

    /// Send a cursor position unless throttled. Returns whether it was sent.
    pub async fn send_cursor(&mut self, x: f64, y: f64) -> Result<bool, ProtocolError> {
        let Some(design_id) = self.replica.design_id().cloned() else {
            return Ok(false);
        };
        if !self.presence.should_send_cursor() {
            return Ok(false);
        }
        let event = ClientEvent::CursorMove {
            design_id,
            x,
            y,
            user_id: self.user_id.clone(),
        };
        self.send(&event).await?;
        Ok(true)
    }

    /// Ask for the members of the current design. The reply arrives as a
    /// `connected-users` event; presence leaves this client's own session out.
    pub async fn request_connected_users(&self) -> Result<(), ProtocolError> {
        let Some(design_id) = self.replica.design_id().cloned() else {
            return Ok(());
        };
        self.send(&ClientEvent::GetConnectedUsers { design_id }).await
    }

    async fn forward(&self, event: Option<ClientEvent>) -> Result<(), ProtocolError> {
        match event {
            Some(event) => self.send(&event).await,
            None => {
                log::debug!("No design joined, local edit not sent");
                Ok(())
            }
        }
    }

    /// Send an event to the server. Silently skipped while not connected.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), ProtocolError> {
        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            log::trace!("Not connected, skipping {event:?}");
            return Ok(());
        }

        let encoded = event.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn presence(&self) -> &PresenceRoom {
        &self.presence
    }

    /// Our session id on the server, known once a design snapshot arrived.
    pub fn session_id(&self) -> Option<SessionId> {
        self.presence.local_session()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxwire_core::CardType;
    use std::time::Duration;
    use uuid::Uuid;

    /// URL of a port nothing listens on.
    async fn dead_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("ws://127.0.0.1:{port}")
    }

    fn card(id: &str) -> Card {
        Card::new(id, CardType::Database, 1.0, 2.0, id)
    }

    #[test]
    fn test_client_creation() {
        let config = ClientConfig::new("ws://localhost:9090");
        let client = SyncClient::new(config, Some("alice".into()));
        assert_eq!(client.server_url(), "ws://localhost:9090");
        assert_eq!(client.user_id(), Some("alice"));
        assert!(client.replica().design_id().is_none());
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = SyncClient::new(ClientConfig::default(), None);
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.presence().peer_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_edits_apply_locally() {
        let mut client = SyncClient::new(ClientConfig::default(), None);

        client.join_design("d1").await.unwrap();
        client.add_card(card("c1")).await.unwrap();
        client.move_card("c1", 9.0, 9.0).await.unwrap();

        let replica = client.replica();
        assert_eq!(replica.design_id(), Some(&DesignId::from("d1")));
        assert_eq!(replica.graph().card("c1").map(|c| (c.x, c.y)), Some((9.0, 9.0)));
    }

    #[tokio::test]
    async fn test_cursor_requires_design() {
        let mut client = SyncClient::new(ClientConfig::default(), None);
        assert!(!client.send_cursor(1.0, 1.0).await.unwrap());
        client.request_connected_users().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let mut client = SyncClient::new(ClientConfig::new(dead_url().await), None);

        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up() {
        let mut config = ClientConfig::new(dead_url().await);
        config.reconnect_attempts = 2;
        config.reconnect_base_delay = Duration::from_millis(1);
        let mut client = SyncClient::new(config, None);

        assert!(client.reconnect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_next_event_applies_snapshot_and_presence() {
        let mut client = SyncClient::new(ClientConfig::default(), None);
        client.join_design("d1").await.unwrap();
        client.add_card(card("provisional")).await.unwrap();

        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let generation = client.generation.load(Ordering::SeqCst);
        let snapshot = ServerEvent::DesignState {
            cards: vec![card("a")],
            connections: vec![],
            session_id: Some(me),
        };
        let joined = ServerEvent::UserJoined { user_id: None, session_id: peer };
        client.event_tx.send((generation, SyncEvent::Remote(snapshot))).await.unwrap();
        client.event_tx.send((generation, SyncEvent::Remote(joined))).await.unwrap();

        assert!(matches!(
            client.next_event().await,
            Some(SyncEvent::Remote(ServerEvent::DesignState { .. }))
        ));
        let rest = client.poll_events();

        assert_eq!(rest.len(), 1);
        assert_eq!(client.replica().cards(), &[card("a")]);
        assert!(client.presence().peer(&peer).is_some());
        assert_eq!(client.session_id(), Some(me));
    }

    #[tokio::test]
    async fn test_events_from_closed_generation_are_skipped() {
        let mut client = SyncClient::new(ClientConfig::default(), None);
        client.join_design("d1").await.unwrap();
        let stale = client.generation.load(Ordering::SeqCst);
        client.disconnect().await;

        let ghost = ServerEvent::CardAdded { card: card("ghost"), user_id: None, timestamp: 1 };
        client.event_tx.send((stale, SyncEvent::Remote(ghost))).await.unwrap();

        assert!(client.poll_events().is_empty());
        assert!(client.replica().cards().is_empty());
    }

    #[tokio::test]
    async fn test_old_connection_cannot_touch_replica_after_reconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        // First connection stays open and speaks only after the client moved
        // on; the second one answers with an empty design.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut first = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let mut second = tokio_tungstenite::accept_async(stream).await.unwrap();

            let empty = ServerEvent::DesignState {
                cards: vec![],
                connections: vec![],
                session_id: None,
            };
            second.send(Message::text(empty.encode().unwrap())).await.unwrap();

            let _ = release_rx.await;
            let ghost = ServerEvent::CardAdded { card: card("ghost"), user_id: None, timestamp: 1 };
            let _ = first.send(Message::text(ghost.encode().unwrap())).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut client = SyncClient::new(ClientConfig::new(url), None);
        client.connect().await.unwrap();
        client.join_design("d1").await.unwrap();
        client.disconnect().await;
        client.connect().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(SyncEvent::Remote(ServerEvent::DesignState { .. })) =
                    client.next_event().await
                {
                    break;
                }
            }
        })
        .await
        .unwrap();

        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let late = client.poll_events();
        assert!(!late
            .iter()
            .any(|event| matches!(event, SyncEvent::Remote(ServerEvent::CardAdded { .. }))));
        assert!(client.replica().cards().is_empty());
        assert_eq!(client.replica().design_id(), Some(&DesignId::from("d1")));
    }

    #[tokio::test]
    async fn test_leave_design_resets_replica() {
        let mut client = SyncClient::new(ClientConfig::default(), None);
        client.join_design("d1").await.unwrap();
        client.add_card(card("c1")).await.unwrap();

        client.leave_design().await.unwrap();

        assert!(client.replica().design_id().is_none());
        assert!(client.replica().cards().is_empty());
    }
}
