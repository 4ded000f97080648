//! WebSocket sync server.
//!
//! One task per connection. Each task runs a `select!` loop over:
//! - inbound frames, decoded and handed to the [`EventRouter`] one at a
//!   time, in arrival order
//! - the session's outbound queue, written back as text frames
//! - a heartbeat ticker sending WebSocket pings
//!
//! When the loop ends the session is disconnected. Because inbound frames
//! are handled sequentially, every mutation the peer sent before closing
//! is applied and broadcast before its `user-left`.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ServerConfig;
use crate::protocol::{ClientEvent, ProtocolError};
use crate::router::EventRouter;

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_messages: u64,
    pub active_rooms: usize,
    pub events_dropped: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    router: Arc<EventRouter>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new sync server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let router = Arc::new(EventRouter::new(config.outbox_capacity));
        Self {
            config,
            router,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let router = self.router.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, router, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        router: Arc<EventRouter>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), ProtocolError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let mut session = router.connect().await;
        let session_id = session.id();
        log::info!("WebSocket connection established from {addr} as session {session_id}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut heartbeat = config.heartbeat_interval().map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });
        if let Some(ticker) = heartbeat.as_mut() {
            // The first tick completes immediately.
            ticker.tick().await;
        }

        let result: Result<(), ProtocolError> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                            Some(Ok(Message::Binary(data))) => {
                                match String::from_utf8(data.to_vec()) {
                                    Ok(text) => text,
                                    Err(_) => {
                                        let error = ProtocolError::InvalidUtf8;
                                        log::warn!("Dropping frame from {addr}: {error}");
                                        stats.write().await.rejected_messages += 1;
                                        continue;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        {
                            let mut s = stats.write().await;
                            s.total_messages += 1;
                            s.total_bytes += text.len() as u64;
                        }

                        match ClientEvent::decode(&text) {
                            Ok(event) => router.handle(session_id, event).await,
                            Err(e) => {
                                log::warn!("Failed to decode message from {addr}: {e}");
                                stats.write().await.rejected_messages += 1;
                            }
                        }
                    }

                    frame = session.recv() => {
                        match frame {
                            Some(frame) => ws_sender.send(Message::text(frame.to_string())).await?,
                            None => break,
                        }
                    }

                    _ = async {
                        match heartbeat.as_mut() {
                            Some(ticker) => { ticker.tick().await; }
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        ws_sender.send(Message::Ping(Vec::new().into())).await?;
                    }
                }
            }
            Ok(())
        }
        .await;

        router.disconnect(session_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }
        log::debug!("Session {session_id} from {addr} cleaned up");

        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        let fanout = self.router.registry().stats().await;
        stats.active_rooms = fanout.active_rooms;
        stats.events_dropped = fanout.messages_dropped;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared router, for in-process inspection of rooms and designs.
    pub fn router(&self) -> Arc<EventRouter> {
        self.router.clone()
    }
}
