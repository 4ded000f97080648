//! # boxwire-collab: Real-time design synchronization
//!
//! Keeps every editor of a design in step over WebSocket. The server holds
//! the authoritative graph per design, applies each edit once and fans the
//! resulting event out to the rest of the room.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │     JSON events     │ (central)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ Replica     │                     │ EventRouter │
//! │ (optimistic)│                     │ (per room)  │
//! └─────────────┘                     └──┬───────┬──┘
//!                                        │       │
//!                                ┌───────┴──┐ ┌──┴───────────┐
//!                                │GraphStore│ │ RoomRegistry │
//!                                │(graphs)  │ │ (fan-out)    │
//!                                └──────────┘ └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire events (`ClientEvent`, `ServerEvent`)
//! - [`store`]: Authoritative graph per design
//! - [`session`]: One live connection and its bounded outbox
//! - [`rooms`]: Session registry, room membership and fan-out
//! - [`router`]: Join/leave/mutate semantics and per-room ordering
//! - [`server`]: WebSocket sync server
//! - [`replica`]: Client-side mirror of a design
//! - [`presence`]: Remote peers and cursors
//! - [`client`]: WebSocket sync client with reconnection
//! - [`config`]: Server and client configuration

pub mod config;
pub mod protocol;
pub mod store;
pub mod session;
pub mod rooms;
pub mod router;
pub mod server;
pub mod replica;
pub mod presence;
pub mod client;

// Re-exports for convenience
pub use config::{ClientConfig, ServerConfig};
pub use protocol::{ClientEvent, PeerInfo, ProtocolError, ServerEvent, SessionId};
pub use store::{DesignHandle, GraphStore};
pub use session::{Delivery, Session, SessionHandle, SessionState};
pub use rooms::{BroadcastStats, JoinOutcome, RoomRegistry};
pub use router::EventRouter;
pub use server::{ServerStats, SyncServer};
pub use replica::Replica;
pub use presence::{CursorPosition, PresenceRoom, RemotePeer};
pub use client::{ConnectionState, SyncClient, SyncEvent};
