//! JSON event protocol between editors and the sync server.
//!
//! Every WebSocket text frame carries one event:
//! ```text
//! { "event": "move-card", "data": { "designId": "d1", "id": "c1", "x": 10, "y": 20 } }
//! ```
//!
//! Event names are kebab-case, payload fields camelCase. `timestamp` is
//! stamped by the server in milliseconds since the Unix epoch.

use boxwire_core::{Card, CardUpdate, Connection, DesignId, GraphOp};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Identity of one live connection.
pub type SessionId = Uuid;

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinDesign {
        design_id: DesignId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    LeaveDesign {
        design_id: DesignId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    AddCard {
        design_id: DesignId,
        card: Card,
    },
    UpdateCard {
        design_id: DesignId,
        id: String,
        updates: CardUpdate,
    },
    DeleteCard {
        design_id: DesignId,
        id: String,
    },
    MoveCard {
        design_id: DesignId,
        id: String,
        x: f64,
        y: f64,
    },
    AddConnection {
        design_id: DesignId,
        connection: Connection,
    },
    DeleteConnection {
        design_id: DesignId,
        id: String,
    },
    LoadDesign {
        design_id: DesignId,
        cards: Vec<Card>,
        connections: Vec<Connection>,
    },
    ClearCanvas {
        design_id: DesignId,
    },
    GetConnectedUsers {
        design_id: DesignId,
    },
    CursorMove {
        design_id: DesignId,
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

impl ClientEvent {
    /// Wrap a graph operation for the given design.
    pub fn from_op(design_id: DesignId, op: GraphOp) -> Self {
        match op {
            GraphOp::UpsertCard(card) => Self::AddCard { design_id, card },
            GraphOp::UpdateCard { id, updates } => Self::UpdateCard { design_id, id, updates },
            GraphOp::DeleteCard { id } => Self::DeleteCard { design_id, id },
            GraphOp::MoveCard { id, x, y } => Self::MoveCard { design_id, id, x, y },
            GraphOp::UpsertConnection(connection) => Self::AddConnection { design_id, connection },
            GraphOp::DeleteConnection { id } => Self::DeleteConnection { design_id, id },
            GraphOp::ReplaceAll { cards, connections } => Self::LoadDesign {
                design_id,
                cards,
                connections,
            },
            GraphOp::Clear => Self::ClearCanvas { design_id },
        }
    }

    /// The graph mutation carried by this event, if any.
    pub fn graph_op(&self) -> Option<GraphOp> {
        let op = match self {
            Self::AddCard { card, .. } => GraphOp::UpsertCard(card.clone()),
            Self::UpdateCard { id, updates, .. } => GraphOp::UpdateCard {
                id: id.clone(),
                updates: updates.clone(),
            },
            Self::DeleteCard { id, .. } => GraphOp::DeleteCard { id: id.clone() },
            Self::MoveCard { id, x, y, .. } => GraphOp::MoveCard { id: id.clone(), x: *x, y: *y },
            Self::AddConnection { connection, .. } => GraphOp::UpsertConnection(connection.clone()),
            Self::DeleteConnection { id, .. } => GraphOp::DeleteConnection { id: id.clone() },
            Self::LoadDesign { cards, connections, .. } => GraphOp::ReplaceAll {
                cards: cards.clone(),
                connections: connections.clone(),
            },
            Self::ClearCanvas { .. } => GraphOp::Clear,
            Self::JoinDesign { .. }
            | Self::LeaveDesign { .. }
            | Self::GetConnectedUsers { .. }
            | Self::CursorMove { .. } => return None,
        };
        Some(op)
    }

    pub fn design_id(&self) -> &DesignId {
        match self {
            Self::JoinDesign { design_id, .. }
            | Self::LeaveDesign { design_id, .. }
            | Self::AddCard { design_id, .. }
            | Self::UpdateCard { design_id, .. }
            | Self::DeleteCard { design_id, .. }
            | Self::MoveCard { design_id, .. }
            | Self::AddConnection { design_id, .. }
            | Self::DeleteConnection { design_id, .. }
            | Self::LoadDesign { design_id, .. }
            | Self::ClearCanvas { design_id }
            | Self::GetConnectedUsers { design_id }
            | Self::CursorMove { design_id, .. } => design_id,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialization)
    }
}

/// A member of a room as reported by `connected-users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Snapshot for a joining session only. `session_id` tells the joiner
    /// which session it is, so it can recognise itself in `connected-users`.
    DesignState {
        cards: Vec<Card>,
        connections: Vec<Connection>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    UserJoined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        session_id: SessionId,
    },
    UserLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        session_id: SessionId,
    },
    CardAdded {
        card: Card,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        timestamp: u64,
    },
    CardUpdated {
        id: String,
        updates: CardUpdate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        timestamp: u64,
    },
    CardDeleted {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        timestamp: u64,
    },
    CardMoved {
        id: String,
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        timestamp: u64,
    },
    ConnectionAdded {
        connection: Connection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        timestamp: u64,
    },
    ConnectionDeleted {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        timestamp: u64,
    },
    DesignLoaded {
        design_id: DesignId,
        cards: Vec<Card>,
        connections: Vec<Connection>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        timestamp: u64,
    },
    CanvasCleared {
        design_id: DesignId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        timestamp: u64,
    },
    /// Room membership, for the requester only.
    ConnectedUsers(Vec<PeerInfo>),
    CursorMoved {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        x: f64,
        y: f64,
        timestamp: u64,
    },
}

impl ServerEvent {
    /// The graph mutation a replica must apply for this event, if any.
    ///
    /// `design-state` is not included: a snapshot replaces the replica
    /// wholesale instead of being applied on top.
    pub fn graph_op(&self) -> Option<GraphOp> {
        let op = match self {
            Self::CardAdded { card, .. } => GraphOp::UpsertCard(card.clone()),
            Self::CardUpdated { id, updates, .. } => GraphOp::UpdateCard {
                id: id.clone(),
                updates: updates.clone(),
            },
            Self::CardDeleted { id, .. } => GraphOp::DeleteCard { id: id.clone() },
            Self::CardMoved { id, x, y, .. } => GraphOp::MoveCard { id: id.clone(), x: *x, y: *y },
            Self::ConnectionAdded { connection, .. } => {
                GraphOp::UpsertConnection(connection.clone())
            }
            Self::ConnectionDeleted { id, .. } => GraphOp::DeleteConnection { id: id.clone() },
            Self::DesignLoaded { cards, connections, .. } => GraphOp::ReplaceAll {
                cards: cards.clone(),
                connections: connections.clone(),
            },
            Self::CanvasCleared { .. } => GraphOp::Clear,
            Self::DesignState { .. }
            | Self::UserJoined { .. }
            | Self::UserLeft { .. }
            | Self::ConnectedUsers(_)
            | Self::CursorMoved { .. } => return None,
        };
        Some(op)
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DesignState { .. } => "design-state",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::CardAdded { .. } => "card-added",
            Self::CardUpdated { .. } => "card-updated",
            Self::CardDeleted { .. } => "card-deleted",
            Self::CardMoved { .. } => "card-moved",
            Self::ConnectionAdded { .. } => "connection-added",
            Self::ConnectionDeleted { .. } => "connection-deleted",
            Self::DesignLoaded { .. } => "design-loaded",
            Self::CanvasCleared { .. } => "canvas-cleared",
            Self::ConnectedUsers(_) => "connected-users",
            Self::CursorMoved { .. } => "cursor-moved",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialization)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Protocol and transport errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("Deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),
    #[error("Binary frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
