//! # boxwire-core: replicated diagram graph
//!
//! Data model shared by the sync server and every client replica:
//! cards (nodes), connections (directed edges) and the [`graph::Graph`]
//! that applies [`graph::GraphOp`]s to them.
//!
//! Both sides run the exact same `Graph::apply`, which is what makes a
//! client that receives the server's event sequence converge to the
//! server's state.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod graph;

pub use graph::{Graph, GraphOp};

/// Identifier of a design (one collaborative document / room).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesignId(String);

impl DesignId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DesignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DesignId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DesignId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Category of a card.
///
/// Categories this build does not know are kept verbatim in `Other`, so a
/// card created by a newer client keeps its type when relayed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CardType {
    Client,
    Api,
    Service,
    Database,
    Cache,
    Queue,
    Gateway,
    Storage,
    External,
    Other(String),
}

impl CardType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Client => "client",
            Self::Api => "api",
            Self::Service => "service",
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Queue => "queue",
            Self::Gateway => "gateway",
            Self::Storage => "storage",
            Self::External => "external",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for CardType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "client" => Self::Client,
            "api" => Self::Api,
            "service" => Self::Service,
            "database" => Self::Database,
            "cache" => Self::Cache,
            "queue" => Self::Queue,
            "gateway" => Self::Gateway,
            "storage" => Self::Storage,
            "external" => Self::External,
            _ => Self::Other(name),
        }
    }
}

impl From<CardType> for String {
    fn from(kind: CardType) -> Self {
        match kind {
            CardType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the diagram.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CardType,
    pub x: f64,
    pub y: f64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Card {
    pub fn new(
        id: impl Into<String>,
        kind: CardType,
        x: f64,
        y: f64,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            x,
            y,
            label: label.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Merge the present fields of `updates` into this card.
    pub fn merge(&mut self, updates: &CardUpdate) {
        if let Some(kind) = &updates.kind {
            self.kind = kind.clone();
        }
        if let Some(x) = updates.x {
            self.x = x;
        }
        if let Some(y) = updates.y {
            self.y = y;
        }
        if let Some(label) = &updates.label {
            self.label = label.clone();
        }
        if let Some(description) = &updates.description {
            self.description = Some(description.clone());
        }
    }
}

/// Partial card fields for `update-card`. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CardUpdate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CardType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CardUpdate {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.x.is_none()
            && self.y.is_none()
            && self.label.is_none()
            && self.description.is_none()
    }
}

/// A directed edge between two cards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl Connection {
    pub fn new(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            label: None,
            description: None,
            protocol: None,
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Whether this edge has `card_id` as either endpoint.
    pub fn touches(&self, card_id: &str) -> bool {
        self.from == card_id || self.to == card_id
    }
}

/// Point-in-time copy of a design, delivered to joining clients.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub cards: Vec<Card>,
    pub connections: Vec<Connection>,
}
