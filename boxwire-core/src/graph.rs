//! The card/connection graph of one design and the operations on it.
//!
//! Every mutation treats a missing id as a lost race rather than a fault:
//! the entity may have just been deleted by another session, so the
//! operation becomes a no-op and reports `false`.
//!
//! Invariant: no connection outlives either endpoint. `delete_card`
//! cascades, `upsert_connection` refuses dangling endpoints and
//! `replace_all` drops them.

use serde::{Deserialize, Serialize};

use crate::{Card, CardUpdate, Connection, GraphSnapshot};

/// A replicated graph operation.
///
/// The server applies these to its authoritative graph, clients apply
/// them to their mirror. Must be deterministic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GraphOp {
    UpsertCard(Card),
    UpdateCard { id: String, updates: CardUpdate },
    DeleteCard { id: String },
    MoveCard { id: String, x: f64, y: f64 },
    UpsertConnection(Connection),
    DeleteConnection { id: String },
    ReplaceAll { cards: Vec<Card>, connections: Vec<Connection> },
    Clear,
}

/// Cards and connections of a single design, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    cards: Vec<Card>,
    connections: Vec<Connection>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a snapshot, applying the same rules as `replace_all`.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self::new();
        graph.replace_all(snapshot.cards, snapshot.connections);
        graph
    }

    /// Apply an operation. Returns whether the graph changed.
    pub fn apply(&mut self, op: &GraphOp) -> bool {
        match op {
            GraphOp::UpsertCard(card) => self.upsert_card(card.clone()),
            GraphOp::UpdateCard { id, updates } => self.update_card(id, updates),
            GraphOp::DeleteCard { id } => self.delete_card(id),
            GraphOp::MoveCard { id, x, y } => self.move_card(id, *x, *y),
            GraphOp::UpsertConnection(connection) => self.upsert_connection(connection.clone()),
            GraphOp::DeleteConnection { id } => self.delete_connection(id),
            GraphOp::ReplaceAll { cards, connections } => {
                self.replace_all(cards.clone(), connections.clone());
                true
            }
            GraphOp::Clear => {
                let changed = !self.is_empty();
                self.clear();
                changed
            }
        }
    }

    /// Replace the card with the same id entirely, or append it.
    pub fn upsert_card(&mut self, card: Card) -> bool {
        match self.cards.iter_mut().find(|c| c.id == card.id) {
            Some(existing) => {
                let changed = *existing != card;
                *existing = card;
                changed
            }
            None => {
                self.cards.push(card);
                true
            }
        }
    }

    pub fn update_card(&mut self, id: &str, updates: &CardUpdate) -> bool {
        match self.cards.iter_mut().find(|c| c.id == id) {
            Some(card) => {
                let before = card.clone();
                card.merge(updates);
                *card != before
            }
            None => false,
        }
    }

    /// Remove a card and every connection that references it.
    pub fn delete_card(&mut self, id: &str) -> bool {
        let before = self.cards.len();
        self.cards.retain(|c| c.id != id);
        if self.cards.len() == before {
            return false;
        }
        self.connections.retain(|e| !e.touches(id));
        true
    }

    pub fn move_card(&mut self, id: &str, x: f64, y: f64) -> bool {
        match self.cards.iter_mut().find(|c| c.id == id) {
            Some(card) => {
                let changed = card.x != x || card.y != y;
                card.x = x;
                card.y = y;
                changed
            }
            None => false,
        }
    }

    /// Upsert a connection. Both endpoints must exist, otherwise this is
    /// a stale reference and nothing happens.
    pub fn upsert_connection(&mut self, connection: Connection) -> bool {
        if !self.has_card(&connection.from) || !self.has_card(&connection.to) {
            log::debug!(
                "Ignoring connection {} with missing endpoint ({} -> {})",
                connection.id,
                connection.from,
                connection.to
            );
            return false;
        }
        match self.connections.iter_mut().find(|e| e.id == connection.id) {
            Some(existing) => {
                let changed = *existing != connection;
                *existing = connection;
                changed
            }
            None => {
                self.connections.push(connection);
                true
            }
        }
    }

    /// Remove one connection. Never cascades.
    pub fn delete_connection(&mut self, id: &str) -> bool {
        let before = self.connections.len();
        self.connections.retain(|e| e.id != id);
        self.connections.len() != before
    }

    /// Wholesale replacement. Connections whose endpoints are not among
    /// `cards` are dropped. Returns the number of dropped connections.
    pub fn replace_all(&mut self, cards: Vec<Card>, connections: Vec<Connection>) -> usize {
        self.cards.clear();
        self.connections.clear();
        for card in cards {
            self.upsert_card(card);
        }

        let mut dropped = 0;
        for connection in connections {
            if self.has_card(&connection.from) && self.has_card(&connection.to) {
                self.upsert_connection(connection);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::warn!("Dropped {dropped} dangling connection(s) while replacing graph");
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.cards.clear();
        self.connections.clear();
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            cards: self.cards.clone(),
            connections: self.connections.clone(),
        }
    }

    pub fn card(&self, id: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == id)
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.iter().find(|e| e.id == id)
    }

    pub fn has_card(&self, id: &str) -> bool {
        self.cards.iter().any(|c| c.id == id)
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty() && self.connections.is_empty()
    }

    /// True when every connection references two existing cards.
    pub fn is_consistent(&self) -> bool {
        self.connections
            .iter()
            .all(|e| self.has_card(&e.from) && self.has_card(&e.to))
    }

    /// Order-insensitive equality of the card and connection sets.
    pub fn same_contents(&self, other: &Graph) -> bool {
        self.cards.len() == other.cards.len()
            && self.connections.len() == other.connections.len()
            && self.cards.iter().all(|c| other.card(&c.id) == Some(c))
            && self.connections.iter().all(|e| other.connection(&e.id) == Some(e))
    }
}
