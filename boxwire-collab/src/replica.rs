//! Client-side mirror of one design.
//!
//! Local edits are applied immediately and turned into the event to send;
//! remote events are applied with the same rules as the server's store.
//! A `design-state` snapshot replaces the mirror wholesale. That is the only
//! point where a replica is forced back into agreement with the server.

use boxwire_core::{Card, CardUpdate, Connection, DesignId, Graph, GraphOp, GraphSnapshot};

use crate::protocol::{ClientEvent, ServerEvent};

/// Local graph plus the design it belongs to.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    design_id: Option<DesignId>,
    graph: Graph,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `design_id`. Local state is discarded until the snapshot arrives.
    pub fn join(&mut self, design_id: DesignId, user_id: Option<String>) -> ClientEvent {
        self.graph.clear();
        self.design_id = Some(design_id.clone());
        ClientEvent::JoinDesign { design_id, user_id }
    }

    /// Leave the current design, if any.
    pub fn leave(&mut self, user_id: Option<String>) -> Option<ClientEvent> {
        let design_id = self.design_id.take()?;
        self.graph.clear();
        Some(ClientEvent::LeaveDesign { design_id, user_id })
    }

    /// Apply a local edit optimistically and return the event to forward.
    ///
    /// Returns `None` when no design is joined; the edit is not applied.
    pub fn apply_local(&mut self, op: GraphOp) -> Option<ClientEvent> {
        let design_id = self.design_id.clone()?;
        if !self.graph.apply(&op) {
            log::debug!("Local {op:?} on {design_id} changed nothing");
        }
        Some(ClientEvent::from_op(design_id, op))
    }

    pub fn add_card(&mut self, card: Card) -> Option<ClientEvent> {
        self.apply_local(GraphOp::UpsertCard(card))
    }

    pub fn update_card(
        &mut self,
        id: impl Into<String>,
        updates: CardUpdate,
    ) -> Option<ClientEvent> {
        self.apply_local(GraphOp::UpdateCard { id: id.into(), updates })
    }

    pub fn delete_card(&mut self, id: impl Into<String>) -> Option<ClientEvent> {
        self.apply_local(GraphOp::DeleteCard { id: id.into() })
    }

    pub fn move_card(&mut self, id: impl Into<String>, x: f64, y: f64) -> Option<ClientEvent> {
        self.apply_local(GraphOp::MoveCard { id: id.into(), x, y })
    }

    pub fn add_connection(&mut self, connection: Connection) -> Option<ClientEvent> {
        self.apply_local(GraphOp::UpsertConnection(connection))
    }

    pub fn delete_connection(&mut self, id: impl Into<String>) -> Option<ClientEvent> {
        self.apply_local(GraphOp::DeleteConnection { id: id.into() })
    }

    pub fn load_design(
        &mut self,
        cards: Vec<Card>,
        connections: Vec<Connection>,
    ) -> Option<ClientEvent> {
        self.apply_local(GraphOp::ReplaceAll { cards, connections })
    }

    pub fn clear_canvas(&mut self) -> Option<ClientEvent> {
        self.apply_local(GraphOp::Clear)
    }

    /// Apply an event received from the server. Returns whether the graph changed.
    pub fn apply_remote(&mut self, event: &ServerEvent) -> bool {
        if self.design_id.is_none() {
            return false;
        }
        match event {
            ServerEvent::DesignState { cards, connections, .. } => {
                self.graph = Graph::from_snapshot(GraphSnapshot {
                    cards: cards.clone(),
                    connections: connections.clone(),
                });
                true
            }
            ServerEvent::DesignLoaded { design_id, .. }
            | ServerEvent::CanvasCleared { design_id, .. }
                if Some(design_id) != self.design_id.as_ref() =>
            {
                log::debug!("Ignoring {} for {design_id}", event.name());
                false
            }
            _ => match event.graph_op() {
                Some(op) => self.graph.apply(&op),
                None => false,
            },
        }
    }

    pub fn design_id(&self) -> Option<&DesignId> {
        self.design_id.as_ref()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn cards(&self) -> &[Card] {
        self.graph.cards()
    }

    pub fn connections(&self) -> &[Connection] {
        self.graph.connections()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.graph.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxwire_core::CardType;

    fn card(id: &str) -> Card {
        Card::new(id, CardType::Service, 0.0, 0.0, id)
    }

    fn joined(design: &str) -> Replica {
        let mut replica = Replica::new();
        replica.join(DesignId::from(design), None);
        replica
    }

    #[test]
    fn test_local_edit_requires_design() {
        let mut replica = Replica::new();
        assert!(replica.add_card(card("c1")).is_none());
        assert!(replica.cards().is_empty());
    }

    #[test]
    fn test_local_edit_applies_and_emits() {
        let mut replica = joined("d1");

        let event = replica.add_card(card("c1")).unwrap();

        assert_eq!(
            event,
            ClientEvent::AddCard {
                design_id: DesignId::from("d1"),
                card: card("c1"),
            }
        );
        assert_eq!(replica.cards(), &[card("c1")]);
    }

    #[test]
    fn test_local_miss_still_forwards() {
        let mut replica = joined("d1");
        let event = replica.move_card("ghost", 1.0, 2.0);
        assert!(matches!(event, Some(ClientEvent::MoveCard { .. })));
        assert!(replica.cards().is_empty());
    }

    #[test]
    fn test_snapshot_replaces_local_state() {
        let mut replica = joined("d1");
        replica.add_card(card("provisional"));

        let changed = replica.apply_remote(&ServerEvent::DesignState {
            cards: vec![card("a"), card("b")],
            connections: vec![Connection::new("e1", "a", "b")],
            session_id: None,
        });

        assert!(changed);
        assert!(replica.graph().card("provisional").is_none());
        assert_eq!(replica.cards().len(), 2);
        assert_eq!(replica.connections().len(), 1);
    }

    #[test]
    fn test_remote_delete_cascades() {
        let mut replica = joined("d1");
        replica.add_card(card("a"));
        replica.add_card(card("b"));
        replica.add_connection(Connection::new("e1", "a", "b"));

        replica.apply_remote(&ServerEvent::CardDeleted {
            id: "a".into(),
            user_id: None,
            timestamp: 1,
        });

        assert_eq!(replica.cards(), &[card("b")]);
        assert!(replica.connections().is_empty());
        assert!(replica.graph().is_consistent());
    }

    #[test]
    fn test_bulk_events_for_other_design_ignored() {
        let mut replica = joined("d1");
        replica.add_card(card("keep"));

        let cleared = replica.apply_remote(&ServerEvent::CanvasCleared {
            design_id: DesignId::from("d2"),
            user_id: None,
            timestamp: 1,
        });

        assert!(!cleared);
        assert_eq!(replica.cards(), &[card("keep")]);
    }

    #[test]
    fn test_presence_events_leave_graph_alone() {
        let mut replica = joined("d1");
        replica.add_card(card("a"));
        let changed = replica.apply_remote(&ServerEvent::ConnectedUsers(Vec::new()));
        assert!(!changed);
        assert_eq!(replica.cards().len(), 1);
    }

    #[test]
    fn test_replicas_converge_on_same_sequence() {
        let snapshot = ServerEvent::DesignState {
            cards: vec![card("a")],
            connections: vec![],
            session_id: None,
        };
        let events = vec![
            ServerEvent::CardAdded { card: card("b"), user_id: None, timestamp: 1 },
            ServerEvent::ConnectionAdded {
                connection: Connection::new("e1", "a", "b"),
                user_id: None,
                timestamp: 2,
            },
            ServerEvent::CardMoved { id: "a".into(), x: 5.0, y: 6.0, user_id: None, timestamp: 3 },
            ServerEvent::CardUpdated {
                id: "b".into(),
                updates: CardUpdate::label("renamed"),
                user_id: None,
                timestamp: 4,
            },
            ServerEvent::CardDeleted { id: "ghost".into(), user_id: None, timestamp: 5 },
        ];

        let mut first = joined("d1");
        let mut second = joined("d1");
        // Provisional local state on one side is overwritten by the snapshot.
        second.add_card(card("local-only"));

        for replica in [&mut first, &mut second] {
            replica.apply_remote(&snapshot);
            for event in &events {
                replica.apply_remote(event);
            }
        }

        assert!(first.graph().same_contents(second.graph()));
        assert_eq!(first.graph().card("b").unwrap().label, "renamed");
    }

    /// Xorshift source of mixed operations over a small id space.
    struct OpSequence(u64);

    impl OpSequence {
        fn pick(&mut self, bound: u64) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0 % bound
        }

        fn card_id(&mut self) -> String {
            format!("c{}", self.pick(5))
        }

        fn connection(&mut self) -> Connection {
            let id = format!("e{}", self.pick(5));
            Connection::new(id, self.card_id(), self.card_id())
        }

        fn next_op(&mut self) -> GraphOp {
            match self.pick(20) {
                0..=4 => GraphOp::UpsertCard(card(&self.card_id())),
                5..=7 => GraphOp::DeleteCard { id: self.card_id() },
                8 | 9 => GraphOp::MoveCard {
                    id: self.card_id(),
                    x: self.pick(50) as f64,
                    y: self.pick(50) as f64,
                },
                10 => GraphOp::UpdateCard {
                    id: self.card_id(),
                    updates: CardUpdate::label(format!("L{}", self.pick(10))),
                },
                11..=14 => GraphOp::UpsertConnection(self.connection()),
                15 | 16 => GraphOp::DeleteConnection { id: format!("e{}", self.pick(5)) },
                17 | 18 => {
                    let cards = (0..self.pick(4)).map(|_| card(&self.card_id())).collect();
                    let connections = (0..self.pick(4)).map(|_| self.connection()).collect();
                    GraphOp::ReplaceAll { cards, connections }
                }
                _ => GraphOp::Clear,
            }
        }
    }

    /// What the server broadcasts after applying `op` to `server`.
    fn broadcast_for(op: GraphOp, server: &Graph) -> ServerEvent {
        let (user_id, timestamp) = (None, 0);
        match op {
            GraphOp::UpsertCard(card) => ServerEvent::CardAdded { card, user_id, timestamp },
            GraphOp::UpdateCard { id, updates } => {
                ServerEvent::CardUpdated { id, updates, user_id, timestamp }
            }
            GraphOp::DeleteCard { id } => ServerEvent::CardDeleted { id, user_id, timestamp },
            GraphOp::MoveCard { id, x, y } => {
                ServerEvent::CardMoved { id, x, y, user_id, timestamp }
            }
            GraphOp::UpsertConnection(connection) => {
                ServerEvent::ConnectionAdded { connection, user_id, timestamp }
            }
            GraphOp::DeleteConnection { id } => {
                ServerEvent::ConnectionDeleted { id, user_id, timestamp }
            }
            GraphOp::ReplaceAll { .. } => {
                let snapshot = server.snapshot();
                ServerEvent::DesignLoaded {
                    design_id: DesignId::from("d1"),
                    cards: snapshot.cards,
                    connections: snapshot.connections,
                    user_id,
                    timestamp,
                }
            }
            GraphOp::Clear => ServerEvent::CanvasCleared {
                design_id: DesignId::from("d1"),
                user_id,
                timestamp,
            },
        }
    }

    #[test]
    fn test_replicas_converge_for_mixed_sequences() {
        for seed in 1..=48u64 {
            let mut ops = OpSequence(seed);
            let mut server = Graph::new();
            for _ in 0..20 {
                server.apply(&ops.next_op());
            }

            // Every replica joins with some provisional state the snapshot must discard.
            let mut replicas: Vec<Replica> = (0..3).map(|_| joined("d1")).collect();
            let snapshot = server.snapshot();
            for (i, replica) in replicas.iter_mut().enumerate() {
                replica.add_card(card(&format!("provisional{i}")));
                replica.apply_remote(&ServerEvent::DesignState {
                    cards: snapshot.cards.clone(),
                    connections: snapshot.connections.clone(),
                    session_id: None,
                });
            }

            // Each op comes from one replica: it applies locally, the rest get the broadcast.
            for step in 0..200 {
                let op = ops.next_op();
                let origin = ops.pick(3) as usize;
                server.apply(&op);
                replicas[origin].apply_local(op.clone());
                let event = broadcast_for(op, &server);
                for (i, replica) in replicas.iter_mut().enumerate() {
                    if i != origin {
                        replica.apply_remote(&event);
                    }
                }
                for replica in &replicas {
                    assert!(replica.graph().is_consistent(), "seed {seed}, step {step}");
                }
            }

            for (i, replica) in replicas.iter().enumerate() {
                assert!(
                    replica.graph().same_contents(&server),
                    "seed {seed}: replica {i} diverged"
                );
            }
        }
    }

    #[test]
    fn test_leave_clears_design() {
        let mut replica = joined("d1");
        replica.add_card(card("a"));

        let event = replica.leave(Some("alice".into()));

        assert_eq!(
            event,
            Some(ClientEvent::LeaveDesign {
                design_id: DesignId::from("d1"),
                user_id: Some("alice".into()),
            })
        );
        assert!(replica.design_id().is_none());
        assert!(replica.cards().is_empty());
        assert!(replica.leave(None).is_none());
    }
}
