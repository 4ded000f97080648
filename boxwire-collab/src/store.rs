//! Authoritative per-design graphs held by the server.
//!
//! Each design sits behind its own async mutex, so operations on one
//! design are applied one at a time while different designs never contend.
//! The router holds a design's lock across apply and fan-out; that is
//! what orders broadcasts within a room.
//!
//! State is volatile: designs live as long as the process.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use boxwire_core::{Card, CardUpdate, Connection, DesignId, Graph, GraphOp, GraphSnapshot};

/// Shared handle to one design's graph.
pub type DesignHandle = Arc<Mutex<Graph>>;

/// Map of design id to graph, created lazily.
#[derive(Default)]
pub struct GraphStore {
    designs: RwLock<HashMap<DesignId, DesignHandle>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing design or a new empty one. Never fails.
    pub async fn get_or_create(&self, design_id: &DesignId) -> DesignHandle {
        // Fast path: read lock
        {
            let designs = self.designs.read().await;
            if let Some(design) = designs.get(design_id) {
                return design.clone();
            }
        }

        let mut designs = self.designs.write().await;
        designs
            .entry(design_id.clone())
            .or_insert_with(|| {
                log::debug!("Created design {design_id}");
                Arc::new(Mutex::new(Graph::new()))
            })
            .clone()
    }

    /// Exclusive access to a design until the guard is dropped.
    pub async fn lock(&self, design_id: &DesignId) -> OwnedMutexGuard<Graph> {
        self.get_or_create(design_id).await.lock_owned().await
    }

    pub async fn apply(&self, design_id: &DesignId, op: &GraphOp) -> bool {
        self.lock(design_id).await.apply(op)
    }

    pub async fn upsert_card(&self, design_id: &DesignId, card: Card) -> bool {
        self.lock(design_id).await.upsert_card(card)
    }

    pub async fn update_card(&self, design_id: &DesignId, id: &str, updates: &CardUpdate) -> bool {
        self.lock(design_id).await.update_card(id, updates)
    }

    pub async fn delete_card(&self, design_id: &DesignId, id: &str) -> bool {
        self.lock(design_id).await.delete_card(id)
    }

    pub async fn move_card(&self, design_id: &DesignId, id: &str, x: f64, y: f64) -> bool {
        self.lock(design_id).await.move_card(id, x, y)
    }

    pub async fn upsert_connection(&self, design_id: &DesignId, connection: Connection) -> bool {
        self.lock(design_id).await.upsert_connection(connection)
    }

    pub async fn delete_connection(&self, design_id: &DesignId, id: &str) -> bool {
        self.lock(design_id).await.delete_connection(id)
    }

    /// Returns the number of dangling connections that were dropped.
    pub async fn replace_all(
        &self,
        design_id: &DesignId,
        cards: Vec<Card>,
        connections: Vec<Connection>,
    ) -> usize {
        self.lock(design_id).await.replace_all(cards, connections)
    }

    pub async fn clear(&self, design_id: &DesignId) {
        self.lock(design_id).await.clear();
    }

    pub async fn snapshot(&self, design_id: &DesignId) -> GraphSnapshot {
        self.lock(design_id).await.snapshot()
    }

    pub async fn contains(&self, design_id: &DesignId) -> bool {
        self.designs.read().await.contains_key(design_id)
    }

    pub async fn design_count(&self) -> usize {
        self.designs.read().await.len()
    }

    pub async fn design_ids(&self) -> Vec<DesignId> {
        self.designs.read().await.keys().cloned().collect()
    }
}
