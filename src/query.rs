//! Query Engine: CRUD + mutation-graph queries over the Node Store,
//! forwarding graph reads to the planner untouched.

use crate::error::Result;
use crate::event::EventBus;
use crate::graph::{GraphEdge, GraphNode, MutationPath, Planner};
use crate::node::{Node, NodeId};
use crate::store::{NodeStore, View};
use crate::url::Url;
use std::sync::Arc;

/// Wraps the Node Store, the Event Bus handle (shared with the RPC gateway
/// for the streaming endpoints), and the planner's read-only graph view.
#[derive(Clone)]
pub struct QueryEngine {
    store: NodeStore,
    bus: EventBus,
    planner: Arc<dyn Planner>,
}

impl QueryEngine {
    pub fn new(store: NodeStore, bus: EventBus, planner: Arc<dyn Planner>) -> Self {
        QueryEngine { store, bus, planner }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn self_id(&self) -> &NodeId {
        self.store.self_id()
    }

    pub async fn create(&self, node: Node) -> Result<Node> {
        self.store.create(View::Cfg, node).await
    }

    pub async fn read(&self, id: &NodeId) -> Result<Node> {
        self.store.read(View::Cfg, id).await
    }

    pub async fn read_dsc(&self, id: &NodeId) -> Result<Node> {
        self.store.read(View::Dsc, id).await
    }

    pub async fn update(&self, node: Node) -> Result<(Node, Vec<String>)> {
        self.store.update(View::Cfg, node).await
    }

    pub async fn update_dsc(&self, node: Node) -> Result<(Node, Vec<String>)> {
        self.store.update(View::Dsc, node).await
    }

    pub async fn delete(&self, id: &NodeId) -> Result<Node> {
        self.store.delete(View::Cfg, id).await
    }

    pub async fn read_all(&self) -> Vec<Node> {
        self.store.read_all(View::Cfg).await
    }

    pub async fn read_all_dsc(&self) -> Vec<Node> {
        self.store.read_all(View::Dsc).await
    }

    pub async fn delete_all(&self) -> Result<Vec<Node>> {
        self.store.delete_all(View::Cfg).await
    }

    pub fn freeze(&self) {
        self.store.freeze()
    }

    pub fn thaw(&self) {
        self.store.thaw()
    }

    pub fn frozen(&self) -> bool {
        self.store.frozen()
    }

    /// Global mutation node list. `url` is carried through from the caller
    /// but not otherwise consulted — the planner has no per-call addressing
    /// for its global tables (see the RPC gateway's `/graph/nodes` caller-side
    /// convention).
    pub fn read_mutation_nodes(&self, _url: &str) -> Vec<GraphNode> {
        self.planner.nodes()
    }

    /// Global mutation edge list, same caveat as [`Self::read_mutation_nodes`].
    pub fn read_mutation_edges(&self, _url: &str) -> Vec<GraphEdge> {
        self.planner.edges()
    }

    pub fn read_node_mutation_nodes(&self, url: &str) -> Result<Vec<GraphNode>> {
        let parsed = Url::parse(url)?;
        Ok(self.planner.node_nodes(&NodeId::from_url(&parsed)))
    }

    pub fn read_node_mutation_edges(&self, url: &str) -> Result<Vec<GraphEdge>> {
        let parsed = Url::parse(url)?;
        Ok(self.planner.node_edges(&NodeId::from_url(&parsed)))
    }

    pub fn read_node_mutation_path(&self, url: &str) -> Result<MutationPath> {
        let parsed = Url::parse(url)?;
        self.planner.node_path(&NodeId::from_url(&parsed))
    }
}
