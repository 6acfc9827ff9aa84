//! A read-only projection over the planner's node/edge tables. The planner
//! itself is an external collaborator — this module only defines the
//! contract (`Planner`) and one in-memory stand-in (`StaticPlanner`) for
//! wiring and tests.

use crate::error::{Error, Result};
use crate::node::NodeId;
use crate::value::Value;
use std::collections::HashMap;

/// A "state to be in": a URL and the value a node must have there.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphNode {
    pub url: String,
    pub value: Value,
}

/// A declared state transition: `from` → `to`, gated by `requires` and
/// blocked by `excludes` (both URL-keyed predicates, opaque to the core).
#[derive(Clone, Debug, PartialEq)]
pub struct GraphEdge {
    pub module: String,
    pub id: String,
    pub from: String,
    pub to: String,
    pub requires: Vec<String>,
    pub excludes: Vec<String>,
}

/// Ordered chain of edges converging a node's Dsc to its Cfg. An empty path
/// means the node is already converged.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MutationPath {
    pub edges: Vec<GraphEdge>,
}

/// Read-only view over the planner's mutation graph. The core never builds
/// or mutates this graph; it only queries it on the Query Engine's behalf.
pub trait Planner: Send + Sync {
    fn nodes(&self) -> Vec<GraphNode>;
    fn edges(&self) -> Vec<GraphEdge>;
    fn node_nodes(&self, id: &NodeId) -> Vec<GraphNode>;
    fn node_edges(&self, id: &NodeId) -> Vec<GraphEdge>;
    fn node_path(&self, id: &NodeId) -> Result<MutationPath>;
}

/// In-memory stand-in for the planner: a fixed graph snapshot plus
/// per-node projections and paths supplied at construction. Not a
/// scheduler — just enough to exercise and test the gateway's read surface.
#[derive(Clone, Debug, Default)]
pub struct StaticPlanner {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    node_projections: HashMap<NodeId, (Vec<GraphNode>, Vec<GraphEdge>)>,
    paths: HashMap<NodeId, MutationPath>,
}

impl StaticPlanner {
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        StaticPlanner {
            nodes,
            edges,
            node_projections: HashMap::new(),
            paths: HashMap::new(),
        }
    }

    pub fn with_node_projection(mut self, id: NodeId, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        self.node_projections.insert(id, (nodes, edges));
        self
    }

    pub fn with_path(mut self, id: NodeId, path: MutationPath) -> Self {
        self.paths.insert(id, path);
        self
    }
}

impl Planner for StaticPlanner {
    fn nodes(&self) -> Vec<GraphNode> {
        self.nodes.clone()
    }

    fn edges(&self) -> Vec<GraphEdge> {
        self.edges.clone()
    }

    fn node_nodes(&self, id: &NodeId) -> Vec<GraphNode> {
        self.node_projections
            .get(id)
            .map(|(nodes, _)| nodes.clone())
            .unwrap_or_default()
    }

    fn node_edges(&self, id: &NodeId) -> Vec<GraphEdge> {
        self.node_projections
            .get(id)
            .map(|(_, edges)| edges.clone())
            .unwrap_or_default()
    }

    fn node_path(&self, id: &NodeId) -> Result<MutationPath> {
        self.paths
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NoPath(id.to_string()))
    }
}
