//! The attributed graph shared by every other component: nodes and edges with
//! type tags and attribute maps, stored in arena-style tables with stable
//! identifiers.
//!
//! Host graphs never contain dangling edges; the storage cannot express them.
//! Pattern and replacement graphs are ordinary [`ShapeGraph`]s too — open
//! boundaries are modelled by boundary nodes plus a rule's interface mapping,
//! not by half-connected edges.

use crate::attr::{AttrName, AttrValue, EdgeKind, TypeTag};
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use thiserror::Error;

pub mod dot;

pub use dot::DotCollector;

/// A stable node identifier. Never reused while the node is alive, and
/// allocation is deterministic, which is what makes derivation replay exact.
#[derive(derive_more::Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::From, derive_more::Into)]
#[debug("n{}", _0.index())]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub NodeIndex);

/// A stable edge identifier.
#[derive(derive_more::Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::From, derive_more::Into)]
#[debug("e{}", _0.index())]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeId(pub EdgeIndex);

/// Whether an edge kind relates its endpoints as an ordered or an unordered
/// pair. Undirected edges are stored once, under their authored endpoint
/// order, and match in either orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Orientation {
    Directed,
    Undirected,
}

/// A node: a type tag from the grammar's alphabet plus named attributes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    pub tag: TypeTag,
    pub attrs: HashMap<AttrName, AttrValue>,
}

impl Node {
    pub fn new(tag: impl Into<TypeTag>) -> Self {
        Node {
            tag: tag.into(),
            attrs: HashMap::new(),
        }
    }

    pub fn attr(&self, name: &AttrName) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<AttrName>, value: impl Into<AttrValue>) {
        self.attrs.insert(name.into(), value.into());
    }
}

/// An edge: a kind, an orientation, and named attributes. Endpoints live in
/// the graph's adjacency structure, not here.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edge {
    pub kind: EdgeKind,
    pub orientation: Orientation,
    pub attrs: HashMap<AttrName, AttrValue>,
}

impl Edge {
    pub fn new(kind: impl Into<EdgeKind>, orientation: Orientation) -> Self {
        Edge {
            kind: kind.into(),
            orientation,
            attrs: HashMap::new(),
        }
    }

    pub fn directed(kind: impl Into<EdgeKind>) -> Self {
        Edge::new(kind, Orientation::Directed)
    }

    pub fn undirected(kind: impl Into<EdgeKind>) -> Self {
        Edge::new(kind, Orientation::Undirected)
    }

    pub fn attr(&self, name: &AttrName) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<AttrName>, value: impl Into<AttrValue>) {
        self.attrs.insert(name.into(), value.into());
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0:?} does not exist in this graph")]
    MissingNode(NodeId),
    #[error("edge {0:?} does not exist in this graph")]
    MissingEdge(EdgeId),
    #[error("an edge of this kind already connects {0:?} and {1:?}, and parallel edges are disabled")]
    ParallelEdge(NodeId, NodeId),
}

/// An attributed graph over stable node and edge ids.
///
/// The same type serves as host graph, pattern (rule LHS) and replacement
/// (rule RHS). Structural invariants: every edge's endpoints exist, and
/// unless `allow_parallel` is set no two edges share both their endpoint
/// pair and kind.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShapeGraph {
    graph: StableDiGraph<Node, Edge>,
    allow_parallel: bool,
}

impl ShapeGraph {
    pub fn new() -> Self {
        ShapeGraph {
            graph: StableDiGraph::new(),
            allow_parallel: false,
        }
    }

    /// A graph that permits multiple edges of the same kind between the same
    /// endpoint pair. A grammar-level choice; see
    /// [`GrammarConfig`](crate::rule::GrammarConfig).
    pub fn with_parallel_edges() -> Self {
        ShapeGraph {
            graph: StableDiGraph::new(),
            allow_parallel: true,
        }
    }

    pub fn allows_parallel_edges(&self) -> bool {
        self.allow_parallel
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        NodeId(self.graph.add_node(node))
    }

    /// Adds an edge between existing nodes. Fails if an equivalent edge is
    /// already present and parallel edges are disabled.
    pub fn add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge: Edge,
    ) -> Result<EdgeId, GraphError> {
        if !self.contains_node(source) {
            return Err(GraphError::MissingNode(source));
        }
        if !self.contains_node(target) {
            return Err(GraphError::MissingNode(target));
        }
        if !self.allow_parallel && self.has_equivalent_edge(source, target, &edge) {
            return Err(GraphError::ParallelEdge(source, target));
        }
        Ok(EdgeId(self.graph.add_edge(source.0, target.0, edge)))
    }

    fn has_equivalent_edge(&self, source: NodeId, target: NodeId, edge: &Edge) -> bool {
        let same = |e: &Edge| e.kind == edge.kind && e.orientation == edge.orientation;
        let forward = self
            .graph
            .edges_connecting(source.0, target.0)
            .any(|e| same(e.weight()));
        if forward {
            return true;
        }
        // An undirected pair is the same pair in either stored orientation.
        edge.orientation == Orientation::Undirected
            && self
                .graph
                .edges_connecting(target.0, source.0)
                .any(|e| same(e.weight()) && e.weight().orientation == Orientation::Undirected)
    }

    /// Removes a node and every incident edge.
    pub fn remove_node(&mut self, node: NodeId) -> Option<Node> {
        self.graph.remove_node(node.0)
    }

    pub fn remove_edge(&mut self, edge: EdgeId) -> Option<Edge> {
        self.graph.remove_edge(edge.0)
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.graph.contains_node(node.0)
    }

    pub fn contains_edge(&self, edge: EdgeId) -> bool {
        self.graph.edge_weight(edge.0).is_some()
    }

    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.graph.node_weight(node.0)
    }

    pub fn node_mut(&mut self, node: NodeId) -> Option<&mut Node> {
        self.graph.node_weight_mut(node.0)
    }

    pub fn edge(&self, edge: EdgeId) -> Option<&Edge> {
        self.graph.edge_weight(edge.0)
    }

    pub fn edge_mut(&mut self, edge: EdgeId) -> Option<&mut Edge> {
        self.graph.edge_weight_mut(edge.0)
    }

    /// The `(source, target)` pair of an edge, in stored orientation.
    pub fn endpoints(&self, edge: EdgeId) -> Option<(NodeId, NodeId)> {
        self.graph
            .edge_endpoints(edge.0)
            .map(|(s, t)| (NodeId(s), NodeId(t)))
    }

    /// All nodes, in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.graph
            .node_indices()
            .map(|idx| (NodeId(idx), &self.graph[idx]))
    }

    /// All node ids, in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.graph.node_indices().map(NodeId)
    }

    /// All edges with their endpoints, in ascending id order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, (NodeId, NodeId), &Edge)> {
        self.graph.edge_indices().map(|idx| {
            let (s, t) = self.graph.edge_endpoints(idx).unwrap();
            (EdgeId(idx), (NodeId(s), NodeId(t)), &self.graph[idx])
        })
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> {
        self.graph.edge_indices().map(EdgeId)
    }

    /// Every edge incident to `node`, regardless of stored orientation.
    /// Self-loops are reported once.
    pub fn incident_edges(&self, node: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        let outgoing = self
            .graph
            .edges_directed(node.0, Direction::Outgoing)
            .map(|e| EdgeId(e.id()));
        let incoming = self
            .graph
            .edges_directed(node.0, Direction::Incoming)
            .filter(|e| e.source() != e.target())
            .map(|e| EdgeId(e.id()));
        outgoing.chain(incoming)
    }

    /// The number of incident edges, counting self-loops once.
    pub fn degree(&self, node: NodeId) -> usize {
        self.incident_edges(node).count()
    }

    /// Given an edge and one endpoint, the endpoint on the other side.
    /// Returns the same node for self-loops.
    pub fn other_endpoint(&self, edge: EdgeId, node: NodeId) -> Option<NodeId> {
        let (s, t) = self.endpoints(edge)?;
        if s == node {
            Some(t)
        } else if t == node {
            Some(s)
        } else {
            None
        }
    }

    /// Convenience accessor for a node attribute.
    pub fn node_attr(&self, node: NodeId, name: impl Into<AttrName>) -> Option<&AttrValue> {
        self.node(node)?.attr(&name.into())
    }

    /// Convenience accessor for an edge attribute.
    pub fn edge_attr(&self, edge: EdgeId, name: impl Into<AttrName>) -> Option<&AttrValue> {
        self.edge(edge)?.attr(&name.into())
    }

    /// Checks the structural invariants: endpoint existence (guaranteed by
    /// the storage, re-checked for defense in tests) and the parallel-edge
    /// restriction.
    pub fn validate(&self) -> Result<(), GraphError> {
        for edge_id in self.edge_ids() {
            let (s, t) = self.endpoints(edge_id).ok_or(GraphError::MissingEdge(edge_id))?;
            if !self.contains_node(s) {
                return Err(GraphError::MissingNode(s));
            }
            if !self.contains_node(t) {
                return Err(GraphError::MissingNode(t));
            }
        }
        if !self.allow_parallel {
            let mut seen: HashMap<(NodeId, NodeId, EdgeKind), EdgeId> = HashMap::new();
            for (edge_id, (s, t), edge) in self.edges() {
                let key = match edge.orientation {
                    Orientation::Directed => (s, t, edge.kind),
                    Orientation::Undirected => (s.min(t), s.max(t), edge.kind),
                };
                if seen.insert(key, edge_id).is_some() {
                    return Err(GraphError::ParallelEdge(s, t));
                }
            }
        }
        Ok(())
    }

    /// Structural equality up to attribute values: used by tests to check
    /// that a failed rewrite left the graph untouched.
    pub fn structurally_eq(&self, other: &ShapeGraph) -> bool {
        if self.node_count() != other.node_count() || self.edge_count() != other.edge_count() {
            return false;
        }
        let nodes_eq = self
            .nodes()
            .zip(other.nodes())
            .all(|((id_a, a), (id_b, b))| id_a == id_b && a == b);
        let edges_eq = self.edges().zip(other.edges()).all(
            |((id_a, ends_a, a), (id_b, ends_b, b))| {
                id_a == id_b && ends_a == ends_b && a == b
            },
        );
        nodes_eq && edges_eq
    }

    pub(crate) fn petgraph(&self) -> &StableDiGraph<Node, Edge> {
        &self.graph
    }
}
