//! Atomic rule application: remove the matched interior, instantiate the
//! RHS, re-embed boundary connections, evaluate attribute transfers.
//!
//! [`apply`] never mutates the host it is given. It builds the successor
//! graph on a working copy and returns it together with the
//! [`DerivationStep`] record; any failure leaves the caller's graph exactly
//! as it was. External connectivity is inherited exclusively through the
//! rule's interface mapping — never inferred geometrically.

use crate::attr::AttrName;
use crate::expr::{ElemRef, EvalScope, FreshScope};
use crate::graph::{Edge, EdgeId, Node, NodeId, ShapeGraph};
use crate::matcher::Match;
use crate::rule::{Rule, RuleId, RuleName};
use crate::util::log;
use error_stack::{Report, ResultExt};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub type RewriteResult<T> = error_stack::Result<T, RewriteError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RewriteError {
    /// The match no longer holds against the current host graph. Recoverable:
    /// re-match and try again.
    #[error("stale match: {0}")]
    StaleMatch(&'static str),
    /// A transfer function failed on its input. Recoverable: the host is
    /// unchanged and a different match or rule may succeed.
    #[error("attribute transfer for `{attr:?}` of {elem:?} failed")]
    AttributeTransfer { elem: ElemRef, attr: AttrName },
    /// The interface mapping designated an RHS node that the instantiation
    /// does not contain.
    #[error("broken interface mapping: boundary counterpart missing from the instantiated RHS")]
    BrokenInterface,
    /// Inserting an RHS or re-embedded edge was rejected by the result
    /// graph, e.g. it would create a forbidden parallel edge.
    #[error("could not insert an edge into the rewritten graph")]
    EdgeInsertion,
}

/// Everything one rewrite changed, in terms of the host graph before and
/// after. Enough for a host UI to highlight the step; replay does not need
/// it (it re-applies the rule from the match).
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphDelta {
    pub removed_nodes: Vec<(NodeId, Node)>,
    pub removed_edges: Vec<(EdgeId, (NodeId, NodeId), Edge)>,
    pub added_nodes: Vec<NodeId>,
    pub added_edges: Vec<EdgeId>,
    /// External edges that survived the rewrite, as `(old id, new id)`.
    pub reembedded_edges: Vec<(EdgeId, EdgeId)>,
}

/// The record of one applied rewrite: which rule fired where, and what
/// changed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DerivationStep {
    pub rule: RuleId,
    pub rule_name: RuleName,
    pub matched: Match,
    pub delta: GraphDelta,
}

/// An external edge that survives the rewrite: recorded before the interior
/// is removed, re-attached after the RHS is instantiated.
struct ExternalEdge {
    old_id: EdgeId,
    other: NodeId,
    matched_is_source: bool,
    data: Edge,
    attach_to_rhs: NodeId,
}

/// Applies `rule` at `m`, returning the successor graph and the step record.
///
/// The match is re-validated first; pass only matches computed against this
/// exact graph state. On any error the returned host is untouched — the
/// rewrite is atomic.
pub fn apply(
    rule: &Rule,
    m: &Match,
    host: &ShapeGraph,
    rule_id: RuleId,
) -> RewriteResult<(ShapeGraph, DerivationStep)> {
    revalidate(rule, m, host)?;

    let mut result = host.clone();
    let mut delta = GraphDelta::default();

    let matched_host_nodes: HashSet<NodeId> = m.node_map().values().copied().collect();

    // Record the external edges of boundary nodes before anything is
    // removed. Boundary nodes are visited in ascending LHS id order so the
    // result graph is identical on every replay.
    let mut boundary: Vec<(NodeId, NodeId)> = rule
        .interface()
        .iter()
        .map(|(&lhs, &rhs)| (lhs, rhs))
        .collect();
    boundary.sort();
    let mut externals: Vec<ExternalEdge> = Vec::new();
    for (lhs_node, rhs_node) in boundary {
        let host_node = m
            .node(lhs_node)
            .expect("internal error: revalidate admitted an incomplete match");
        for edge_id in host.incident_edges(host_node) {
            let (s, t) = host.endpoints(edge_id).unwrap();
            let other = if s == host_node { t } else { s };
            if matched_host_nodes.contains(&other) {
                continue;
            }
            externals.push(ExternalEdge {
                old_id: edge_id,
                other,
                matched_is_source: s == host_node,
                data: host.edge(edge_id).cloned().unwrap(),
                attach_to_rhs: rhs_node,
            });
        }
    }
    externals.sort_by_key(|e| e.old_id);

    // Remove every edge touching the matched subgraph (matched edges,
    // external edges pending re-embedding, and external edges of interior
    // nodes, which do not survive), then the matched nodes themselves.
    let mut edges_to_remove: Vec<EdgeId> = host
        .edges()
        .filter(|(_, (s, t), _)| {
            matched_host_nodes.contains(s) || matched_host_nodes.contains(t)
        })
        .map(|(id, _, _)| id)
        .collect();
    edges_to_remove.sort();
    for edge_id in edges_to_remove {
        let endpoints = result.endpoints(edge_id).unwrap();
        let data = result.remove_edge(edge_id).unwrap();
        delta.removed_edges.push((edge_id, endpoints, data));
    }
    let mut nodes_to_remove: Vec<NodeId> = matched_host_nodes.iter().copied().collect();
    nodes_to_remove.sort();
    for node_id in nodes_to_remove {
        let data = result.remove_node(node_id).unwrap();
        delta.removed_nodes.push((node_id, data));
    }

    // Instantiate a fresh copy of the RHS. Template attributes come along;
    // transfers may overwrite them below.
    let mut rhs_nodes: HashMap<NodeId, NodeId> = HashMap::new();
    for rhs_node in rule.rhs().node_ids() {
        let data = rule.rhs().node(rhs_node).cloned().unwrap();
        let new_node = result.add_node(data);
        rhs_nodes.insert(rhs_node, new_node);
        delta.added_nodes.push(new_node);
    }
    let mut rhs_edges: HashMap<EdgeId, EdgeId> = HashMap::new();
    for rhs_edge in rule.rhs().edge_ids() {
        let (s, t) = rule.rhs().endpoints(rhs_edge).unwrap();
        let data = rule.rhs().edge(rhs_edge).cloned().unwrap();
        let new_edge = result
            .add_edge(rhs_nodes[&s], rhs_nodes[&t], data)
            .map_err(Report::new)
            .change_context(RewriteError::EdgeInsertion)?;
        rhs_edges.insert(rhs_edge, new_edge);
        delta.added_edges.push(new_edge);
    }

    // Re-embed the surviving external edges onto their designated RHS nodes.
    // This is the sole legal embedding mechanism.
    for external in externals {
        let attach = *rhs_nodes
            .get(&external.attach_to_rhs)
            .ok_or_else(|| Report::new(RewriteError::BrokenInterface))?;
        let (s, t) = if external.matched_is_source {
            (attach, external.other)
        } else {
            (external.other, attach)
        };
        let new_edge = result
            .add_edge(s, t, external.data)
            .map_err(Report::new)
            .change_context(RewriteError::EdgeInsertion)?;
        delta.reembedded_edges.push((external.old_id, new_edge));
    }

    // Evaluate the transfer functions in the dependency order compiled at
    // rule load. Matched reads resolve against the original host; fresh
    // reads against the result under construction.
    for transfer in rule.ordered_transfers() {
        let (elem, attr) = transfer.target;
        let value = {
            let scope = EvalScope {
                host,
                matched_nodes: m.node_map(),
                matched_edges: m.edge_map(),
                fresh: Some(FreshScope {
                    graph: &result,
                    node_map: &rhs_nodes,
                    edge_map: &rhs_edges,
                }),
            };
            transfer
                .expr
                .eval(&scope)
                .map_err(Report::new)
                .change_context(RewriteError::AttributeTransfer { elem, attr })?
        };
        match elem {
            ElemRef::Node(rhs_node) => {
                let new_node = rhs_nodes[&rhs_node];
                result
                    .node_mut(new_node)
                    .expect("internal error: transfer target vanished from result")
                    .set_attr(attr, value);
            }
            ElemRef::Edge(rhs_edge) => {
                let new_edge = rhs_edges[&rhs_edge];
                result
                    .edge_mut(new_edge)
                    .expect("internal error: transfer target vanished from result")
                    .set_attr(attr, value);
            }
        }
    }

    log::debug!(
        "applied rule `{}`: -{} nodes -{} edges, +{} nodes +{} edges, {} re-embedded",
        rule.name(),
        delta.removed_nodes.len(),
        delta.removed_edges.len(),
        delta.added_nodes.len(),
        delta.added_edges.len(),
        delta.reembedded_edges.len(),
    );

    let step = DerivationStep {
        rule: rule_id,
        rule_name: rule.name(),
        matched: m.clone(),
        delta,
    };
    Ok((result, step))
}

/// Cheap re-validation of a match against the current host: node and edge
/// images exist with the right tags, kinds and adjacency, the mapping is
/// complete and injective, and the guards still hold.
pub fn revalidate(rule: &Rule, m: &Match, host: &ShapeGraph) -> RewriteResult<()> {
    let pattern = rule.lhs();
    let stale = |reason| Report::new(RewriteError::StaleMatch(reason));

    if m.node_map().len() != pattern.node_count() || m.edge_map().len() != pattern.edge_count() {
        return Err(stale("match does not cover the whole pattern"));
    }
    let mut seen_nodes = HashSet::new();
    for pattern_node in pattern.node_ids() {
        let host_node = m
            .node(pattern_node)
            .ok_or_else(|| stale("pattern node missing from match"))?;
        let host_data = host
            .node(host_node)
            .ok_or_else(|| stale("matched node no longer exists"))?;
        if host_data.tag != pattern.node(pattern_node).unwrap().tag {
            return Err(stale("matched node changed its type tag"));
        }
        if !seen_nodes.insert(host_node) {
            return Err(stale("match is no longer injective on nodes"));
        }
    }
    let mut seen_edges = HashSet::new();
    for pattern_edge in pattern.edge_ids() {
        let host_edge = m
            .edge(pattern_edge)
            .ok_or_else(|| stale("pattern edge missing from match"))?;
        let host_data = host
            .edge(host_edge)
            .ok_or_else(|| stale("matched edge no longer exists"))?;
        let pattern_data = pattern.edge(pattern_edge).unwrap();
        if host_data.kind != pattern_data.kind
            || host_data.orientation != pattern_data.orientation
        {
            return Err(stale("matched edge changed kind or orientation"));
        }
        if !seen_edges.insert(host_edge) {
            return Err(stale("match is no longer injective on edges"));
        }
        let (ps, pt) = pattern.endpoints(pattern_edge).unwrap();
        let (hs, ht) = host.endpoints(host_edge).unwrap();
        let (img_s, img_t) = (m.node(ps).unwrap(), m.node(pt).unwrap());
        let adjacent = match pattern_data.orientation {
            crate::graph::Orientation::Directed => hs == img_s && ht == img_t,
            crate::graph::Orientation::Undirected => {
                (hs == img_s && ht == img_t) || (hs == img_t && ht == img_s)
            }
        };
        if !adjacent {
            return Err(stale("matched edge no longer connects the matched nodes"));
        }
    }

    let scope = EvalScope {
        host,
        matched_nodes: m.node_map(),
        matched_edges: m.edge_map(),
        fresh: None,
    };
    for guard in rule.guards() {
        match guard.eval(&scope) {
            Ok(true) => {}
            _ => return Err(stale("guard predicate no longer holds")),
        }
    }
    Ok(())
}
