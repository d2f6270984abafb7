//! Subgraph pattern matching: enumerating the embeddings of a rule's LHS in
//! a host graph.
//!
//! The search is constraint-propagating backtracking. Cheap structural
//! checks (type tags, degree bounds, edge kinds and directions) prune
//! candidates; guard predicates run only once an embedding is structurally
//! complete. Host candidates for the pattern's most constrained node are
//! tried in ascending-degree order to keep early branching small.
//!
//! [`Matches`] is lazy, finite and restartable — calling
//! [`find_matches`] again on the same graphs yields the same sequence. A
//! [`MatchBudget`] bounds the search; once it is exhausted the iterator ends
//! and reports [`Matches::truncated`] instead of silently claiming
//! completeness.

use crate::expr::{EvalScope, GuardExpr};
use crate::graph::{EdgeId, NodeId, Orientation, ShapeGraph};
use crate::rule::{GrammarConfig, Rule};
use crate::util::bimap::BiMap;
use crate::util::log;
use std::collections::{HashMap, HashSet};

/// An injective embedding of a pattern graph into a host graph: pattern
/// node/edge ids mapped to host node/edge ids, preserving adjacency, type
/// tags, edge kinds and orientation, and satisfying all guards.
///
/// Matches are transient: they are computed on demand and become stale as
/// soon as the host graph changes.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Match {
    #[cfg_attr(feature = "serde", serde(with = "serde_json_any_key::any_key_map"))]
    node_map: HashMap<NodeId, NodeId>,
    #[cfg_attr(feature = "serde", serde(with = "serde_json_any_key::any_key_map"))]
    edge_map: HashMap<EdgeId, EdgeId>,
}

impl Match {
    pub(crate) fn new(node_map: HashMap<NodeId, NodeId>, edge_map: HashMap<EdgeId, EdgeId>) -> Self {
        Match { node_map, edge_map }
    }

    /// The host image of a pattern node.
    pub fn node(&self, pattern_node: NodeId) -> Option<NodeId> {
        self.node_map.get(&pattern_node).copied()
    }

    /// The host image of a pattern edge.
    pub fn edge(&self, pattern_edge: EdgeId) -> Option<EdgeId> {
        self.edge_map.get(&pattern_edge).copied()
    }

    pub fn node_map(&self) -> &HashMap<NodeId, NodeId> {
        &self.node_map
    }

    pub fn edge_map(&self) -> &HashMap<EdgeId, EdgeId> {
        &self.edge_map
    }

    /// The matched host nodes, in ascending id order.
    pub fn host_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.node_map.values().copied().collect();
        nodes.sort();
        nodes
    }

    /// The matched host edges, in ascending id order.
    pub fn host_edges(&self) -> Vec<EdgeId> {
        let mut edges: Vec<_> = self.edge_map.values().copied().collect();
        edges.sort();
        edges
    }
}

/// Bounds on a match search. `max_matches` stops enumeration after that many
/// matches; `max_search_steps` bounds the candidate placements tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchBudget {
    pub max_matches: Option<usize>,
    pub max_search_steps: Option<usize>,
}

impl MatchBudget {
    pub const UNLIMITED: MatchBudget = MatchBudget {
        max_matches: None,
        max_search_steps: None,
    };

    pub fn max_matches(limit: usize) -> Self {
        MatchBudget {
            max_matches: Some(limit),
            ..MatchBudget::UNLIMITED
        }
    }

    pub fn max_search_steps(limit: usize) -> Self {
        MatchBudget {
            max_search_steps: Some(limit),
            ..MatchBudget::UNLIMITED
        }
    }
}

/// One fully constrained way to place the next pattern node: the host node
/// plus the host counterpart for every pattern edge this placement closes.
#[derive(Debug, Clone)]
struct Placement {
    pattern_node: NodeId,
    host_node: NodeId,
    edge_pairs: Vec<(EdgeId, EdgeId)>,
}

struct Frame {
    candidates: Vec<Placement>,
    next: usize,
}

/// Lazy sequence of all distinct matches of `pattern` in `host`.
pub struct Matches<'a> {
    pattern: &'a ShapeGraph,
    host: &'a ShapeGraph,
    guards: &'a [GuardExpr],
    budget: MatchBudget,
    prune_automorphic: bool,
    /// Pattern nodes in placement order: most constrained first, then
    /// neighbors of already placed nodes.
    order: Vec<NodeId>,
    frames: Vec<Frame>,
    applied: Vec<Placement>,
    nodes: BiMap<NodeId, NodeId>,
    edges: BiMap<EdgeId, EdgeId>,
    seen_images: HashSet<(Vec<NodeId>, Vec<EdgeId>)>,
    steps: usize,
    yielded: usize,
    truncated: bool,
    done: bool,
}

/// Enumerates the matches of `pattern` in `host` under the given guards.
///
/// An empty result is a normal outcome, not an error. An empty or
/// disconnected pattern is allowed but logged as a warning, since it rarely
/// makes for a meaningful grammar; an empty pattern yields no matches.
pub fn find_matches<'a>(
    pattern: &'a ShapeGraph,
    host: &'a ShapeGraph,
    guards: &'a [GuardExpr],
    budget: MatchBudget,
    config: &GrammarConfig,
) -> Matches<'a> {
    let order = placement_order(pattern);
    if pattern.node_count() == 0 {
        log::warn!("matching an empty pattern; it yields no matches");
    }
    let mut matches = Matches {
        pattern,
        host,
        guards,
        budget,
        prune_automorphic: !config.keep_automorphic_matches,
        order,
        frames: Vec::new(),
        applied: Vec::new(),
        nodes: BiMap::new(),
        edges: BiMap::new(),
        seen_images: HashSet::new(),
        steps: 0,
        yielded: 0,
        truncated: false,
        done: false,
    };
    if matches.order.is_empty() {
        matches.done = true;
    } else {
        let root_candidates = matches.candidates_for(matches.order[0]);
        matches.frames.push(Frame {
            candidates: root_candidates,
            next: 0,
        });
    }
    matches
}

/// Like [`find_matches`], with the pattern and guards taken from a rule.
pub fn find_rule_matches<'a>(
    rule: &'a Rule,
    host: &'a ShapeGraph,
    budget: MatchBudget,
    config: &GrammarConfig,
) -> Matches<'a> {
    find_matches(rule.lhs(), host, rule.guards(), budget, config)
}

impl Matches<'_> {
    /// Whether enumeration stopped early because the budget ran out. A
    /// truncated sequence is incomplete, never wrong.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn apply(&mut self, placement: &Placement) {
        self.nodes
            .insert(placement.pattern_node, placement.host_node);
        for &(pattern_edge, host_edge) in &placement.edge_pairs {
            self.edges.insert(pattern_edge, host_edge);
        }
    }

    fn unapply_last(&mut self) {
        let placement = self
            .applied
            .pop()
            .expect("internal error: nothing to unapply");
        self.nodes.remove_left(&placement.pattern_node);
        for (pattern_edge, _) in placement.edge_pairs {
            self.edges.remove_left(&pattern_edge);
        }
    }

    /// All constraints a placement of `pattern_node` must close now: pattern
    /// edges whose other endpoint is already placed, plus self-loops.
    fn closing_edges(&self, pattern_node: NodeId) -> Vec<EdgeId> {
        let mut closing: Vec<EdgeId> = self
            .pattern
            .incident_edges(pattern_node)
            .filter(|&e| {
                let other = self.pattern.other_endpoint(e, pattern_node).unwrap();
                other == pattern_node || self.nodes.contains_left(&other)
            })
            .collect();
        closing.sort();
        closing
    }

    /// Host edges that could embody `pattern_edge` if `pattern_node` were
    /// placed on `host_node`, honoring kind, orientation and direction.
    fn host_edge_candidates(
        &self,
        pattern_edge: EdgeId,
        pattern_node: NodeId,
        host_node: NodeId,
    ) -> Vec<EdgeId> {
        let pattern_data = self.pattern.edge(pattern_edge).unwrap();
        let (ps, pt) = self.pattern.endpoints(pattern_edge).unwrap();
        let other = if ps == pattern_node { pt } else { ps };
        let host_other = if other == pattern_node {
            host_node // self-loop
        } else {
            *self.nodes.get_left(&other).unwrap()
        };

        let mut candidates: Vec<EdgeId> = self
            .host
            .incident_edges(host_node)
            .filter(|&host_edge| {
                if self.edges.contains_right(&host_edge) {
                    return false;
                }
                let host_data = self.host.edge(host_edge).unwrap();
                if host_data.kind != pattern_data.kind
                    || host_data.orientation != pattern_data.orientation
                {
                    return false;
                }
                let (hs, ht) = self.host.endpoints(host_edge).unwrap();
                match pattern_data.orientation {
                    Orientation::Directed => {
                        // The host edge must run the same way the pattern
                        // edge runs relative to the node being placed.
                        if ps == pattern_node && pt == pattern_node {
                            hs == host_node && ht == host_node
                        } else if ps == pattern_node {
                            hs == host_node && ht == host_other
                        } else {
                            hs == host_other && ht == host_node
                        }
                    }
                    Orientation::Undirected => {
                        (hs == host_node && ht == host_other)
                            || (hs == host_other && ht == host_node)
                    }
                }
            })
            .collect();
        candidates.sort();
        candidates.dedup();
        candidates
    }

    /// All placements of `pattern_node` consistent with the current partial
    /// match, in deterministic order (ascending host degree, then id).
    fn candidates_for(&self, pattern_node: NodeId) -> Vec<Placement> {
        let pattern_data = self.pattern.node(pattern_node).unwrap();
        let pattern_degree = self.pattern.degree(pattern_node);
        let closing = self.closing_edges(pattern_node);

        // Seed candidates from a placed neighbor when possible; that keeps
        // the candidate set to a neighborhood instead of the whole host.
        let mut host_candidates: Vec<NodeId> = match closing
            .iter()
            .find(|&&e| self.pattern.other_endpoint(e, pattern_node).unwrap() != pattern_node)
        {
            Some(&anchor_edge) => {
                let other = self
                    .pattern
                    .other_endpoint(anchor_edge, pattern_node)
                    .unwrap();
                let host_other = *self.nodes.get_left(&other).unwrap();
                let mut seeds: Vec<NodeId> = self
                    .host
                    .incident_edges(host_other)
                    .filter_map(|e| self.host.other_endpoint(e, host_other))
                    .collect();
                seeds.sort();
                seeds.dedup();
                seeds
            }
            None => self.host.node_ids().collect(),
        };

        host_candidates.retain(|&h| {
            !self.nodes.contains_right(&h)
                && self.host.node(h).is_some_and(|n| n.tag == pattern_data.tag)
                && self.host.degree(h) >= pattern_degree
        });
        host_candidates.sort_by_key(|&h| (self.host.degree(h), h));

        let mut placements = Vec::new();
        for host_node in host_candidates {
            let per_edge: Vec<(EdgeId, Vec<EdgeId>)> = closing
                .iter()
                .map(|&pe| (pe, self.host_edge_candidates(pe, pattern_node, host_node)))
                .collect();
            if per_edge.iter().any(|(_, options)| options.is_empty()) {
                continue;
            }
            let mut assignment = Vec::new();
            collect_edge_assignments(&per_edge, 0, &mut assignment, &mut |pairs| {
                placements.push(Placement {
                    pattern_node,
                    host_node,
                    edge_pairs: pairs.to_vec(),
                });
            });
        }
        placements
    }

    fn guards_hold(&self) -> bool {
        if self.guards.is_empty() {
            return true;
        }
        let scope = EvalScope {
            host: self.host,
            matched_nodes: self.nodes.left_map(),
            matched_edges: self.edges.left_map(),
            fresh: None,
        };
        for guard in self.guards {
            match guard.eval(&scope) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    // A guard that cannot evaluate (e.g. missing attribute)
                    // rejects the match, mirroring attribute matching on
                    // incomplete hosts.
                    log::debug!("guard rejected match with evaluation error: {e}");
                    return false;
                }
            }
        }
        true
    }

    fn image_key(&self) -> (Vec<NodeId>, Vec<EdgeId>) {
        let mut nodes: Vec<NodeId> = self.nodes.left_map().values().copied().collect();
        nodes.sort();
        let mut edges: Vec<EdgeId> = self.edges.left_map().values().copied().collect();
        edges.sort();
        (nodes, edges)
    }

    fn out_of_steps(&self) -> bool {
        self.budget
            .max_search_steps
            .is_some_and(|max| self.steps >= max)
    }
}

impl Iterator for Matches<'_> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        if self.done {
            return None;
        }
        loop {
            let exhausted = match self.frames.last() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(frame) => frame.next >= frame.candidates.len(),
            };
            if exhausted {
                self.frames.pop();
                if self.applied.is_empty() {
                    self.done = true;
                    return None;
                }
                self.unapply_last();
                continue;
            }
            if self.out_of_steps() {
                self.truncated = true;
                self.done = true;
                log::debug!(
                    "match search stopped after {} steps with {} matches; result truncated",
                    self.steps,
                    self.yielded
                );
                return None;
            }
            let placement = {
                let frame = self.frames.last_mut().unwrap();
                let placement = frame.candidates[frame.next].clone();
                frame.next += 1;
                placement
            };
            self.steps += 1;
            self.apply(&placement);
            self.applied.push(placement);

            if self.applied.len() == self.order.len() {
                // Structurally complete; the expensive checks run last.
                let distinct = !self.prune_automorphic || self.seen_images.insert(self.image_key());
                if distinct && self.guards_hold() {
                    let m = Match::new(
                        self.nodes.left_map().clone(),
                        self.edges.left_map().clone(),
                    );
                    self.unapply_last();
                    self.yielded += 1;
                    if self
                        .budget
                        .max_matches
                        .is_some_and(|max| self.yielded >= max)
                    {
                        self.truncated = true;
                        self.done = true;
                    }
                    return Some(m);
                }
                self.unapply_last();
            } else {
                let next_node = self.order[self.applied.len()];
                let candidates = self.candidates_for(next_node);
                self.frames.push(Frame {
                    candidates,
                    next: 0,
                });
            }
        }
    }
}

/// Enumerates injective assignments of host edges to the closing pattern
/// edges. With parallel edges disabled there is exactly one option per edge;
/// with them enabled every combination of distinct host edges is tried.
fn collect_edge_assignments(
    per_edge: &[(EdgeId, Vec<EdgeId>)],
    depth: usize,
    current: &mut Vec<(EdgeId, EdgeId)>,
    emit: &mut impl FnMut(&[(EdgeId, EdgeId)]),
) {
    if depth == per_edge.len() {
        emit(current);
        return;
    }
    let (pattern_edge, options) = &per_edge[depth];
    for &host_edge in options {
        if current.iter().any(|&(_, used)| used == host_edge) {
            continue;
        }
        current.push((*pattern_edge, host_edge));
        collect_edge_assignments(per_edge, depth + 1, current, emit);
        current.pop();
    }
}

/// Pattern nodes in placement order: start at the most constrained node
/// (highest degree, lowest id on ties), then repeatedly pick the node with
/// the most already-placed neighbors. Warns when that leaves a disconnected
/// jump, since matching a disconnected pattern degenerates to a cartesian
/// product over the host.
fn placement_order(pattern: &ShapeGraph) -> Vec<NodeId> {
    let mut remaining: Vec<NodeId> = pattern.node_ids().collect();
    let mut order: Vec<NodeId> = Vec::with_capacity(remaining.len());
    let mut warned_disconnected = false;
    while !remaining.is_empty() {
        let pick = if order.is_empty() {
            *remaining
                .iter()
                .max_by_key(|&&n| (pattern.degree(n), std::cmp::Reverse(n)))
                .unwrap()
        } else {
            let placed: HashSet<NodeId> = order.iter().copied().collect();
            let connectivity = |n: NodeId| {
                pattern
                    .incident_edges(n)
                    .filter(|&e| {
                        let other = pattern.other_endpoint(e, n).unwrap();
                        placed.contains(&other)
                    })
                    .count()
            };
            let pick = *remaining
                .iter()
                .max_by_key(|&&n| (connectivity(n), pattern.degree(n), std::cmp::Reverse(n)))
                .unwrap();
            if connectivity(pick) == 0 && !warned_disconnected {
                warned_disconnected = true;
                log::warn!("pattern graph is disconnected; matching will be expensive");
            }
            pick
        };
        remaining.retain(|&n| n != pick);
        order.push(pick);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::AttrExpr;
    use crate::graph::{Edge, Node};

    fn chain_host(len: usize) -> (ShapeGraph, Vec<NodeId>) {
        let mut g = ShapeGraph::new();
        let nodes: Vec<NodeId> = (0..len).map(|_| g.add_node(Node::new("seg"))).collect();
        for pair in nodes.windows(2) {
            g.add_edge(pair[0], pair[1], Edge::directed("next")).unwrap();
        }
        (g, nodes)
    }

    fn edge_pattern() -> (ShapeGraph, NodeId, NodeId) {
        let mut p = ShapeGraph::new();
        let a = p.add_node(Node::new("seg"));
        let b = p.add_node(Node::new("seg"));
        p.add_edge(a, b, Edge::directed("next")).unwrap();
        (p, a, b)
    }

    fn all(pattern: &ShapeGraph, host: &ShapeGraph) -> Vec<Match> {
        find_matches(
            pattern,
            host,
            &[],
            MatchBudget::UNLIMITED,
            &GrammarConfig::default(),
        )
        .collect()
    }

    #[test]
    fn single_node_pattern_matches_every_tagged_node() {
        let (host, nodes) = chain_host(3);
        let mut p = ShapeGraph::new();
        let pn = p.add_node(Node::new("seg"));
        let found = all(&p, &host);
        assert_eq!(found.len(), 3);
        let images: HashSet<NodeId> = found.iter().map(|m| m.node(pn).unwrap()).collect();
        assert_eq!(images, nodes.into_iter().collect());
    }

    #[test]
    fn directed_edge_pattern_respects_direction() {
        let (host, nodes) = chain_host(3);
        let (p, a, b) = edge_pattern();
        let found = all(&p, &host);
        assert_eq!(found.len(), 2);
        for m in &found {
            let ha = m.node(a).unwrap();
            let hb = m.node(b).unwrap();
            assert!(nodes.iter().position(|&n| n == ha).unwrap() + 1
                == nodes.iter().position(|&n| n == hb).unwrap());
        }
    }

    #[test]
    fn wrong_tag_yields_empty_sequence_not_error() {
        let (host, _) = chain_host(3);
        let mut p = ShapeGraph::new();
        p.add_node(Node::new("missing_kind"));
        let mut matches = find_matches(
            &p,
            &host,
            &[],
            MatchBudget::UNLIMITED,
            &GrammarConfig::default(),
        );
        assert_eq!(matches.next(), None);
        assert!(!matches.truncated());
    }

    #[test]
    fn matching_is_idempotent() {
        let (host, _) = chain_host(5);
        let (p, _, _) = edge_pattern();
        let first: Vec<Match> = all(&p, &host);
        let second: Vec<Match> = all(&p, &host);
        assert_eq!(first, second);
    }

    #[test]
    fn undirected_pattern_edge_matches_either_orientation() {
        let mut host = ShapeGraph::new();
        let x = host.add_node(Node::new("seg"));
        let y = host.add_node(Node::new("seg"));
        host.add_edge(x, y, Edge::undirected("touches")).unwrap();

        let mut p = ShapeGraph::new();
        let a = p.add_node(Node::new("seg"));
        let b = p.add_node(Node::new("seg"));
        p.add_edge(b, a, Edge::undirected("touches")).unwrap();

        // Automorphism pruning keeps one of the two symmetric embeddings.
        let found = all(&p, &host);
        assert_eq!(found.len(), 1);

        let config = GrammarConfig {
            keep_automorphic_matches: true,
            ..GrammarConfig::default()
        };
        let found: Vec<Match> =
            find_matches(&p, &host, &[], MatchBudget::UNLIMITED, &config).collect();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn guards_filter_structural_matches() {
        let (mut host, nodes) = chain_host(3);
        for (i, &n) in nodes.iter().enumerate() {
            host.node_mut(n).unwrap().set_attr("length", i as f64);
        }
        let mut p = ShapeGraph::new();
        let pn = p.add_node(Node::new("seg"));
        let guards = vec![GuardExpr::Gt(
            AttrExpr::matched(pn, "length"),
            AttrExpr::value(0.5),
        )];
        let found: Vec<Match> = find_matches(
            &p,
            &host,
            &guards,
            MatchBudget::UNLIMITED,
            &GrammarConfig::default(),
        )
        .collect();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn guard_on_missing_attribute_rejects_instead_of_failing() {
        let (host, _) = chain_host(2);
        let mut p = ShapeGraph::new();
        let pn = p.add_node(Node::new("seg"));
        let guards = vec![GuardExpr::Gt(
            AttrExpr::matched(pn, "length"),
            AttrExpr::value(0.5),
        )];
        let found: Vec<Match> = find_matches(
            &p,
            &host,
            &guards,
            MatchBudget::UNLIMITED,
            &GrammarConfig::default(),
        )
        .collect();
        assert!(found.is_empty());
    }

    #[test]
    fn match_budget_truncates_enumeration() {
        let (host, _) = chain_host(10);
        let (p, _, _) = edge_pattern();
        let mut matches = find_matches(
            &p,
            &host,
            &[],
            MatchBudget::max_matches(3),
            &GrammarConfig::default(),
        );
        assert_eq!(matches.by_ref().count(), 3);
        assert!(matches.truncated());

        let mut matches = find_matches(
            &p,
            &host,
            &[],
            MatchBudget::max_search_steps(4),
            &GrammarConfig::default(),
        );
        let found = matches.by_ref().count();
        assert!(matches.truncated());
        assert!(found < 9);
    }

    #[test]
    fn injective_on_nodes() {
        // A two-node pattern cannot map both nodes onto one host node.
        let mut host = ShapeGraph::new();
        let x = host.add_node(Node::new("seg"));
        host.add_edge(x, x, Edge::directed("next")).unwrap();
        let (p, _, _) = edge_pattern();
        assert!(all(&p, &host).is_empty());
    }

    #[test]
    fn self_loop_pattern_requires_self_loop() {
        let mut host = ShapeGraph::new();
        let x = host.add_node(Node::new("seg"));
        host.add_edge(x, x, Edge::directed("next")).unwrap();
        let (plain_host, _) = chain_host(2);

        let mut p = ShapeGraph::new();
        let a = p.add_node(Node::new("seg"));
        p.add_edge(a, a, Edge::directed("next")).unwrap();

        assert_eq!(all(&p, &host).len(), 1);
        assert!(all(&p, &plain_host).is_empty());
    }

    #[test]
    fn parallel_host_edges_produce_distinct_edge_images() {
        let config = GrammarConfig {
            allow_parallel_edges: true,
            keep_automorphic_matches: true,
        };
        let mut host = ShapeGraph::with_parallel_edges();
        let x = host.add_node(Node::new("seg"));
        let y = host.add_node(Node::new("seg"));
        let e1 = host.add_edge(x, y, Edge::directed("next")).unwrap();
        let e2 = host.add_edge(x, y, Edge::directed("next")).unwrap();

        let (p, _, _) = edge_pattern();
        let found: Vec<Match> =
            find_matches(&p, &host, &[], MatchBudget::UNLIMITED, &config).collect();
        assert_eq!(found.len(), 2);
        let images: HashSet<EdgeId> = found
            .iter()
            .flat_map(|m| m.edge_map().values().copied())
            .collect();
        assert_eq!(images, [e1, e2].into_iter().collect());
    }
}
