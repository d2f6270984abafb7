#![allow(dead_code)]

//! Shared grammars for the integration tests.

use shapegram::{
    AttrExpr, AttrValue, Edge, GuardExpr, Node, NodeId, Rule, RuleSet, ShapeGraph,
};

/// A single `A` node with the given `length`, the axiom of the split
/// grammars.
pub fn segment_axiom(length: f64) -> (ShapeGraph, NodeId) {
    let mut axiom = ShapeGraph::new();
    let root = axiom.add_node(Node::new("A"));
    axiom.node_mut(root).unwrap().set_attr("length", length);
    (axiom, root)
}

/// The ids a split rule's graphs are built from, so tests can reference
/// pattern and RHS elements.
pub struct SplitRule {
    pub lhs_a: NodeId,
    pub rhs_a1: NodeId,
    pub rhs_a2: NodeId,
}

fn split_rule_parts() -> (ShapeGraph, ShapeGraph, SplitRule) {
    let mut lhs = ShapeGraph::new();
    let a = lhs.add_node(Node::new("A"));

    let mut rhs = ShapeGraph::new();
    let a1 = rhs.add_node(Node::new("A"));
    let a2 = rhs.add_node(Node::new("A"));
    rhs.add_edge(a1, a2, Edge::undirected("adjacent")).unwrap();

    (
        lhs,
        rhs,
        SplitRule {
            lhs_a: a,
            rhs_a1: a1,
            rhs_a2: a2,
        },
    )
}

/// `Split`: one `A` node becomes two `A` nodes joined by an `adjacent`
/// edge, each inheriting half the parent's `length`. External edges attach
/// to the first child.
pub fn split_rules() -> (RuleSet, SplitRule) {
    let (lhs, rhs, ids) = split_rule_parts();
    let rule = Rule::new("Split", lhs, rhs)
        .bind_boundary(ids.lhs_a, ids.rhs_a1)
        .transfer(
            ids.rhs_a1,
            "length",
            AttrExpr::div(AttrExpr::matched(ids.lhs_a, "length"), AttrExpr::value(2.0)),
        )
        .transfer(ids.rhs_a2, "length", AttrExpr::fresh(ids.rhs_a1, "length"));
    let mut rules = RuleSet::new();
    rules.add(rule).unwrap();
    (rules, ids)
}

/// Like [`split_rules`], but guarded by `length > 1`, so a derivation from
/// any finite length terminates.
pub fn halving_rules() -> (RuleSet, SplitRule) {
    let (lhs, rhs, ids) = split_rule_parts();
    let rule = Rule::new("Halve", lhs, rhs)
        .bind_boundary(ids.lhs_a, ids.rhs_a1)
        .guard(GuardExpr::Gt(
            AttrExpr::matched(ids.lhs_a, "length"),
            AttrExpr::value(1.0),
        ))
        .transfer(
            ids.rhs_a1,
            "length",
            AttrExpr::div(AttrExpr::matched(ids.lhs_a, "length"), AttrExpr::value(2.0)),
        )
        .transfer(ids.rhs_a2, "length", AttrExpr::fresh(ids.rhs_a1, "length"));
    let mut rules = RuleSet::new();
    rules.add(rule).unwrap();
    (rules, ids)
}

pub fn scalar(graph: &ShapeGraph, node: NodeId, name: &str) -> f64 {
    match graph.node_attr(node, name) {
        Some(AttrValue::Scalar(s)) => *s,
        other => panic!("expected scalar `{name}` on {node:?}, got {other:?}"),
    }
}
