//! An attributed-graph-grammar rewriting engine for procedural 2D shape
//! modelling.
//!
//! A host graph describing shape topology and geometry is rewritten by
//! production rules: each rule matches an LHS pattern ([`find_matches`]),
//! replaces the matched interior with a fresh RHS instance, re-embeds the
//! surviving external edges through the rule's interface mapping, and
//! derives new attributes with pure transfer expressions
//! ([`rewrite::apply`]). A [`DerivationController`] repeats this under a
//! pluggable selection policy and records every step in a replayable
//! [`DerivationLog`].
//!
//! The engine is a pure transformation over graph state: no rendering, no
//! file formats (beyond optional serde derives), no UI coupling. Rewrites
//! are atomic — a failed step leaves the host graph untouched — and a
//! derivation is single-threaded over its graph; match iterators borrow the
//! host immutably, so no rewrite can start while a search is in progress.
//!
//! # Example
//!
//! Splitting a segment in half, the smallest useful grammar:
//!
//! ```
//! use shapegram::{AttrExpr, DerivationController, Edge, Node, Rule, RuleSet, ShapeGraph};
//!
//! let mut axiom = ShapeGraph::new();
//! let root = axiom.add_node(Node::new("A"));
//! axiom.node_mut(root).unwrap().set_attr("length", 10.0);
//!
//! let mut lhs = ShapeGraph::new();
//! let a = lhs.add_node(Node::new("A"));
//!
//! let mut rhs = ShapeGraph::new();
//! let a1 = rhs.add_node(Node::new("A"));
//! let a2 = rhs.add_node(Node::new("A"));
//! rhs.add_edge(a1, a2, Edge::undirected("adjacent")).unwrap();
//!
//! let mut rules = RuleSet::new();
//! rules
//!     .add(
//!         Rule::new("Split", lhs, rhs)
//!             .bind_boundary(a, a1)
//!             .transfer(
//!                 a1,
//!                 "length",
//!                 AttrExpr::div(AttrExpr::matched(a, "length"), AttrExpr::value(2.0)),
//!             )
//!             .transfer(a2, "length", AttrExpr::fresh(a1, "length")),
//!     )
//!     .unwrap();
//!
//! let mut controller = DerivationController::new(&rules, axiom);
//! controller.run(1).unwrap();
//!
//! assert_eq!(controller.graph().node_count(), 2);
//! assert_eq!(controller.graph().edge_count(), 1);
//! assert_eq!(controller.log().len(), 1);
//! ```

pub mod attr;
pub mod derivation;
pub mod expr;
pub mod geometry;
pub mod graph;
pub mod matcher;
pub mod rewrite;
pub mod rule;
pub mod util;

pub use attr::{AttrName, AttrValue, EdgeKind, Symbol, TypeTag};
pub use derivation::{
    CandidateMatches, ControllerState, DerivationController, DerivationError, DerivationLog,
    DerivationResult, InteractivePolicy, Pending, PriorityPolicy, SelectionPolicy, StepResult,
    WeightedRandomPolicy,
};
pub use expr::{AttrExpr, ElemRef, EvalError, GuardExpr};
pub use geometry::Vec2;
pub use graph::{DotCollector, Edge, EdgeId, GraphError, Node, NodeId, Orientation, ShapeGraph};
pub use matcher::{Match, MatchBudget, Matches, find_matches, find_rule_matches};
pub use rewrite::{DerivationStep, GraphDelta, RewriteError, RewriteResult};
pub use rule::{GrammarConfig, InvalidRuleDefinition, Rule, RuleId, RuleName, RuleSet, Transfer};
