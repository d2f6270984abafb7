//! Production rules and the grammar that owns them.
//!
//! A rule is declarative data: an LHS pattern graph, an RHS replacement
//! graph, the interface mapping that re-embeds boundary connections, pure
//! attribute-transfer expressions, and guard predicates. [`RuleSet::add`]
//! validates all of it once, at load time — a rule that passes can never
//! fail structurally during application, only on attribute evaluation.

use crate::attr::AttrName;
use crate::expr::{AttrExpr, ElemRef, GuardExpr};
use crate::graph::{NodeId, ShapeGraph};
use crate::interned_string_newtype;
use crate::util::InternString;
use internment::Intern;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// The name of a production rule.
#[derive(derive_more::Debug, Clone, PartialEq, Eq, Hash, Copy)]
#[debug("{_0}")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuleName(pub InternString);
interned_string_newtype!(RuleName);

/// Index of a rule within its [`RuleSet`], in declaration order.
pub type RuleId = usize;

/// Grammar-level configuration knobs left to the grammar designer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GrammarConfig {
    /// Permit multiple edges with the same endpoint pair and kind.
    pub allow_parallel_edges: bool,
    /// Report matches that only differ by a pattern automorphism. Off by
    /// default: symmetric patterns otherwise flood selection with
    /// interchangeable matches.
    pub keep_automorphic_matches: bool,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        GrammarConfig {
            allow_parallel_edges: false,
            keep_automorphic_matches: false,
        }
    }
}

/// One attribute-transfer function: compute `expr` and store it as the
/// `target` attribute of an RHS element.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transfer {
    pub target: (ElemRef, AttrName),
    pub expr: AttrExpr,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidRuleDefinition {
    #[error("rule `{0:?}` is already defined")]
    DuplicateRuleName(RuleName),
    #[error("boundary node {0:?} is not part of the LHS pattern")]
    UnknownBoundarySource(NodeId),
    #[error("boundary counterpart {0:?} is not part of the RHS graph")]
    UnknownBoundaryTarget(NodeId),
    #[error("RHS node {0:?} is the counterpart of more than one boundary node")]
    DuplicateBoundaryTarget(NodeId),
    #[error("transfer target {0:?} is not part of the RHS graph")]
    UnknownTransferTarget(ElemRef),
    #[error("attribute `{1:?}` of {0:?} has more than one transfer function")]
    DuplicateTransferTarget(ElemRef, AttrName),
    #[error("expression references {0:?}, which is not part of the LHS pattern")]
    UnknownMatchedRef(ElemRef),
    #[error("expression reads `{1:?}` of RHS element {0:?}, which no transfer produces and the RHS template does not carry")]
    UnknownFreshRef(ElemRef, AttrName),
    #[error("guard predicates may only read matched LHS attributes")]
    GuardReadsFreshState,
    #[error("attribute-transfer functions depend on each other cyclically: {0:?}")]
    TransferCycle(Vec<(ElemRef, AttrName)>),
}

/// A production rule. Build one with [`Rule::new`] and the chained
/// configuration methods, then hand it to [`RuleSet::add`] for validation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rule {
    name: RuleName,
    lhs: ShapeGraph,
    rhs: ShapeGraph,
    /// Boundary LHS node → its RHS counterpart inheriting the external
    /// connections.
    #[cfg_attr(feature = "serde", serde(with = "serde_json_any_key::any_key_map"))]
    interface: HashMap<NodeId, NodeId>,
    transfers: Vec<Transfer>,
    /// Indices into `transfers` in dependency order; computed by
    /// [`RuleSet::add`].
    transfer_order: Vec<usize>,
    guards: Vec<GuardExpr>,
    weight: u32,
}

impl Rule {
    pub fn new(name: impl Into<RuleName>, lhs: ShapeGraph, rhs: ShapeGraph) -> Self {
        Rule {
            name: name.into(),
            lhs,
            rhs,
            interface: HashMap::new(),
            transfers: Vec::new(),
            transfer_order: Vec::new(),
            guards: Vec::new(),
            weight: 1,
        }
    }

    /// Marks `lhs_node` as a boundary node whose external edges survive the
    /// rewrite attached to `rhs_node`.
    pub fn bind_boundary(mut self, lhs_node: NodeId, rhs_node: NodeId) -> Self {
        self.interface.insert(lhs_node, rhs_node);
        self
    }

    /// Adds an attribute-transfer function for one RHS attribute.
    pub fn transfer(
        mut self,
        elem: impl Into<ElemRef>,
        attr: impl Into<AttrName>,
        expr: AttrExpr,
    ) -> Self {
        self.transfers.push(Transfer {
            target: (elem.into(), attr.into()),
            expr,
        });
        self
    }

    pub fn guard(mut self, guard: GuardExpr) -> Self {
        self.guards.push(guard);
        self
    }

    /// Selection weight for the weighted-random policy. Defaults to 1.
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn name(&self) -> RuleName {
        self.name
    }

    pub fn lhs(&self) -> &ShapeGraph {
        &self.lhs
    }

    pub fn rhs(&self) -> &ShapeGraph {
        &self.rhs
    }

    pub fn interface(&self) -> &HashMap<NodeId, NodeId> {
        &self.interface
    }

    /// The RHS counterpart of a boundary LHS node, if it is one.
    pub fn boundary_counterpart(&self, lhs_node: NodeId) -> Option<NodeId> {
        self.interface.get(&lhs_node).copied()
    }

    pub fn guards(&self) -> &[GuardExpr] {
        &self.guards
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn rule_weight(&self) -> u32 {
        self.weight
    }

    /// Transfers in evaluation (dependency) order.
    pub(crate) fn ordered_transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.transfer_order.iter().map(|&i| &self.transfers[i])
    }

    fn contains_lhs(&self, elem: ElemRef) -> bool {
        match elem {
            ElemRef::Node(n) => self.lhs.contains_node(n),
            ElemRef::Edge(e) => self.lhs.contains_edge(e),
        }
    }

    fn contains_rhs(&self, elem: ElemRef) -> bool {
        match elem {
            ElemRef::Node(n) => self.rhs.contains_node(n),
            ElemRef::Edge(e) => self.rhs.contains_edge(e),
        }
    }

    fn rhs_template_attr(&self, elem: ElemRef, attr: AttrName) -> bool {
        match elem {
            ElemRef::Node(n) => self
                .rhs
                .node(n)
                .is_some_and(|node| node.attr(&attr).is_some()),
            ElemRef::Edge(e) => self
                .rhs
                .edge(e)
                .is_some_and(|edge| edge.attr(&attr).is_some()),
        }
    }

    /// Validates the rule and computes the transfer evaluation order.
    fn compile(&mut self) -> Result<(), InvalidRuleDefinition> {
        // Interface mapping: sources in LHS, targets in RHS, injective.
        let mut seen_targets = HashSet::new();
        for (&lhs_node, &rhs_node) in &self.interface {
            if !self.lhs.contains_node(lhs_node) {
                return Err(InvalidRuleDefinition::UnknownBoundarySource(lhs_node));
            }
            if !self.rhs.contains_node(rhs_node) {
                return Err(InvalidRuleDefinition::UnknownBoundaryTarget(rhs_node));
            }
            if !seen_targets.insert(rhs_node) {
                return Err(InvalidRuleDefinition::DuplicateBoundaryTarget(rhs_node));
            }
        }

        // Guards read matched state only.
        for guard in &self.guards {
            let mut exprs = Vec::new();
            guard.exprs(&mut exprs);
            for expr in exprs {
                let mut fresh = Vec::new();
                expr.fresh_refs(&mut fresh);
                if !fresh.is_empty() {
                    return Err(InvalidRuleDefinition::GuardReadsFreshState);
                }
                self.check_matched_refs(expr)?;
            }
        }

        // Transfer targets: unique, on RHS elements.
        let mut targets = HashSet::new();
        for t in &self.transfers {
            let (elem, attr) = t.target;
            if !self.contains_rhs(elem) {
                return Err(InvalidRuleDefinition::UnknownTransferTarget(elem));
            }
            if !targets.insert((elem, attr)) {
                return Err(InvalidRuleDefinition::DuplicateTransferTarget(elem, attr));
            }
            self.check_matched_refs(&t.expr)?;
        }

        // Fresh references must resolve to another transfer's target or to an
        // attribute already on the RHS template.
        for t in &self.transfers {
            let mut fresh = Vec::new();
            t.expr.fresh_refs(&mut fresh);
            for (elem, attr) in fresh {
                if !targets.contains(&(elem, attr)) && !self.rhs_template_attr(elem, attr) {
                    return Err(InvalidRuleDefinition::UnknownFreshRef(elem, attr));
                }
            }
        }

        self.transfer_order = self.topo_sort_transfers()?;
        Ok(())
    }

    fn check_matched_refs(&self, expr: &AttrExpr) -> Result<(), InvalidRuleDefinition> {
        let mut matched = Vec::new();
        expr.matched_refs(&mut matched);
        for (elem, _) in matched {
            if !self.contains_lhs(elem) {
                return Err(InvalidRuleDefinition::UnknownMatchedRef(elem));
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over the fresh-reference dependency graph among
    /// transfer targets. Deterministic: ready transfers run in declaration
    /// order.
    fn topo_sort_transfers(&self) -> Result<Vec<usize>, InvalidRuleDefinition> {
        let n = self.transfers.len();
        let target_index: HashMap<(ElemRef, AttrName), usize> = self
            .transfers
            .iter()
            .enumerate()
            .map(|(i, t)| (t.target, i))
            .collect();

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, t) in self.transfers.iter().enumerate() {
            let mut fresh = Vec::new();
            t.expr.fresh_refs(&mut fresh);
            for key in fresh {
                // Template attributes are always available; only references
                // to other transfer targets order the evaluation.
                if let Some(&j) = target_index.get(&key)
                    && j != i
                {
                    deps[i].push(j);
                    dependents[j].push(i);
                } else if target_index.get(&key) == Some(&i) {
                    // Self-reference is the smallest cycle.
                    return Err(InvalidRuleDefinition::TransferCycle(vec![t.target]));
                }
            }
        }

        let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
        let mut order = Vec::with_capacity(n);
        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        while let Some(i) = ready.first().copied() {
            ready.remove(0);
            order.push(i);
            for &k in &dependents[i] {
                in_degree[k] -= 1;
                if in_degree[k] == 0 {
                    ready.push(k);
                }
            }
        }
        if order.len() != n {
            let cyclic = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.transfers[i].target)
                .collect();
            return Err(InvalidRuleDefinition::TransferCycle(cyclic));
        }
        Ok(order)
    }
}

/// The grammar: rules in declaration order plus shared configuration.
///
/// Rules that fail validation are excluded and reported; the remaining rules
/// stay usable.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuleSet {
    rules: Vec<Rule>,
    by_name: HashMap<RuleName, RuleId>,
    config: GrammarConfig,
}

impl RuleSet {
    pub fn new() -> Self {
        RuleSet::with_config(GrammarConfig::default())
    }

    pub fn with_config(config: GrammarConfig) -> Self {
        RuleSet {
            rules: Vec::new(),
            by_name: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &GrammarConfig {
        &self.config
    }

    /// A fresh graph honoring the grammar's parallel-edge setting. Axioms
    /// and rule-side graphs built with this constructor cannot disagree with
    /// the grammar about edge multiplicity.
    pub fn new_graph(&self) -> ShapeGraph {
        if self.config.allow_parallel_edges {
            ShapeGraph::with_parallel_edges()
        } else {
            ShapeGraph::new()
        }
    }

    /// Validates and adds a rule. On error the set is unchanged.
    pub fn add(&mut self, mut rule: Rule) -> Result<RuleId, InvalidRuleDefinition> {
        if self.by_name.contains_key(&rule.name) {
            return Err(InvalidRuleDefinition::DuplicateRuleName(rule.name));
        }
        rule.compile()?;
        let id = self.rules.len();
        self.by_name.insert(rule.name, id);
        self.rules.push(rule);
        Ok(id)
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id)
    }

    pub fn rule_by_name(&self, name: impl Into<RuleName>) -> Option<(RuleId, &Rule)> {
        let id = *self.by_name.get(&name.into())?;
        Some((id, &self.rules[id]))
    }

    /// Rules in declaration (priority) order.
    pub fn iter(&self) -> impl Iterator<Item = (RuleId, &Rule)> {
        self.rules.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
