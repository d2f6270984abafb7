//! Orchestration of rewrite steps over a single host graph.
//!
//! The controller is a small state machine: *Idle* (no pending match),
//! *Matched* (a rule/match pair selected), *Terminal* (no rule applies).
//! Rule and match selection is a pluggable [`SelectionPolicy`]; the
//! interactive "ask the user" flow of a host UI is just another policy.
//! Every applied step is appended to a [`DerivationLog`], which replays
//! deterministically from the axiom and therefore doubles as the undo
//! mechanism.

use crate::graph::ShapeGraph;
use crate::matcher::{Match, MatchBudget, find_rule_matches};
use crate::rewrite::{self, DerivationStep};
use crate::rule::{RuleId, RuleName, RuleSet};
use crate::util::log;
use error_stack::{Report, ResultExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

pub type DerivationResult<T> = error_stack::Result<T, DerivationError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    /// The rewrite executor rejected the step; the host graph is unchanged.
    #[error("rewrite step failed")]
    Rewrite,
    /// A policy needed a complete match enumeration but the budget ran out.
    /// Recoverable: retry with a larger [`MatchBudget`].
    #[error("match enumeration exceeded its budget")]
    MatchBudgetExceeded,
    /// A log entry references a rule the rule set does not contain.
    #[error("unknown rule id {0}")]
    UnknownRule(RuleId),
    /// `commit` was called with no match pending.
    #[error("no rule/match pair is pending")]
    NothingPending,
    #[error("step {requested} is out of range; the log has {available} steps")]
    StepOutOfRange { requested: usize, available: usize },
}

/// A selected rule/match pair, not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    pub rule: RuleId,
    pub matched: Match,
}

/// Chooses the next rule/match pair to apply, or `None` when the derivation
/// is terminal.
pub trait SelectionPolicy {
    fn select(
        &mut self,
        rules: &RuleSet,
        host: &ShapeGraph,
        budget: MatchBudget,
    ) -> DerivationResult<Option<Pending>>;
}

/// Deterministic policy: rules in declaration order, first rule with at
/// least one match wins, and the matcher's first enumerated match is taken.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityPolicy;

impl SelectionPolicy for PriorityPolicy {
    fn select(
        &mut self,
        rules: &RuleSet,
        host: &ShapeGraph,
        budget: MatchBudget,
    ) -> DerivationResult<Option<Pending>> {
        for (rule_id, rule) in rules.iter() {
            let mut matches = find_rule_matches(rule, host, budget, rules.config());
            if let Some(matched) = matches.next() {
                return Ok(Some(Pending {
                    rule: rule_id,
                    matched,
                }));
            }
            if matches.truncated() {
                // The budget ran out before the first match; "inapplicable"
                // cannot be trusted.
                return Err(Report::new(DerivationError::MatchBudgetExceeded));
            }
        }
        Ok(None)
    }
}

/// Seeded random policy: a rule is drawn by weight among the rules with at
/// least one match, then one of its matches uniformly. The same seed over
/// the same grammar and axiom reproduces the same derivation.
#[derive(Debug, Clone)]
pub struct WeightedRandomPolicy {
    rng: StdRng,
}

impl WeightedRandomPolicy {
    pub fn seeded(seed: u64) -> Self {
        WeightedRandomPolicy {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SelectionPolicy for WeightedRandomPolicy {
    fn select(
        &mut self,
        rules: &RuleSet,
        host: &ShapeGraph,
        budget: MatchBudget,
    ) -> DerivationResult<Option<Pending>> {
        let candidates = enumerate_candidates(rules, host, budget)?;
        if candidates.is_empty() {
            return Ok(None);
        }
        // Weighted draw by cumulative weight; zero-weight rules still get a
        // minimal share so a configured rule can never be starved silently.
        let effective = |c: &CandidateMatches| u64::from(c.weight.max(1));
        let total: u64 = candidates.iter().map(effective).sum();
        let mut draw = self.rng.random_range(0..total);
        let chosen = candidates
            .iter()
            .find(|c| {
                let w = effective(c);
                if draw < w {
                    true
                } else {
                    draw -= w;
                    false
                }
            })
            .expect("internal error: cumulative weights exhausted");
        let match_idx = self.rng.random_range(0..chosen.matches.len());
        Ok(Some(Pending {
            rule: chosen.rule,
            matched: chosen.matches[match_idx].clone(),
        }))
    }
}

/// All matches of one rule against the current host, as presented to an
/// interactive chooser.
#[derive(Debug, Clone)]
pub struct CandidateMatches {
    pub rule: RuleId,
    pub name: RuleName,
    pub weight: u32,
    pub matches: Vec<Match>,
}

/// Policy that defers the choice to a callback, e.g. a UI asking the user.
/// The callback returns the index of a rule candidate and of one of its
/// matches; returning `None` ends the derivation.
pub struct InteractivePolicy {
    chooser: Box<dyn FnMut(&[CandidateMatches]) -> Option<(RuleId, usize)>>,
}

impl InteractivePolicy {
    pub fn new(
        chooser: impl FnMut(&[CandidateMatches]) -> Option<(RuleId, usize)> + 'static,
    ) -> Self {
        InteractivePolicy {
            chooser: Box::new(chooser),
        }
    }
}

impl SelectionPolicy for InteractivePolicy {
    fn select(
        &mut self,
        rules: &RuleSet,
        host: &ShapeGraph,
        budget: MatchBudget,
    ) -> DerivationResult<Option<Pending>> {
        let candidates = enumerate_candidates(rules, host, budget)?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let Some((rule_id, match_idx)) = (self.chooser)(&candidates) else {
            return Ok(None);
        };
        let chosen = candidates
            .iter()
            .find(|c| c.rule == rule_id)
            .ok_or_else(|| Report::new(DerivationError::UnknownRule(rule_id)))?;
        let matched = chosen
            .matches
            .get(match_idx)
            .ok_or_else(|| {
                Report::new(DerivationError::StepOutOfRange {
                    requested: match_idx,
                    available: chosen.matches.len(),
                })
            })?
            .clone();
        Ok(Some(Pending {
            rule: rule_id,
            matched,
        }))
    }
}

/// Full enumeration for the policies that need every option on the table.
fn enumerate_candidates(
    rules: &RuleSet,
    host: &ShapeGraph,
    budget: MatchBudget,
) -> DerivationResult<Vec<CandidateMatches>> {
    let mut candidates = Vec::new();
    for (rule_id, rule) in rules.iter() {
        let mut matches = find_rule_matches(rule, host, budget, rules.config());
        let collected: Vec<Match> = matches.by_ref().collect();
        if matches.truncated() {
            return Err(Report::new(DerivationError::MatchBudgetExceeded));
        }
        if !collected.is_empty() {
            candidates.push(CandidateMatches {
                rule: rule_id,
                name: rule.name(),
                weight: rule.rule_weight(),
                matches: collected,
            });
        }
    }
    Ok(candidates)
}

/// The append-only record of a derivation: the axiom snapshot plus every
/// applied step. Replay is exact, which makes the log the undo mechanism.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DerivationLog {
    axiom: ShapeGraph,
    steps: Vec<DerivationStep>,
}

impl DerivationLog {
    pub fn new(axiom: ShapeGraph) -> Self {
        DerivationLog {
            axiom,
            steps: Vec::new(),
        }
    }

    pub fn axiom(&self) -> &ShapeGraph {
        &self.axiom
    }

    pub fn steps(&self) -> &[DerivationStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn push(&mut self, step: DerivationStep) {
        self.steps.push(step);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.steps.truncate(len);
    }

    /// Reconstructs the graph after `to_step` steps by replaying from the
    /// axiom. `replay_to(rules, log.len())` reproduces the final graph;
    /// `replay_to(rules, 0)` is the axiom.
    pub fn replay_to(&self, rules: &RuleSet, to_step: usize) -> DerivationResult<ShapeGraph> {
        if to_step > self.steps.len() {
            return Err(Report::new(DerivationError::StepOutOfRange {
                requested: to_step,
                available: self.steps.len(),
            }));
        }
        let mut graph = self.axiom.clone();
        for step in &self.steps[..to_step] {
            let rule = rules
                .rule(step.rule)
                .ok_or_else(|| Report::new(DerivationError::UnknownRule(step.rule)))?;
            let (next, _) = rewrite::apply(rule, &step.matched, &graph, step.rule)
                .change_context(DerivationError::Rewrite)?;
            graph = next;
        }
        Ok(graph)
    }

    /// Replays the whole log.
    pub fn replay(&self, rules: &RuleSet) -> DerivationResult<ShapeGraph> {
        self.replay_to(rules, self.steps.len())
    }
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Matched,
    Terminal,
}

enum Phase {
    Idle,
    Matched(Pending),
    Terminal,
}

/// The result of one [`DerivationController::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// A rule fired; the log grew by one entry and the graph advanced.
    Applied { rule: RuleId, rule_name: RuleName },
    /// No rule has any applicable match. Not an error.
    Terminal,
}

/// Drives a derivation over one host graph: select (via the policy), apply
/// (via the rewrite executor), record, repeat.
pub struct DerivationController<'r> {
    rules: &'r RuleSet,
    host: ShapeGraph,
    log: DerivationLog,
    policy: Box<dyn SelectionPolicy>,
    budget: MatchBudget,
    phase: Phase,
}

impl<'r> DerivationController<'r> {
    /// A controller with the deterministic [`PriorityPolicy`] and no match
    /// budget.
    pub fn new(rules: &'r RuleSet, axiom: ShapeGraph) -> Self {
        DerivationController {
            rules,
            log: DerivationLog::new(axiom.clone()),
            host: axiom,
            policy: Box::new(PriorityPolicy),
            budget: MatchBudget::UNLIMITED,
            phase: Phase::Idle,
        }
    }

    pub fn with_policy(mut self, policy: impl SelectionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_budget(mut self, budget: MatchBudget) -> Self {
        self.budget = budget;
        self
    }

    /// The current host graph, for export to the rendering layer.
    pub fn graph(&self) -> &ShapeGraph {
        &self.host
    }

    pub fn log(&self) -> &DerivationLog {
        &self.log
    }

    pub fn into_log(self) -> DerivationLog {
        self.log
    }

    pub fn state(&self) -> ControllerState {
        match self.phase {
            Phase::Idle => ControllerState::Idle,
            Phase::Matched(_) => ControllerState::Matched,
            Phase::Terminal => ControllerState::Terminal,
        }
    }

    pub fn pending(&self) -> Option<&Pending> {
        match &self.phase {
            Phase::Matched(p) => Some(p),
            _ => None,
        }
    }

    /// Idle → Matched: asks the policy for the next rule/match pair.
    /// Returns the pending pair, or `None` once the derivation is terminal.
    /// Calling it again while a pair is pending returns that pair.
    pub fn propose(&mut self) -> DerivationResult<Option<&Pending>> {
        if matches!(self.phase, Phase::Idle) {
            match self.policy.select(self.rules, &self.host, self.budget)? {
                Some(pending) => self.phase = Phase::Matched(pending),
                None => {
                    log::debug!("no applicable rule; derivation is terminal");
                    self.phase = Phase::Terminal;
                }
            }
        }
        Ok(self.pending())
    }

    /// Matched → Applied (→ Idle): applies the pending pair. A rewrite
    /// failure leaves the graph untouched, drops the pending pair and
    /// returns the error; the caller may propose again.
    pub fn commit(&mut self) -> DerivationResult<StepResult> {
        let pending = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Terminal => {
                self.phase = Phase::Terminal;
                return Ok(StepResult::Terminal);
            }
            Phase::Idle => return Err(Report::new(DerivationError::NothingPending)),
            Phase::Matched(pending) => pending,
        };
        let rule = self
            .rules
            .rule(pending.rule)
            .ok_or_else(|| Report::new(DerivationError::UnknownRule(pending.rule)))?;
        let (graph, step) = rewrite::apply(rule, &pending.matched, &self.host, pending.rule)
            .change_context(DerivationError::Rewrite)?;
        self.host = graph;
        self.log.push(step);
        Ok(StepResult::Applied {
            rule: pending.rule,
            rule_name: rule.name(),
        })
    }

    /// One full rewrite step: propose, then apply.
    pub fn step(&mut self) -> DerivationResult<StepResult> {
        self.propose()?;
        match self.phase {
            Phase::Terminal => Ok(StepResult::Terminal),
            _ => self.commit(),
        }
    }

    /// Applies steps until the derivation is terminal or `max_steps` rules
    /// have fired; `max_steps == 0` means no bound. The first error stops
    /// the run and is surfaced; nothing is retried. Returns the number of
    /// steps applied.
    pub fn run(&mut self, max_steps: usize) -> DerivationResult<usize> {
        let mut applied = 0;
        loop {
            match self.step()? {
                StepResult::Terminal => break,
                StepResult::Applied { .. } => applied += 1,
            }
            if max_steps != 0 && applied >= max_steps {
                break;
            }
        }
        Ok(applied)
    }

    /// Rewinds the derivation to the state after `to_step` steps by
    /// replaying the log from the axiom, then truncates the log.
    pub fn undo_to(&mut self, to_step: usize) -> DerivationResult<()> {
        let graph = self.log.replay_to(self.rules, to_step)?;
        self.log.truncate(to_step);
        self.host = graph;
        self.phase = Phase::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use crate::rule::Rule;

    /// A rule replacing one `x` node by another; applicable forever, which
    /// is convenient for single-step policy tests.
    fn relabel_rule(name: &str) -> Rule {
        let mut lhs = ShapeGraph::new();
        let a = lhs.add_node(Node::new("x"));
        let mut rhs = ShapeGraph::new();
        let b = rhs.add_node(Node::new("x"));
        Rule::new(name, lhs, rhs).bind_boundary(a, b)
    }

    fn two_rule_set() -> RuleSet {
        let mut rules = RuleSet::new();
        rules.add(relabel_rule("first")).unwrap();
        rules.add(relabel_rule("second")).unwrap();
        rules
    }

    fn x_axiom(count: usize) -> ShapeGraph {
        let mut g = ShapeGraph::new();
        let nodes: Vec<_> = (0..count).map(|_| g.add_node(Node::new("x"))).collect();
        for pair in nodes.windows(2) {
            g.add_edge(pair[0], pair[1], Edge::directed("next")).unwrap();
        }
        g
    }

    #[test]
    fn priority_prefers_declaration_order() {
        let rules = two_rule_set();
        let mut controller = DerivationController::new(&rules, x_axiom(1));
        match controller.step().unwrap() {
            StepResult::Applied { rule_name, .. } => assert_eq!(rule_name, "first".into()),
            other => panic!("expected an applied step, got {other:?}"),
        }
    }

    #[test]
    fn propose_is_idempotent_until_commit() {
        let rules = two_rule_set();
        let mut controller = DerivationController::new(&rules, x_axiom(1));
        assert_eq!(controller.state(), ControllerState::Idle);
        let first = controller.propose().unwrap().cloned().unwrap();
        assert_eq!(controller.state(), ControllerState::Matched);
        let second = controller.propose().unwrap().cloned().unwrap();
        assert_eq!(first, second);
        controller.commit().unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.log().len(), 1);
    }

    #[test]
    fn commit_without_pending_is_an_error() {
        let rules = two_rule_set();
        let mut controller = DerivationController::new(&rules, x_axiom(1));
        let err = controller.commit().unwrap_err();
        assert_eq!(*err.current_context(), DerivationError::NothingPending);
    }

    #[test]
    fn interactive_policy_is_just_another_policy() {
        let rules = two_rule_set();
        let policy = InteractivePolicy::new(|candidates: &[CandidateMatches]| {
            // "The user" always picks the second rule's first match.
            let c = candidates.iter().find(|c| c.name == "second".into())?;
            Some((c.rule, 0))
        });
        let mut controller = DerivationController::new(&rules, x_axiom(1)).with_policy(policy);
        match controller.step().unwrap() {
            StepResult::Applied { rule_name, .. } => assert_eq!(rule_name, "second".into()),
            other => panic!("expected an applied step, got {other:?}"),
        }
    }

    #[test]
    fn declining_interactive_chooser_ends_the_derivation() {
        let rules = two_rule_set();
        let policy = InteractivePolicy::new(|_: &[CandidateMatches]| None);
        let mut controller = DerivationController::new(&rules, x_axiom(1)).with_policy(policy);
        assert_eq!(controller.step().unwrap(), StepResult::Terminal);
        assert_eq!(controller.state(), ControllerState::Terminal);
    }

    #[test]
    fn exhausted_budget_is_surfaced_not_swallowed() {
        let rules = two_rule_set();
        // Enumerating every match of every rule cannot finish in two steps.
        let mut controller = DerivationController::new(&rules, x_axiom(8))
            .with_policy(WeightedRandomPolicy::seeded(1))
            .with_budget(MatchBudget::max_search_steps(2));
        let err = controller.step().unwrap_err();
        assert_eq!(
            *err.current_context(),
            DerivationError::MatchBudgetExceeded
        );
    }

    #[test]
    fn terminal_state_is_sticky() {
        let rules = two_rule_set();
        // No `x` nodes at all: terminal immediately.
        let mut g = ShapeGraph::new();
        g.add_node(Node::new("y"));
        let mut controller = DerivationController::new(&rules, g);
        assert_eq!(controller.step().unwrap(), StepResult::Terminal);
        assert_eq!(controller.step().unwrap(), StepResult::Terminal);
        assert!(controller.pending().is_none());
    }
}
