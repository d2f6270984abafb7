mod util;

use shapegram::{
    AttrExpr, DerivationController, Edge, MatchBudget, Node, Rule, RuleSet, ShapeGraph,
    find_rule_matches, rewrite,
    rewrite::RewriteError,
};
use util::{segment_axiom, split_rules};

fn divide_by_attr_rules() -> RuleSet {
    // `length / divisor` fails when the matched divisor is zero.
    let mut lhs = ShapeGraph::new();
    let a = lhs.add_node(Node::new("A"));
    let mut rhs = ShapeGraph::new();
    let b = rhs.add_node(Node::new("B"));
    let rule = Rule::new("shrink", lhs, rhs).bind_boundary(a, b).transfer(
        b,
        "length",
        AttrExpr::div(
            AttrExpr::matched(a, "length"),
            AttrExpr::matched(a, "divisor"),
        ),
    );
    let mut rules = RuleSet::new();
    rules.add(rule).unwrap();
    rules
}

#[test_log::test]
fn failed_transfer_leaves_the_host_untouched() {
    let rules = divide_by_attr_rules();
    let (mut axiom, root) = segment_axiom(10.0);
    axiom.node_mut(root).unwrap().set_attr("divisor", 0.0);
    let other = axiom.add_node(Node::new("other"));
    axiom.add_edge(root, other, Edge::directed("linked")).unwrap();

    let before = axiom.clone();
    let mut controller = DerivationController::new(&rules, axiom);
    let err = controller.step().unwrap_err();
    assert!(matches!(
        err.current_context(),
        shapegram::DerivationError::Rewrite
    ));

    // Bit-for-bit unchanged host, no log entry, and the controller is back
    // in its idle state ready for another attempt.
    assert!(controller.graph().structurally_eq(&before));
    assert_eq!(controller.log().len(), 0);
    assert_eq!(controller.state(), shapegram::ControllerState::Idle);
}

#[test_log::test]
fn missing_attribute_also_aborts_atomically() {
    let rules = divide_by_attr_rules();
    // No `divisor` attribute at all.
    let (axiom, _) = segment_axiom(10.0);
    let before = axiom.clone();

    let (_, rule) = rules.rule_by_name("shrink").unwrap();
    let m = find_rule_matches(rule, &axiom, MatchBudget::UNLIMITED, rules.config())
        .next()
        .unwrap();
    let err = rewrite::apply(rule, &m, &axiom, 0).unwrap_err();
    assert!(matches!(
        err.current_context(),
        RewriteError::AttributeTransfer { .. }
    ));
    assert!(axiom.structurally_eq(&before));
}

#[test_log::test]
fn stale_matches_are_rejected() {
    let (rules, _) = split_rules();
    let (axiom, root) = segment_axiom(10.0);

    let (rule_id, rule) = rules.rule_by_name("Split").unwrap();
    let m = find_rule_matches(rule, &axiom, MatchBudget::UNLIMITED, rules.config())
        .next()
        .unwrap();

    // Mutate the graph after matching: the node the match points at is gone.
    let mut mutated = axiom.clone();
    mutated.remove_node(root);
    let err = rewrite::apply(rule, &m, &mutated, rule_id).unwrap_err();
    assert!(matches!(
        err.current_context(),
        RewriteError::StaleMatch(_)
    ));

    // Changing the node's type tag is enough to invalidate the match too.
    let mut retagged = axiom.clone();
    retagged.node_mut(root).unwrap().tag = "B".into();
    let err = rewrite::apply(rule, &m, &retagged, rule_id).unwrap_err();
    assert!(matches!(
        err.current_context(),
        RewriteError::StaleMatch(_)
    ));

    // Against the unchanged graph the same match still applies.
    assert!(rewrite::apply(rule, &m, &axiom, rule_id).is_ok());
}

#[test_log::test]
fn rewrite_failure_does_not_end_the_derivation() {
    // First rule always fails its transfer; a later rule applies cleanly.
    let mut lhs = ShapeGraph::new();
    let a = lhs.add_node(Node::new("A"));
    let mut rhs = ShapeGraph::new();
    let b = rhs.add_node(Node::new("B"));
    let failing = Rule::new("failing", lhs, rhs).bind_boundary(a, b).transfer(
        b,
        "length",
        AttrExpr::div(AttrExpr::value(1.0), AttrExpr::value(0.0)),
    );

    let mut lhs = ShapeGraph::new();
    let a = lhs.add_node(Node::new("A"));
    let mut rhs = ShapeGraph::new();
    let b = rhs.add_node(Node::new("B"));
    let sound = Rule::new("sound", lhs, rhs).bind_boundary(a, b);

    let mut rules = RuleSet::new();
    rules.add(failing).unwrap();
    rules.add(sound).unwrap();

    let (axiom, _) = segment_axiom(10.0);
    let mut controller = DerivationController::new(&rules, axiom);

    // Priority selects the failing rule; the step surfaces the error and
    // changes nothing.
    assert!(controller.step().is_err());
    assert_eq!(controller.log().len(), 0);

    // The caller decides what happens next; stepping again re-selects and
    // fails again rather than retrying forever behind the scenes.
    assert!(controller.step().is_err());
}
