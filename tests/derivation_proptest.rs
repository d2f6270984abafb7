mod util;

use proptest::prelude::*;
use shapegram::{DerivationController, WeightedRandomPolicy};
use util::{halving_rules, segment_axiom};

proptest! {
    /// Any seeded random derivation keeps the host graph structurally valid
    /// (no dangling edges, no forbidden parallel edges), grows the log by
    /// exactly one entry per applied step, and replays to the same graph.
    #[test]
    fn random_derivations_preserve_validity(
        seed in any::<u64>(),
        steps in 0usize..12,
        length in 1.0f64..64.0,
    ) {
        let (rules, _) = halving_rules();
        let (axiom, _) = segment_axiom(length);
        let mut controller = DerivationController::new(&rules, axiom)
            .with_policy(WeightedRandomPolicy::seeded(seed));
        let applied = controller.run(steps).unwrap();
        prop_assert!(steps == 0 || applied <= steps);
        prop_assert_eq!(controller.log().len(), applied);

        controller.graph().validate().unwrap();
        for (_, (s, t), _) in controller.graph().edges() {
            prop_assert!(controller.graph().contains_node(s));
            prop_assert!(controller.graph().contains_node(t));
        }

        let replayed = controller.log().replay(&rules).unwrap();
        prop_assert!(replayed.structurally_eq(controller.graph()));
    }
}
