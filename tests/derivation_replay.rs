mod util;

use shapegram::{DerivationController, WeightedRandomPolicy};
use util::{halving_rules, segment_axiom};

#[test_log::test]
fn replaying_the_log_reproduces_the_final_graph() {
    let (rules, _) = halving_rules();
    let (axiom, _) = segment_axiom(16.0);

    let mut controller = DerivationController::new(&rules, axiom);
    let applied = controller.run(0).unwrap();
    assert!(applied > 0);

    let log = controller.log();
    let replayed = log.replay(&rules).unwrap();
    assert!(replayed.structurally_eq(controller.graph()));

    // Replaying a prefix reproduces every intermediate state of a second,
    // step-by-step run.
    let mut stepwise = DerivationController::new(&rules, log.axiom().clone());
    for n in 0..=log.len() {
        let prefix = log.replay_to(&rules, n).unwrap();
        assert!(prefix.structurally_eq(stepwise.graph()));
        if n < log.len() {
            stepwise.step().unwrap();
        }
    }
}

#[test_log::test]
fn seeded_random_derivations_are_reproducible() {
    let (rules, _) = halving_rules();

    let run = |seed: u64| {
        let (axiom, _) = segment_axiom(16.0);
        let mut controller = DerivationController::new(&rules, axiom)
            .with_policy(WeightedRandomPolicy::seeded(seed));
        controller.run(0).unwrap();
        controller
    };

    let first = run(7);
    let second = run(7);
    assert_eq!(first.log().len(), second.log().len());
    assert!(first.graph().structurally_eq(second.graph()));
    for (a, b) in first.log().steps().iter().zip(second.log().steps()) {
        assert_eq!(a, b);
    }

    // And the random run's log replays exactly, like the deterministic one.
    let replayed = first.log().replay(&rules).unwrap();
    assert!(replayed.structurally_eq(first.graph()));
}

#[test_log::test]
fn undo_rewinds_and_the_derivation_can_continue() {
    let (rules, _) = halving_rules();
    let (axiom, _) = segment_axiom(16.0);

    let mut controller = DerivationController::new(&rules, axiom.clone());
    controller.run(3).unwrap();
    assert_eq!(controller.log().len(), 3);
    let after_one = controller.log().replay_to(&rules, 1).unwrap();

    controller.undo_to(1).unwrap();
    assert_eq!(controller.log().len(), 1);
    assert!(controller.graph().structurally_eq(&after_one));

    // Undo to the axiom itself.
    let mut rewound = DerivationController::new(&rules, axiom.clone());
    rewound.run(2).unwrap();
    rewound.undo_to(0).unwrap();
    assert!(rewound.graph().structurally_eq(&axiom));
    assert!(rewound.log().is_empty());

    // The derivation keeps going from the rewound state.
    controller.run(0).unwrap();
    controller.graph().validate().unwrap();
    assert!(controller.log().len() > 1);
}

#[test_log::test]
fn undo_past_the_log_is_an_error() {
    let (rules, _) = halving_rules();
    let (axiom, _) = segment_axiom(4.0);
    let mut controller = DerivationController::new(&rules, axiom);
    controller.run(1).unwrap();
    assert!(controller.undo_to(5).is_err());
    // The failed undo left everything in place.
    assert_eq!(controller.log().len(), 1);
}
