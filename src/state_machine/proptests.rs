//! Property-based tests for the transition table evaluator
//!
//! These tests verify key invariants hold across generated tables and inputs.

use super::*;
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

const STATES: [&str; 4] = ["s0", "s1", "s2", "s3"];

/// Data describing one generated transition
#[derive(Debug, Clone)]
struct Rule {
    source: usize,
    destination: usize,
    modulus: u8,
    residue: u8,
    mul: u8,
    add: u8,
}

type Log = Vec<(usize, u8)>;

fn build(rules: &[Rule]) -> TransitionTable<Log, u8> {
    let transitions = rules.iter().enumerate().map(|(index, rule)| {
        let Rule {
            modulus,
            residue,
            mul,
            add,
            ..
        } = rule.clone();
        Transition::new(STATES[rule.source], STATES[rule.destination])
            .when(move |_: &Log, _: &str, input: &u8| input % modulus == residue % modulus)
            .then(move |log: &mut Log, input: u8| {
                log.push((index, input));
                Ok(input.wrapping_mul(mul).wrapping_add(add))
            })
    });
    TransitionTable::new(STATES[0], transitions)
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_rule() -> impl Strategy<Value = Rule> {
    (0..STATES.len(), 0..STATES.len(), 1u8..6, any::<u8>(), any::<u8>(), any::<u8>()).prop_map(
        |(source, destination, modulus, residue, mul, add)| Rule {
            source,
            destination,
            modulus,
            residue,
            mul,
            add,
        },
    )
}

fn arb_rules() -> impl Strategy<Value = Vec<Rule>> {
    proptest::collection::vec(arb_rule(), 0..12)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Same table, same start state, same inputs: same states, outputs and callback log
    #[test]
    fn prop_step_is_deterministic(
        rules in arb_rules(),
        start in 0..STATES.len(),
        inputs in proptest::collection::vec(any::<u8>(), 1..8),
    ) {
        let run = || {
            let table = build(&rules);
            let mut log = Log::new();
            let mut state = STATES[start].to_string();
            let mut results = Vec::new();
            for input in &inputs {
                let result = table.step(&state, &mut log, *input);
                if let Ok(step) = &result {
                    state.clone_from(&step.state);
                }
                results.push(result);
            }
            (results, log, state)
        };
        prop_assert_eq!(run(), run());
    }

    /// Two transitions accepting the same input: the one declared first fires
    #[test]
    fn prop_first_declared_match_wins(input in any::<u8>(), specific_first in any::<bool>()) {
        let specific = Transition::new("s0", "specific")
            .when(move |_: &Log, _: &str, i: &u8| *i == input)
            .then(|_: &mut Log, i: u8| Ok(i));
        let catch_all = Transition::new("s0", "catch_all").then(|_: &mut Log, i: u8| Ok(i));

        let (ordered, expected) = if specific_first {
            (vec![specific, catch_all], "specific")
        } else {
            (vec![catch_all, specific], "catch_all")
        };
        let table = TransitionTable::new("s0", ordered);
        let step = table.step("s0", &mut Log::new(), input).unwrap();
        prop_assert_eq!(step.state, expected);
        prop_assert_eq!(step.hops, 1);
    }

    /// A state with no accepting transition returns the input and leaves state alone
    #[test]
    fn prop_no_match_is_passthrough(rules in arb_rules(), input in any::<u8>()) {
        // Only keep rules that cannot accept `input` from s0
        let rules: Vec<Rule> = rules
            .into_iter()
            .filter(|r| r.source != 0 || input % r.modulus != r.residue % r.modulus)
            .collect();
        let table = build(&rules);
        let mut log = Log::new();
        let step = table.step("s0", &mut log, input).unwrap();
        prop_assert_eq!(step.state, "s0");
        prop_assert_eq!(step.output, input);
        prop_assert_eq!(step.hops, 0);
        prop_assert!(log.is_empty());
    }

    /// Every reachable state is declared by the table
    #[test]
    fn prop_states_stay_within_table(rules in arb_rules(), input in any::<u8>()) {
        let table = build(&rules);
        if let Ok(step) = table.step("s0", &mut Log::new(), input) {
            prop_assert!(table.contains_state(&step.state));
        }
    }

    /// Errors abort without a state change and hand back the original input
    #[test]
    fn prop_errors_restore_input(input in any::<u8>(), depth in 0usize..4) {
        let mut transitions: Vec<Transition<Log, u8>> = (0..depth)
            .map(|i| {
                Transition::new(STATES[i], STATES[i + 1])
                    .then(|_: &mut Log, i: u8| Ok(i.wrapping_add(1)))
            })
            .collect();
        transitions.push(
            Transition::new(STATES[depth], "broken")
                .then(|_: &mut Log, _: u8| Err(crate::error::CallbackError::bad_input("rejected"))),
        );
        let mut machine = Machine::new(std::sync::Arc::new(TransitionTable::new("s0", transitions)));
        let err = machine.run(&mut Log::new(), input).unwrap_err();
        prop_assert_eq!(err.input, input);
        prop_assert_eq!(err.state, "s0");
        prop_assert_eq!(machine.state(), "s0");
    }
}
