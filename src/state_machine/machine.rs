//! Transition table evaluator
//!
//! `step` scans the current state's transitions in declaration order and
//! fires the first one whose predicate accepts. The callback output replaces
//! the input and the scan repeats from the destination state, so a single
//! event can cascade through several states. The loop halts when nothing
//! matches. A callback error aborts the whole step: the caller keeps the
//! pre-step state and gets the original input back.

use super::transition::Transition;
use crate::error::CallbackError;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Upper bound on chained hops within one step; more indicates a cycle
pub const MAX_HOPS: usize = 64;

/// Successful result of a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<I> {
    /// State after the last matching transition
    pub state: String,
    /// Output of the last callback (or the untouched input)
    pub output: I,
    /// Number of transitions taken
    pub hops: usize,
}

/// A callback failed; no state change applies
#[derive(Debug, Clone, PartialEq)]
pub struct StepError<I> {
    /// State the step started from
    pub state: String,
    /// Input the step was called with
    pub input: I,
    pub error: CallbackError,
}

impl<I> fmt::Display for StepError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step from {}: {}", self.state, self.error)
    }
}

impl<I: fmt::Debug> std::error::Error for StepError<I> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Immutable transition table, grouped by source state
pub struct TransitionTable<C, I> {
    initial: String,
    by_source: HashMap<String, Vec<Transition<C, I>>>,
    states: BTreeSet<String>,
}

impl<C, I: Clone> TransitionTable<C, I> {
    pub fn new(
        initial: impl Into<String>,
        transitions: impl IntoIterator<Item = Transition<C, I>>,
    ) -> Self {
        let initial = initial.into();
        let mut states = BTreeSet::from([initial.clone()]);
        let mut by_source: HashMap<String, Vec<Transition<C, I>>> = HashMap::new();
        for tr in transitions {
            states.insert(tr.source.clone());
            states.insert(tr.destination.clone());
            by_source.entry(tr.source.clone()).or_default().push(tr);
        }
        Self {
            initial,
            by_source,
            states,
        }
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Whether `state` appears anywhere in the table
    pub fn contains_state(&self, state: &str) -> bool {
        self.states.contains(state)
    }

    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(String::as_str)
    }

    pub fn transitions_from(&self, state: &str) -> &[Transition<C, I>] {
        self.by_source
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Advance from `state` with `input`, chaining until no predicate matches
    pub fn step(&self, state: &str, ctx: &mut C, input: I) -> Result<Step<I>, StepError<I>> {
        let original = input.clone();
        let mut current = state.to_string();
        let mut value = input;
        let mut hops = 0;

        loop {
            let Some(tr) = self
                .transitions_from(&current)
                .iter()
                .find(|tr| tr.accepts(ctx, &current, &value))
            else {
                return Ok(Step {
                    state: current,
                    output: value,
                    hops,
                });
            };

            if hops == MAX_HOPS {
                return Err(StepError {
                    state: state.to_string(),
                    input: original,
                    error: CallbackError::fatal(format!(
                        "transition chain exceeded {MAX_HOPS} hops at state {current}"
                    )),
                });
            }

            if let Some(callback) = &tr.callback {
                value = match callback(ctx, value) {
                    Ok(output) => output,
                    Err(error) => {
                        return Err(StepError {
                            state: state.to_string(),
                            input: original,
                            error,
                        });
                    }
                };
            }
            current.clone_from(&tr.destination);
            hops += 1;
        }
    }
}

/// A table plus the current state of one instance
pub struct Machine<C, I> {
    table: Arc<TransitionTable<C, I>>,
    state: String,
}

impl<C, I: Clone> Machine<C, I> {
    /// Start at the table's initial state
    pub fn new(table: Arc<TransitionTable<C, I>>) -> Self {
        let state = table.initial().to_string();
        Self { table, state }
    }

    /// Resume at `state`; `None` if the table does not declare it
    pub fn resume(table: Arc<TransitionTable<C, I>>, state: &str) -> Option<Self> {
        table.contains_state(state).then(|| Self {
            table,
            state: state.to_string(),
        })
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn table(&self) -> &Arc<TransitionTable<C, I>> {
        &self.table
    }

    /// Step the machine; state advances only on success
    pub fn run(&mut self, ctx: &mut C, input: I) -> Result<Step<I>, StepError<I>> {
        let step = self.table.step(&self.state, ctx, input)?;
        self.state.clone_from(&step.state);
        Ok(step)
    }

    /// Rewind to a state previously observed on this machine
    pub(crate) fn restore(&mut self, state: String) {
        debug_assert!(self.table.contains_state(&state));
        self.state = state;
    }
}
