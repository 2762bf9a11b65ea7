use itertools::Itertools;

use super::{Acceptance, Automaton, StateId};
use crate::Show;

/// Helper struct for the construction of automata, mainly in tests and collaborating tools.
/// It stores a list of transitions and a list of classifications; states are referred to by
/// plain integers which become the [`StateId`]s of the built automaton.
///
/// # Example
///
/// We want to create an automaton with two states 0 and 1 over the alphabet `['a', 'b']`,
/// where both states accept, state 0 is initial, and the transitions are
/// 0 --a--> 1, 1 --a--> 0 and 1 --b--> 1:
///
/// ```
/// use automata_augment::prelude::*;
///
/// let aut = AutomatonBuilder::default()
///     .default_acceptance(Acceptance::Accept)
///     .with_transitions([(0, 'a', 1), (1, 'a', 0), (1, 'b', 1)])
///     .into_automaton(0);
/// assert_eq!(aut.size(), 2);
/// ```
#[derive(Default)]
pub struct AutomatonBuilder {
    edges: Vec<(u32, char, u32)>,
    acceptance: Vec<(u32, Acceptance)>,
    default: Option<Acceptance>,
}

impl AutomatonBuilder {
    /// Sets the classification used for states that have none specified.
    pub fn default_acceptance(mut self, acceptance: Acceptance) -> Self {
        self.default = Some(acceptance);
        self
    }

    /// Adds a list of classifications, assigned to the states in the order in which they are
    /// given: passing `[Accept, Reject]` classifies state 0 as accepting and state 1 as
    /// rejecting.
    pub fn with_acceptance<I: IntoIterator<Item = Acceptance>>(self, iter: I) -> Self {
        iter.into_iter()
            .enumerate()
            .fold(self, |acc, (i, a)| acc.classify(i as u32, a))
    }

    /// Assigns the given classification to the state with index `idx`.
    pub fn classify(mut self, idx: u32, acceptance: Acceptance) -> Self {
        assert!(self.acceptance.iter().all(|(q, _)| *q != idx));
        self.acceptance.push((idx, acceptance));
        self
    }

    /// Adds a list of transitions, given as `(source, symbol, target)` tuples. The transitions
    /// are added in the order in which they are given.
    pub fn with_transitions<I: IntoIterator<Item = (u32, char, u32)>>(mut self, iter: I) -> Self {
        self.edges.extend(iter);
        self
    }

    /// Builds the automaton and designates the state with index `initial` as initial. States
    /// are created densely from 0 up to the largest index mentioned by any transition or
    /// classification. Panics if some state ends up without a classification and no default was
    /// given, or if the transitions are not deterministic.
    pub fn into_automaton(self, initial: u32) -> Automaton {
        let bound = self
            .edges
            .iter()
            .flat_map(|(q, _, p)| [*q, *p])
            .chain(self.acceptance.iter().map(|(q, _)| *q))
            .chain(std::iter::once(initial))
            .max()
            .expect("at least the initial state must be mentioned");

        let classification = |idx: u32| {
            self.acceptance
                .iter()
                .find_map(|(q, a)| if *q == idx { Some(*a) } else { None })
                .or(self.default)
                .unwrap_or_else(|| {
                    panic!(
                        "default is needed as some states (specifically {}) have no classification",
                        StateId(idx).show()
                    )
                })
        };

        let mut aut = Automaton::new(classification(0));
        for idx in 1..=bound {
            let id = aut.add_state(classification(idx));
            debug_assert_eq!(id, StateId(idx));
        }
        for (source, symbol, target) in self.edges.iter().copied().dedup() {
            aut.set_transition(StateId(source), symbol, StateId(target))
                .expect("builder transitions must be deterministic");
        }
        aut.set_initial(StateId(initial));
        aut
    }
}
