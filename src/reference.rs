//! Merging a tentative automaton with a single reference automaton.
//!
//! The reference (or "maximal") automaton describes the full permitted and required behaviour of
//! the system under learning. [`augment`] explores the cross product of tentative and reference
//! states, cloning tentative states on demand whenever one of them is reached under a second
//! reference context, and reports disagreements between the two classifications. Depending on
//! configuration, disagreements are either conflicts or override points, and behaviour the
//! reference explicitly prohibits is materialized as fresh reject transitions.

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    automaton::{Acceptance, Automaton, StateId},
    config::AugmentationConfig,
    worklist::CrossProductWorklist,
    Map, Show,
};

/// A node of the cross-product exploration: a tentative state paired with the reference state it
/// is currently bound to. The reference side is `None` when a partial reference has been run off
/// its edge, i.e. the tentative automaton continues where the reference is silent.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct StatePair {
    /// The state of the tentative automaton.
    pub tentative: StateId,
    /// The bound reference state, absent when the reference is exhausted.
    pub reference: Option<StateId>,
}

impl std::fmt::Display for StatePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.tentative, self.reference.show())
    }
}

/// Conflicts between a tentative automaton and a reference automaton. Each variant is only ever
/// raised when the configuration flag permitting the corresponding repair is unset; with the
/// flag set, the same condition silently marks the result as modified instead.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum ConflictError {
    /// The two initial states disagree on their classification.
    #[error("initial states {pair} disagree on their classification")]
    InitialLabelMismatch {
        /// The initial pair.
        pair: StatePair,
    },
    /// The tentative automaton takes a symbol the (non-partial) reference does not define.
    #[error("transition on `{symbol}` from {pair} has no counterpart in the reference")]
    UnmatchedTransition {
        /// The pair whose expansion hit the missing symbol.
        pair: StatePair,
        /// The symbol without a reference counterpart.
        symbol: char,
    },
    /// Tentative and reference classification of a jointly reached state disagree.
    #[error("classifications diverge at {pair}, reached on `{symbol}`")]
    DivergentLabelling {
        /// The freshly reached pair with conflicting classifications.
        pair: StatePair,
        /// The symbol on which the pair was reached.
        symbol: char,
    },
}

/// Merges `tentative` with `reference` and returns the merged automaton, or `Ok(None)` when the
/// tentative automaton is already compatible and nothing had to change. The inputs are never
/// mutated; the result is built from scratch, seeded with a copy of the tentative initial state.
///
/// `config.override_labels` decides whether classification disagreements are repaired in favour
/// of the reference or reported as [`ConflictError`]s, and `config.partial_reference` decides
/// whether symbols missing from the reference are tolerated.
pub fn augment(
    tentative: &Automaton,
    reference: &Automaton,
    config: &AugmentationConfig,
) -> Result<Option<Automaton>, ConflictError> {
    let initial_acceptance = tentative
        .acceptance(tentative.initial())
        .expect("initial state must exist");
    ReferenceAugmentation {
        tentative,
        reference,
        config,
        result: Automaton::new(initial_acceptance),
        representatives: Map::default(),
        encountered: Map::default(),
        reject_sinks: Map::default(),
        worklist: CrossProductWorklist::new(),
        modified: false,
    }
    .run()
}

struct ReferenceAugmentation<'a> {
    tentative: &'a Automaton,
    reference: &'a Automaton,
    config: &'a AugmentationConfig,
    result: Automaton,
    /// Image of every explored pair in the result automaton.
    representatives: Map<StatePair, StateId>,
    /// Tentative states seen in some pair already, with their canonical image. A second pair on
    /// the same tentative state forces a copy.
    encountered: Map<StateId, StateId>,
    /// One synthesized reject state per distinct prohibited reference target.
    reject_sinks: Map<StateId, StateId>,
    worklist: CrossProductWorklist<(), StatePair, StatePair>,
    modified: bool,
}

impl<'a> ReferenceAugmentation<'a> {
    fn run(mut self) -> Result<Option<Automaton>, ConflictError> {
        let initial_pair = StatePair {
            tentative: self.tentative.initial(),
            reference: Some(self.reference.initial()),
        };
        self.encountered
            .insert(self.tentative.initial(), self.result.initial());
        self.representatives.insert(initial_pair, self.result.initial());

        let tentative_acceptance = self
            .tentative
            .acceptance(self.tentative.initial())
            .expect("initial state must exist");
        let reference_acceptance = self
            .reference
            .acceptance(self.reference.initial())
            .expect("initial state must exist");
        if tentative_acceptance != reference_acceptance {
            if !self.config.override_labels {
                return Err(ConflictError::InitialLabelMismatch { pair: initial_pair });
            }
            trace!(
                "forcing initial classification to {}",
                reference_acceptance.show()
            );
            self.result
                .set_acceptance(self.result.initial(), reference_acceptance);
            self.modified = true;
        }
        // only accepting pairs are expanded, which also covers a corrected initial state
        if self
            .result
            .acceptance(self.result.initial())
            .expect("initial state must exist")
            .is_accepting()
        {
            self.worklist.offer_if_new((), initial_pair, initial_pair);
        }

        while let Some(pair) = self.worklist.pop() {
            self.expand(pair)?;
        }

        self.result.debug_assert_consistent();
        if !self.modified {
            debug!("tentative automaton is compatible with the reference, nothing to do");
            return Ok(None);
        }
        if self.config.check_invariants {
            debug_assert!(
                !self.tentative.same_structure(&self.result),
                "a modified result must differ from its tentative input"
            );
        }
        debug!(
            "reference augmentation produced {} states and {} transitions from {} tentative states",
            self.result.size(),
            self.result.transition_count(),
            self.tentative.size(),
        );
        Ok(Some(self.result))
    }

    fn expand(&mut self, pair: StatePair) -> Result<(), ConflictError> {
        let rep = self.representatives[&pair];
        trace!("expanding {pair} as {rep}");

        for (&symbol, &tentative_next) in self.tentative.transitions_of(pair.tentative) {
            let reference_next = match pair.reference {
                Some(reference) => match self.reference.successor(reference, symbol) {
                    Some(next) => Some(next),
                    None if self.config.partial_reference => None,
                    None => return Err(ConflictError::UnmatchedTransition { pair, symbol }),
                },
                None => None,
            };
            let next_pair = StatePair {
                tentative: tentative_next,
                reference: reference_next,
            };
            let rep_next = self.representative(next_pair, symbol)?;
            self.result
                .set_transition(rep, symbol, rep_next)
                .expect("each pair is expanded at most once");
            if self
                .result
                .acceptance(rep_next)
                .expect("representative exists")
                .is_accepting()
            {
                self.worklist.offer_if_new((), next_pair, next_pair);
            }
        }

        // behaviour the reference explicitly prohibits and the tentative automaton leaves
        // undefined becomes an explicit reject transition
        if let Some(reference) = pair.reference {
            for (&symbol, &reference_next) in self.reference.transitions_of(reference) {
                if self.tentative.has_transition(pair.tentative, symbol) {
                    continue;
                }
                if self
                    .reference
                    .acceptance(reference_next)
                    .expect("reference target exists")
                    .is_accepting()
                {
                    continue;
                }
                let sink = match self.reject_sinks.get(&reference_next) {
                    Some(&sink) => sink,
                    None => {
                        let sink = self.result.add_state(Acceptance::Reject);
                        self.reject_sinks.insert(reference_next, sink);
                        sink
                    }
                };
                trace!("completing prohibited `{symbol}` from {pair} into {sink}");
                self.result
                    .set_transition(rep, symbol, sink)
                    .expect("symbol is missing from the tentative row");
                self.modified = true;
            }
        }
        Ok(())
    }

    /// Determines the result state standing for `next_pair`, creating it if the pair is new.
    /// The first pair on a tentative state reuses that state as its own canonical image; any
    /// later pair on the same tentative state clones a fresh copy. In both cases the
    /// classification is the conjunction of the two sides, and weakening the tentative
    /// classification is either an override or a conflict.
    fn representative(
        &mut self,
        next_pair: StatePair,
        symbol: char,
    ) -> Result<StateId, ConflictError> {
        if let Some(&rep) = self.representatives.get(&next_pair) {
            return Ok(rep);
        }
        let tentative_acceptance = self
            .tentative
            .acceptance(next_pair.tentative)
            .expect("tentative target must exist");
        let merged = match next_pair.reference {
            Some(reference) => tentative_acceptance.and(
                self.reference
                    .acceptance(reference)
                    .expect("reference target must exist"),
            ),
            None => tentative_acceptance,
        };
        if merged != tentative_acceptance {
            if !self.config.override_labels {
                return Err(ConflictError::DivergentLabelling {
                    pair: next_pair,
                    symbol,
                });
            }
            self.modified = true;
        }
        let rep = match self.encountered.get(&next_pair.tentative) {
            None => {
                let rep = self.result.add_state(merged);
                self.encountered.insert(next_pair.tentative, rep);
                trace!("{} becomes its own image {rep}", next_pair.tentative);
                rep
            }
            Some(&canonical) => {
                let rep = self.result.clone_state(canonical);
                if self.result.acceptance(rep) != Some(merged) {
                    self.result.set_acceptance(rep, merged);
                }
                trace!("{} is aliased, cloned into {rep}", next_pair.tentative);
                rep
            }
        };
        self.representatives.insert(next_pair, rep);
        Ok(rep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    fn config(override_labels: bool, partial_reference: bool) -> AugmentationConfig {
        AugmentationConfig {
            override_labels,
            partial_reference,
            ..AugmentationConfig::default()
        }
    }

    #[test_log::test]
    fn compatible_inputs_need_no_new_automaton() {
        let tentative = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1), (1, 'b', 0)])
            .into_automaton(0);
        let reference = tentative.clone();
        assert_eq!(
            augment(&tentative, &reference, &config(false, true)),
            Ok(None)
        );
    }

    #[test_log::test]
    fn tentative_may_run_ahead_of_a_partial_reference() {
        let tentative = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1), (1, 'c', 2)])
            .into_automaton(0);
        let reference = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1)])
            .into_automaton(0);
        assert_eq!(
            augment(&tentative, &reference, &config(false, true)),
            Ok(None)
        );
    }

    #[test_log::test]
    fn missing_reference_symbol_is_a_conflict_without_partial_mode() {
        let tentative = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1), (1, 'c', 2)])
            .into_automaton(0);
        let reference = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1)])
            .into_automaton(0);
        assert_eq!(
            augment(&tentative, &reference, &config(false, false)),
            Err(ConflictError::UnmatchedTransition {
                pair: StatePair {
                    tentative: StateId(1),
                    reference: Some(StateId(1)),
                },
                symbol: 'c',
            })
        );
    }

    #[test_log::test]
    fn divergent_labelling_is_detected() {
        let tentative = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1)])
            .into_automaton(0);
        let reference = AutomatonBuilder::default()
            .with_acceptance([Acceptance::Accept, Acceptance::Reject])
            .with_transitions([(0, 'a', 1)])
            .into_automaton(0);
        assert_eq!(
            augment(&tentative, &reference, &config(false, true)),
            Err(ConflictError::DivergentLabelling {
                pair: StatePair {
                    tentative: StateId(1),
                    reference: Some(StateId(1)),
                },
                symbol: 'a',
            })
        );
    }

    #[test_log::test]
    fn divergent_labelling_can_be_overridden() {
        let tentative = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1)])
            .into_automaton(0);
        let reference = AutomatonBuilder::default()
            .with_acceptance([Acceptance::Accept, Acceptance::Reject])
            .with_transitions([(0, 'a', 1)])
            .into_automaton(0);
        let result = augment(&tentative, &reference, &config(true, true))
            .unwrap()
            .expect("the override modifies the automaton");
        let reached = result.successor(result.initial(), 'a').unwrap();
        assert_eq!(result.acceptance(reached), Some(Acceptance::Reject));
        assert!(result.same_structure(&reference));
    }

    #[test_log::test]
    fn prohibited_behaviour_is_completed_to_explicit_rejects() {
        let tentative = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 0)])
            .into_automaton(0);
        let reference = AutomatonBuilder::default()
            .with_acceptance([Acceptance::Accept, Acceptance::Reject])
            .with_transitions([(0, 'a', 0), (0, 'b', 1)])
            .into_automaton(0);
        let result = augment(&tentative, &reference, &config(false, true))
            .unwrap()
            .expect("the completion modifies the automaton");
        let sink = result.successor(result.initial(), 'b').unwrap();
        assert_eq!(result.acceptance(sink), Some(Acceptance::Reject));
        assert!(result.transitions_of(sink).is_empty());
        assert!(result.same_structure(&reference));
    }

    #[test_log::test]
    fn initial_mismatch_is_fatal_or_overridden() {
        let tentative = Automaton::new(Acceptance::Accept);
        let reference = Automaton::new(Acceptance::Reject);
        let initial_pair = StatePair {
            tentative: StateId(0),
            reference: Some(StateId(0)),
        };
        assert_eq!(
            augment(&tentative, &reference, &config(false, true)),
            Err(ConflictError::InitialLabelMismatch { pair: initial_pair })
        );
        let result = augment(&tentative, &reference, &config(true, true))
            .unwrap()
            .expect("the override modifies the automaton");
        // the corrected initial state rejects, so nothing was expanded from it
        assert_eq!(result.size(), 1);
        assert_eq!(result.acceptance(result.initial()), Some(Acceptance::Reject));
    }

    #[test_log::test]
    fn aliased_tentative_states_are_cloned_per_reference_context() {
        // both reference states lead into q0 of the tentative automaton, under different
        // reference states with different continuations
        let tentative = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1), (1, 'a', 0), (0, 'b', 2)])
            .into_automaton(0);
        let reference = AutomatonBuilder::default()
            .with_acceptance([
                Acceptance::Accept,
                Acceptance::Accept,
                Acceptance::Accept,
                Acceptance::Reject,
            ])
            .with_transitions([(0, 'a', 1), (1, 'a', 2), (2, 'a', 1), (0, 'b', 3), (2, 'b', 3)])
            .into_automaton(0);
        let result = augment(&tentative, &reference, &config(true, true))
            .unwrap()
            .expect("aliasing forces a modification");
        // tentative q0 is reached both initially and again via "aa", bound to different
        // reference states, so the result must hold two distinct images of it
        assert!(result.size() > tentative.size());
    }
}
