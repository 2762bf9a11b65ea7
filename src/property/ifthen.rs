//! Conversion of plain deterministic automata into IF/THEN form, and structural validation of
//! the result.

use std::collections::{BTreeMap, BTreeSet};

use bit_set::BitSet;
use itertools::Itertools;
use tracing::trace;

use super::{IfThenError, PropertyAutomaton};
use crate::{
    automaton::{Acceptance, Automaton, StateId},
    Map, Show,
};

/// Converts a plain deterministic automaton into IF/THEN form. Every state of `det` becomes an
/// IF state; its *rejected symbol set* (the alphabet symbols its row does not define) is turned
/// into a THEN fragment consisting of an accepting hub with one transition per rejected symbol
/// into a dedicated fresh reject state. States sharing an identical rejected set share one hub,
/// and each state is linked to its hub.
///
/// The result is validated before it is returned, so a successfully built property is always
/// structurally well-formed.
pub fn build_from_automaton(det: &Automaton) -> Result<PropertyAutomaton, IfThenError> {
    let alphabet: Vec<char> = det.alphabet().iter().copied().collect();
    let mut property = det.clone();
    let mut hubs: Map<BTreeSet<char>, StateId> = Map::default();
    let mut links = BTreeMap::new();

    for state in det.state_ids() {
        let mut defined = BitSet::with_capacity(alphabet.len());
        for (position, &symbol) in alphabet.iter().enumerate() {
            if det.has_transition(state, symbol) {
                defined.insert(position);
            }
        }
        let rejected: BTreeSet<char> = alphabet
            .iter()
            .enumerate()
            .filter(|(position, _)| !defined.contains(*position))
            .map(|(_, &symbol)| symbol)
            .collect();

        let hub = match hubs.get(&rejected) {
            Some(&hub) => hub,
            None => {
                let hub = property.add_state(Acceptance::Accept);
                if !rejected.is_empty() {
                    let sink = property.add_state(Acceptance::Reject);
                    for &symbol in &rejected {
                        property
                            .set_transition(hub, symbol, sink)
                            .expect("the hub row is fresh");
                    }
                }
                trace!(
                    "hub {} prohibits {{{}}}",
                    hub.show(),
                    rejected.iter().join(", ")
                );
                hubs.insert(rejected, hub);
                hub
            }
        };
        links.insert(state, hub);
    }
    PropertyAutomaton::new(property, links)
}

/// Validates the structural well-formedness of a property automaton: the IF-reachable set (from
/// the initial state) and the THEN-reachable set of every linked fragment entry must be
/// disjoint, at least one THEN link must exist, and every state must be reachable in one of the
/// two roles.
pub fn check_disjoint(property: &PropertyAutomaton) -> Result<(), IfThenError> {
    if property.then_links().is_empty() {
        return Err(IfThenError::NoThenLinks);
    }
    let automaton = property.automaton();
    let if_reachable = automaton.reachable_from(automaton.initial());
    let mut covered = if_reachable.clone();
    for &entry in property.then_links().values() {
        let then_reachable = automaton.reachable_from(entry);
        let mut overlap: Vec<StateId> = then_reachable
            .intersection(&if_reachable)
            .copied()
            .collect();
        overlap.sort();
        if let Some(&state) = overlap.first() {
            return Err(IfThenError::OverlappingRoles { entry, state });
        }
        covered.extend(then_reachable);
    }
    if covered.len() != automaton.size() {
        return Err(IfThenError::UnreachableStates {
            states: automaton
                .state_ids()
                .filter(|state| !covered.contains(state))
                .collect(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    #[test]
    fn built_properties_are_well_formed() {
        let det = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1), (0, 'b', 2), (1, 'a', 0), (2, 'a', 0)])
            .into_automaton(0);
        let property = build_from_automaton(&det).unwrap();
        assert_eq!(check_disjoint(&property), Ok(()));
    }

    #[test]
    fn states_with_equal_rejected_sets_share_a_hub() {
        // q0 is complete, q1 and q2 both lack `b`
        let det = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1), (0, 'b', 2), (1, 'a', 0), (2, 'a', 0)])
            .into_automaton(0);
        let property = build_from_automaton(&det).unwrap();

        let links = property.then_links();
        assert_eq!(links.len(), 3);
        assert_eq!(links[&StateId(1)], links[&StateId(2)]);
        assert_ne!(links[&StateId(0)], links[&StateId(1)]);
        // three pattern states, the empty hub, and the `b`-hub with its sink
        assert_eq!(property.automaton().size(), 6);

        let hub = links[&StateId(1)];
        let sink = property.automaton().successor(hub, 'b').unwrap();
        assert_eq!(
            property.automaton().acceptance(sink),
            Some(Acceptance::Reject)
        );
    }

    #[test]
    fn a_link_back_into_the_pattern_is_rejected() {
        let automaton = AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1)])
            .into_automaton(0);
        assert!(matches!(
            PropertyAutomaton::new(automaton, [(StateId(0), StateId(1))].into()),
            Err(IfThenError::OverlappingRoles {
                entry: StateId(1),
                state: StateId(1),
            })
        ));
    }

    #[test]
    fn at_least_one_link_is_required() {
        let automaton = Automaton::new(Acceptance::Accept);
        assert!(matches!(
            PropertyAutomaton::new(automaton, BTreeMap::new()),
            Err(IfThenError::NoThenLinks)
        ));
    }

    #[test]
    fn states_unreachable_in_either_role_are_rejected() {
        let mut automaton = Automaton::new(Acceptance::Accept);
        let entry = automaton.add_state(Acceptance::Accept);
        let orphan = automaton.add_state(Acceptance::Reject);
        assert!(matches!(
            PropertyAutomaton::new(automaton, [(StateId(0), entry)].into()),
            Err(IfThenError::UnreachableStates { states }) if states == vec![orphan]
        ));
    }
}
