use std::collections::{BTreeMap, BTreeSet};

use crate::automaton::{Acceptance, Automaton, StateId};

/// A speculative overlay over a tentative automaton: a set of *virtual* states plus a side
/// transition map. Overlays represent extensions of the transition function that have been
/// proposed but not yet justified, such as the paths underlying unanswered membership questions.
///
/// Virtual identities are allocated strictly above the identity space of the automaton the
/// overlay was created for, so a [`StateId`] is unambiguously either real or virtual. Every
/// virtual state starts out *unconfirmed*; the property engine removes states from the
/// unconfirmed set as its traversal explains them, and any state still unconfirmed when the
/// traversal finishes is evidence that the speculative path is not implied by the properties.
///
/// Absence of an overlay entry for a state simply means "fall through to the real automaton".
#[derive(Debug, Clone)]
pub struct QuestionPathOverlay {
    next_id: u32,
    virtual_states: BTreeMap<StateId, Acceptance>,
    transitions: BTreeMap<(StateId, char), StateId>,
    unconfirmed: BTreeSet<StateId>,
}

impl QuestionPathOverlay {
    /// Creates an empty overlay for the given automaton. The automaton fixes the boundary of
    /// the virtual identity space; it is not retained.
    pub fn new(automaton: &Automaton) -> Self {
        Self {
            next_id: automaton.id_bound(),
            virtual_states: BTreeMap::new(),
            transitions: BTreeMap::new(),
            unconfirmed: BTreeSet::new(),
        }
    }

    /// Allocates a fresh virtual state with the given classification. The state starts out
    /// unconfirmed.
    pub fn add_virtual_state(&mut self, acceptance: Acceptance) -> StateId {
        let id = StateId(self.next_id);
        self.next_id += 1;
        self.virtual_states.insert(id, acceptance);
        self.unconfirmed.insert(id);
        id
    }

    /// Records the speculative transition `from --symbol--> to`. `from` may be a real or a
    /// virtual state; overlay entries never shadow real transitions, they only extend them.
    pub fn set_transition(&mut self, from: StateId, symbol: char, to: StateId) {
        self.transitions.insert((from, symbol), to);
    }

    /// The speculative target reached from `state` on `symbol`, if the overlay defines one.
    pub fn successor(&self, state: StateId, symbol: char) -> Option<StateId> {
        self.transitions.get(&(state, symbol)).copied()
    }

    /// Iterates over the speculative transitions leaving `state`.
    pub fn transitions_from(&self, state: StateId) -> impl Iterator<Item = (char, StateId)> + '_ {
        self.transitions
            .range((state, '\u{0}')..=(state, char::MAX))
            .map(|(&(_, symbol), &target)| (symbol, target))
    }

    /// The classification of a virtual state, or `None` for identities the overlay does not
    /// know about.
    pub fn acceptance(&self, state: StateId) -> Option<Acceptance> {
        self.virtual_states.get(&state).copied()
    }

    /// Whether the identity denotes a virtual state of this overlay.
    pub fn is_virtual(&self, state: StateId) -> bool {
        self.virtual_states.contains_key(&state)
    }

    /// Marks a virtual state as confirmed, i.e. explained by the traversal. Returns `true` if
    /// the state was still unconfirmed. Confirming a state twice, or confirming a real state,
    /// is a no-op.
    pub fn confirm(&mut self, state: StateId) -> bool {
        self.unconfirmed.remove(&state)
    }

    /// Iterates over the virtual states that have not been confirmed yet, in ascending order.
    pub fn unconfirmed(&self) -> impl Iterator<Item = StateId> + '_ {
        self.unconfirmed.iter().copied()
    }

    /// Whether every virtual state has been confirmed.
    pub fn fully_confirmed(&self) -> bool {
        self.unconfirmed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    #[test]
    fn virtual_identities_do_not_collide() {
        let mut aut = Automaton::new(Acceptance::Accept);
        let q1 = aut.add_state(Acceptance::Accept);
        let mut overlay = QuestionPathOverlay::new(&aut);
        let v = overlay.add_virtual_state(Acceptance::Reject);
        assert!(!aut.contains_state(v));
        assert!(v > q1);
        assert!(overlay.is_virtual(v));
        assert!(!overlay.is_virtual(q1));
    }

    #[test]
    fn confirmation_drains_the_unconfirmed_set() {
        let aut = Automaton::new(Acceptance::Accept);
        let mut overlay = QuestionPathOverlay::new(&aut);
        let v1 = overlay.add_virtual_state(Acceptance::Accept);
        let v2 = overlay.add_virtual_state(Acceptance::Reject);
        overlay.set_transition(aut.initial(), 'a', v1);
        overlay.set_transition(v1, 'b', v2);

        assert_eq!(overlay.unconfirmed().collect::<Vec<_>>(), vec![v1, v2]);
        assert!(overlay.confirm(v1));
        assert!(!overlay.confirm(v1));
        assert!(!overlay.fully_confirmed());
        assert!(overlay.confirm(v2));
        assert!(overlay.fully_confirmed());
    }

    #[test]
    fn successors_come_from_the_side_map() {
        let aut = Automaton::new(Acceptance::Accept);
        let mut overlay = QuestionPathOverlay::new(&aut);
        let v = overlay.add_virtual_state(Acceptance::Accept);
        overlay.set_transition(aut.initial(), 'a', v);
        assert_eq!(overlay.successor(aut.initial(), 'a'), Some(v));
        assert_eq!(overlay.successor(v, 'a'), None);
        assert_eq!(overlay.transitions_from(aut.initial()).collect::<Vec<_>>(), vec![('a', v)]);
    }
}
