use std::{
    cell::OnceCell,
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt::Debug,
};

use thiserror::Error;

use crate::{Map, Set, Show};

mod builder;
pub use builder::AutomatonBuilder;

/// Index of a state within an [`Automaton`]. Identities are opaque, totally ordered and unique
/// within their automaton; they are assigned monotonically and never reused.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct StateId(pub u32);

impl Debug for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

impl From<u32> for StateId {
    fn from(n: u32) -> Self {
        StateId(n)
    }
}

impl Show for StateId {
    fn show(&self) -> String {
        format!("q{}", self.0)
    }
}

/// Classification of a state. Every state is either accepting or rejecting; a third `Unknown`
/// value for states whose classification is still open is a conceivable extension of the
/// matching rules, but those rules are not settled and no such variant exists here.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash, Debug)]
pub enum Acceptance {
    /// The state accepts, i.e. the behaviour leading to it is admissible.
    Accept,
    /// The state rejects, i.e. the behaviour leading to it is prohibited.
    Reject,
}

impl Acceptance {
    /// Returns true iff `self` is [`Acceptance::Accept`].
    pub fn is_accepting(self) -> bool {
        matches!(self, Acceptance::Accept)
    }

    /// Conjunction of two classifications: the result accepts iff both operands accept.
    pub fn and(self, other: Acceptance) -> Acceptance {
        if self.is_accepting() && other.is_accepting() {
            Acceptance::Accept
        } else {
            Acceptance::Reject
        }
    }
}

impl Show for Acceptance {
    fn show(&self) -> String {
        match self {
            Acceptance::Accept => "+",
            Acceptance::Reject => "-",
        }
        .to_string()
    }
}

/// Errors raised by the mutation operations of [`Automaton`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum AutomatonError {
    /// A transition row already maps the symbol to a different target. The transition function
    /// is a true function, so overwriting is never silent.
    #[error("state {state} already maps {symbol} to {existing}, refusing to remap to {requested}")]
    DuplicateTransition {
        /// The state whose row was being extended.
        state: StateId,
        /// The offending symbol.
        symbol: char,
        /// The target the row already maps the symbol to.
        existing: StateId,
        /// The target the caller attempted to insert.
        requested: StateId,
    },
    /// A state referenced by the operation does not exist in the automaton.
    #[error("state {0} does not exist in the automaton")]
    MissingState(StateId),
}

/// A single state of an [`Automaton`]: its identity, classification and deterministic
/// transition row mapping each symbol to at most one target.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct AutomatonState {
    id: StateId,
    acceptance: Acceptance,
    transitions: BTreeMap<char, StateId>,
}

impl AutomatonState {
    fn new(id: StateId, acceptance: Acceptance) -> Self {
        Self {
            id,
            acceptance,
            transitions: BTreeMap::new(),
        }
    }

    /// The identity of this state.
    pub fn id(&self) -> StateId {
        self.id
    }

    /// The classification of this state.
    pub fn acceptance(&self) -> Acceptance {
        self.acceptance
    }

    /// The transition row of this state.
    pub fn transitions(&self) -> &BTreeMap<char, StateId> {
        &self.transitions
    }
}

/// A deterministic finite automaton: an initial state, a set of states each owning a transition
/// row, and a derived alphabet. Determinism is structural: each row is a map from symbol to
/// target, so no state can ever have two transitions on the same symbol.
///
/// The alphabet (the union of symbols over all rows) is computed lazily and cached; any mutation
/// invalidates the cache. States are stored in a [`BTreeMap`] keyed by [`StateId`], which makes
/// all iteration orders deterministic and keeps traversal results reproducible.
#[derive(Clone)]
pub struct Automaton {
    initial: StateId,
    states: BTreeMap<StateId, AutomatonState>,
    next_id: u32,
    alphabet: OnceCell<BTreeSet<char>>,
}

impl PartialEq for Automaton {
    fn eq(&self, other: &Self) -> bool {
        self.initial == other.initial && self.states == other.states
    }
}
impl Eq for Automaton {}

impl Automaton {
    /// Creates a new automaton holding a single state with the given classification, which
    /// becomes the initial state.
    pub fn new(acceptance: Acceptance) -> Self {
        let initial = StateId(0);
        let mut states = BTreeMap::new();
        states.insert(initial, AutomatonState::new(initial, acceptance));
        Self {
            initial,
            states,
            next_id: 1,
            alphabet: OnceCell::new(),
        }
    }

    /// The designated initial state.
    pub fn initial(&self) -> StateId {
        self.initial
    }

    /// Re-designates the initial state. Panics if `state` does not exist.
    pub fn set_initial(&mut self, state: StateId) {
        assert!(
            self.contains_state(state),
            "cannot make non-existing state {} initial",
            state.show()
        );
        self.initial = state;
    }

    /// The number of states.
    pub fn size(&self) -> usize {
        self.states.len()
    }

    /// The total number of transitions over all rows.
    pub fn transition_count(&self) -> usize {
        self.states.values().map(|s| s.transitions.len()).sum()
    }

    /// Checks whether the state exists.
    pub fn contains_state(&self, state: StateId) -> bool {
        self.states.contains_key(&state)
    }

    /// Looks up a state by its identity.
    pub fn state(&self, state: StateId) -> Option<&AutomatonState> {
        self.states.get(&state)
    }

    /// Iterates over all state identities in ascending order.
    pub fn state_ids(&self) -> impl Iterator<Item = StateId> + '_ {
        self.states.keys().copied()
    }

    /// Iterates over all states in ascending identity order.
    pub fn states(&self) -> impl Iterator<Item = &AutomatonState> + '_ {
        self.states.values()
    }

    /// The classification of the given state, or `None` if it does not exist.
    pub fn acceptance(&self, state: StateId) -> Option<Acceptance> {
        self.states.get(&state).map(|s| s.acceptance)
    }

    /// Overwrites the classification of the given state. Panics if it does not exist.
    pub fn set_acceptance(&mut self, state: StateId, acceptance: Acceptance) {
        self.alphabet.take();
        self.states
            .get_mut(&state)
            .expect("state must exist")
            .acceptance = acceptance;
    }

    /// The transition row of the given state. Panics if it does not exist.
    pub fn transitions_of(&self, state: StateId) -> &BTreeMap<char, StateId> {
        &self
            .states
            .get(&state)
            .unwrap_or_else(|| panic!("state {} does not exist", state.show()))
            .transitions
    }

    /// The target reached from `state` on `symbol`, if the row defines one.
    pub fn successor(&self, state: StateId, symbol: char) -> Option<StateId> {
        self.states.get(&state)?.transitions.get(&symbol).copied()
    }

    /// Whether the row of `state` defines a transition on `symbol`.
    pub fn has_transition(&self, state: StateId, symbol: char) -> bool {
        self.successor(state, symbol).is_some()
    }

    /// Adds a fresh state with the given classification and returns its identity.
    pub fn add_state(&mut self, acceptance: Acceptance) -> StateId {
        self.alphabet.take();
        let id = StateId(self.next_id);
        self.next_id += 1;
        debug_assert!(!self.states.contains_key(&id), "identity clash on {id}");
        self.states.insert(id, AutomatonState::new(id, acceptance));
        id
    }

    /// Clones `source` into a fresh state: the classification is copied, the transition row is
    /// not, and a new identity is assigned. Panics if `source` does not exist.
    pub fn clone_state(&mut self, source: StateId) -> StateId {
        let acceptance = self
            .acceptance(source)
            .unwrap_or_else(|| panic!("cannot clone non-existing state {}", source.show()));
        self.add_state(acceptance)
    }

    /// Inserts the transition `state --symbol--> target`. Inserting a transition that is already
    /// present is a no-op; remapping a symbol to a different target fails with
    /// [`AutomatonError::DuplicateTransition`], and referencing a state that does not exist fails
    /// with [`AutomatonError::MissingState`].
    pub fn set_transition(
        &mut self,
        state: StateId,
        symbol: char,
        target: StateId,
    ) -> Result<(), AutomatonError> {
        if !self.contains_state(target) {
            return Err(AutomatonError::MissingState(target));
        }
        let row = &mut self
            .states
            .get_mut(&state)
            .ok_or(AutomatonError::MissingState(state))?
            .transitions;
        match row.get(&symbol) {
            Some(&existing) if existing != target => Err(AutomatonError::DuplicateTransition {
                state,
                symbol,
                existing,
                requested: target,
            }),
            Some(_) => Ok(()),
            None => {
                self.alphabet.take();
                row.insert(symbol, target);
                Ok(())
            }
        }
    }

    /// The alphabet of the automaton, i.e. the union of symbols over all transition rows. The
    /// set is computed on first use and cached until the next mutation.
    pub fn alphabet(&self) -> &BTreeSet<char> {
        self.alphabet.get_or_init(|| {
            self.states
                .values()
                .flat_map(|s| s.transitions.keys().copied())
                .collect()
        })
    }

    /// Whether every state has a transition for every alphabet symbol.
    pub fn is_complete(&self) -> bool {
        let alphabet = self.alphabet();
        self.states
            .values()
            .all(|s| s.transitions.len() == alphabet.len())
    }

    /// An exclusive upper bound on the identities assigned so far. Identities at or above the
    /// bound are free, which is what lets an overlay allocate virtual states that can never
    /// collide with real ones.
    pub fn id_bound(&self) -> u32 {
        self.next_id
    }

    /// The set of states reachable from `from` by following transitions, including `from`
    /// itself. Panics if `from` does not exist.
    pub fn reachable_from(&self, from: StateId) -> Set<StateId> {
        assert!(
            self.contains_state(from),
            "cannot explore from non-existing state {}",
            from.show()
        );
        let mut reached = Set::default();
        reached.insert(from);
        let mut queue = VecDeque::from([from]);
        while let Some(state) = queue.pop_front() {
            for &target in self.transitions_of(state).values() {
                if reached.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        reached
    }

    /// Compares the reachable parts of two automata by a simultaneous breadth-first traversal
    /// from the two initial states. The automata are considered structurally equal if the
    /// traversal establishes a bijection between the reached states under which classifications
    /// and transition rows coincide symbol for symbol. State identities do not matter.
    pub fn same_structure(&self, other: &Automaton) -> bool {
        let mut forward: Map<StateId, StateId> = Map::default();
        let mut backward: Map<StateId, StateId> = Map::default();
        forward.insert(self.initial, other.initial);
        backward.insert(other.initial, self.initial);
        let mut queue = VecDeque::from([(self.initial, other.initial)]);

        while let Some((p, q)) = queue.pop_front() {
            if self.acceptance(p) != other.acceptance(q) {
                return false;
            }
            let row_p = self.transitions_of(p);
            let row_q = other.transitions_of(q);
            if !itertools::equal(row_p.keys(), row_q.keys()) {
                return false;
            }
            for (symbol, &p_next) in row_p {
                let q_next = row_q[symbol];
                match (forward.get(&p_next), backward.get(&q_next)) {
                    (Some(&mapped), _) if mapped != q_next => return false,
                    (_, Some(&mapped)) if mapped != p_next => return false,
                    (Some(_), Some(_)) => {}
                    _ => {
                        forward.insert(p_next, q_next);
                        backward.insert(q_next, p_next);
                        queue.push_back((p_next, q_next));
                    }
                }
            }
        }
        true
    }

    /// Verifies the internal invariants: every transition target exists and the initial state is
    /// present. Compiled to nothing in release builds.
    pub(crate) fn debug_assert_consistent(&self) {
        debug_assert!(self.contains_state(self.initial));
        debug_assert!(self
            .states
            .values()
            .flat_map(|s| s.transitions.values())
            .all(|target| self.contains_state(*target)));
    }

    /// Returns a string representation of the transition table of the automaton.
    pub fn transition_table(&self) -> String {
        use owo_colors::OwoColorize;
        let mut builder = tabled::builder::Builder::default();
        builder.push_record(
            std::iter::once("State".to_string())
                .chain(self.alphabet().iter().map(|sym| sym.to_string())),
        );
        for state in self.states.values() {
            let label = format!("{}|{}", state.id.show(), state.acceptance.show());
            let mut row = vec![if state.id == self.initial {
                label.bold().to_string()
            } else {
                label
            }];
            for sym in self.alphabet() {
                match state.transitions.get(sym) {
                    Some(target) => row.push(target.show()),
                    None => row.push("-".to_string()),
                }
            }
            builder.push_record(row);
        }
        builder
            .build()
            .with(tabled::settings::Style::rounded())
            .to_string()
    }
}

impl Debug for Automaton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.transition_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    fn two_state() -> Automaton {
        AutomatonBuilder::default()
            .default_acceptance(Acceptance::Accept)
            .with_transitions([(0, 'a', 1), (1, 'a', 0), (1, 'b', 1)])
            .into_automaton(0)
    }

    #[test]
    fn alphabet_is_cached_and_invalidated() {
        let mut aut = two_state();
        assert_eq!(aut.alphabet().iter().copied().collect::<Vec<_>>(), ['a', 'b']);
        let q2 = aut.add_state(Acceptance::Reject);
        aut.set_transition(StateId(0), 'c', q2).unwrap();
        assert!(aut.alphabet().contains(&'c'));
    }

    #[test]
    fn transition_row_is_a_true_function() {
        let mut aut = two_state();
        // re-inserting the identical transition is fine
        assert_eq!(aut.set_transition(StateId(0), 'a', StateId(1)), Ok(()));
        assert_eq!(
            aut.set_transition(StateId(0), 'a', StateId(0)),
            Err(AutomatonError::DuplicateTransition {
                state: StateId(0),
                symbol: 'a',
                existing: StateId(1),
                requested: StateId(0),
            })
        );
        assert_eq!(
            aut.set_transition(StateId(0), 'z', StateId(17)),
            Err(AutomatonError::MissingState(StateId(17)))
        );
    }

    #[test]
    fn clone_state_copies_classification_only() {
        let mut aut = two_state();
        aut.set_acceptance(StateId(1), Acceptance::Reject);
        let copy = aut.clone_state(StateId(1));
        assert_eq!(aut.acceptance(copy), Some(Acceptance::Reject));
        assert!(aut.transitions_of(copy).is_empty());
        assert!(copy > StateId(1));
    }

    #[test]
    fn reachability() {
        let mut aut = two_state();
        let island = aut.add_state(Acceptance::Accept);
        let reached = aut.reachable_from(aut.initial());
        assert_eq!(reached.len(), 2);
        assert!(!reached.contains(&island));
    }

    #[test]
    fn structural_comparison_ignores_identities() {
        let a = two_state();
        let mut b = Automaton::new(Acceptance::Accept);
        let junk = b.add_state(Acceptance::Reject);
        let one = b.add_state(Acceptance::Accept);
        b.set_transition(b.initial(), 'a', one).unwrap();
        b.set_transition(one, 'a', b.initial()).unwrap();
        b.set_transition(one, 'b', one).unwrap();
        // the unreachable state does not matter
        assert!(a.same_structure(&b));
        assert!(b.same_structure(&a));

        b.set_acceptance(junk, Acceptance::Accept);
        assert!(a.same_structure(&b));
        b.set_acceptance(one, Acceptance::Reject);
        assert!(!a.same_structure(&b));
    }

    #[test]
    fn structural_comparison_checks_rows() {
        let a = two_state();
        let mut b = two_state();
        let q2 = b.add_state(Acceptance::Accept);
        b.set_transition(StateId(0), 'b', q2).unwrap();
        assert!(!a.same_structure(&b));
    }
}
