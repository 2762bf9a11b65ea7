//! Merging and validation of a tentative automaton against IF/THEN constraint automata.
//!
//! A [`PropertyAutomaton`] is a deterministic pattern (the "IF" part) in which some states carry
//! a *THEN link* to the entry of an attached behaviour fragment. Whenever the traversal matches
//! a tentative state against a linked IF state, the fragment describes behaviour the tentative
//! automaton must exhibit from that state onwards. [`PropertyAugmentationEngine`] walks the
//! tentative automaton, all patterns and any active fragments simultaneously; in extension mode
//! it may synthesize the missing behaviour into the tentative automaton, bounded by a number of
//! *waves*, and in verification mode it checks that a speculative
//! [`QuestionPathOverlay`](crate::overlay::QuestionPathOverlay) is fully explained by the
//! fragments without ever touching the automaton.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    automaton::{Acceptance, Automaton, StateId},
    overlay::QuestionPathOverlay,
    worklist::CrossProductWorklist,
    Set, Show,
};

pub mod ifthen;

/// A constraint automaton in IF/THEN form: a deterministic pattern automaton whose state set
/// additionally contains the attached THEN fragments, plus the compatibility relation linking
/// IF states to fragment entries. The entry state doubles as the identity of its fragment.
///
/// The two roles must be structurally separated: no state may be reachable both from the
/// initial state (IF role) and from a fragment entry (THEN role), at least one link must exist,
/// and every state must be reachable in one of the roles. [`PropertyAutomaton::new`] validates
/// this eagerly, so a malformed property can never reach a learning run.
#[derive(Debug, Clone)]
pub struct PropertyAutomaton {
    automaton: Automaton,
    then_links: BTreeMap<StateId, StateId>,
}

impl PropertyAutomaton {
    /// Creates a property automaton after validating its structural well-formedness with
    /// [`ifthen::check_disjoint`].
    pub fn new(
        automaton: Automaton,
        then_links: BTreeMap<StateId, StateId>,
    ) -> Result<Self, IfThenError> {
        let property = Self::from_parts(automaton, then_links);
        ifthen::check_disjoint(&property)?;
        Ok(property)
    }

    /// Creates a property automaton from its constituent parts without validation.
    pub fn from_parts(automaton: Automaton, then_links: BTreeMap<StateId, StateId>) -> Self {
        Self {
            automaton,
            then_links,
        }
    }

    /// The underlying automaton, containing IF and THEN states alike.
    pub fn automaton(&self) -> &Automaton {
        &self.automaton
    }

    /// The compatibility relation from IF states to THEN fragment entries.
    pub fn then_links(&self) -> &BTreeMap<StateId, StateId> {
        &self.then_links
    }
}

/// One step of a reconstructed exploration path, kept for rendering counter-example traces.
/// The first step of a trace has no symbol, every later one records the symbol that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceStep {
    /// The symbol consumed by this step, absent for seed and link-activation steps.
    pub symbol: Option<char>,
    /// The tentative (or speculative) state reached.
    pub tentative: StateId,
    /// The pattern state reached, if the IF component is still alive.
    pub if_state: Option<StateId>,
    /// The fragment state reached, if a THEN obligation is active.
    pub then_state: Option<StateId>,
}

impl std::fmt::Display for TraceStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(symbol) = self.symbol {
            write!(f, "--{symbol}--> ")?;
        }
        write!(
            f,
            "[{} if:{} then:{}]",
            self.tentative,
            self.if_state.show(),
            self.then_state.show()
        )
    }
}

/// Errors raised by the property engine and the IF/THEN builder. The structural variants are
/// produced at property construction time; the traversal variants carry enough captured state
/// to render a counter-example.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IfThenError {
    /// An active THEN obligation and the tentative automaton disagree on a classification.
    /// Unlike the reference engine, THEN fragments may never override labelling.
    #[error("classification conflict along {}", .trace.iter().map(|step| step.to_string()).join(" "))]
    MergeConflict {
        /// The exploration path from the seed to the conflicting combination.
        trace: Vec<TraceStep>,
    },
    /// Verification finished with speculative states no THEN chain ever explained.
    #[error("speculative states [{}] are not explained by any property", .states.iter().map(|q| q.show()).join(", "))]
    UnconfirmedPath {
        /// The overlay states left unconfirmed.
        states: Vec<StateId>,
    },
    /// A state is reachable both as an IF state and through a THEN fragment.
    #[error("state {state} is reachable both as IF and through the THEN fragment entered at {entry}")]
    OverlappingRoles {
        /// The fragment entry whose reachable set overlaps the IF part.
        entry: StateId,
        /// A state reachable in both roles.
        state: StateId,
    },
    /// The property automaton carries no THEN link at all.
    #[error("a property automaton needs at least one THEN link")]
    NoThenLinks,
    /// Some states are reachable in neither role.
    #[error("states [{}] are reachable in neither role", .states.iter().map(|q| q.show()).join(", "))]
    UnreachableStates {
        /// The unreachable states.
        states: Vec<StateId>,
    },
}

/// A node of the three-way cross-product search: the current tentative state, the active THEN
/// fragment and position therein, the property index and current IF state, the number of waves
/// of synthesized transitions crossed, and bookkeeping for trace reconstruction.
#[derive(Debug, Clone, Copy)]
struct ExplorationElement {
    tentative: StateId,
    /// Active THEN obligation as (fragment entry, current fragment state).
    then: Option<(StateId, StateId)>,
    property: usize,
    if_state: Option<StateId>,
    depth: u32,
    symbol: Option<char>,
    prev: Option<usize>,
}

/// Deduplication key: the property index is implicit because elements are only compared within
/// one property's visited set, and depth, symbol and predecessor are bookkeeping.
type ElementKey = (StateId, Option<StateId>, Option<(StateId, StateId)>);

impl ExplorationElement {
    fn key(&self) -> ElementKey {
        (self.tentative, self.if_state, self.then)
    }
}

/// Entry points for running a set of [`PropertyAutomaton`]s against a tentative automaton.
///
/// The two modes differ in what they are allowed to touch, and the signatures enforce it:
/// [`extend`](PropertyAugmentationEngine::extend) takes the automaton by `&mut` and may grow it,
/// [`verify`](PropertyAugmentationEngine::verify) takes it by shared reference and only ever
/// mutates the overlay's confirmation bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct PropertyAugmentationEngine;

impl PropertyAugmentationEngine {
    /// Runs all `properties` against `tentative`, synthesizing missing THEN behaviour into the
    /// automaton. Every synthesized transition starts a new *wave* for the exploration branch
    /// crossing it, and no branch may synthesize beyond `max_waves` waves; walking pre-existing
    /// structure is always free. With `max_waves = 0` this is a pure validation of the automaton
    /// against the properties.
    pub fn extend(
        tentative: &mut Automaton,
        properties: &[PropertyAutomaton],
        max_waves: u32,
    ) -> Result<(), IfThenError> {
        tentative.debug_assert_consistent();
        let run = Run {
            target: Target::Extend(tentative),
            properties,
            max_waves,
            worklist: CrossProductWorklist::new(),
            arena: Vec::new(),
            synthesized: Set::default(),
        };
        run.execute()
    }

    /// Checks that every speculative path of `overlay` is explained by some THEN chain of the
    /// `properties`, without modifying the tentative automaton. Overlay states are confirmed as
    /// obligations traverse them; any state left unconfirmed at the end is reported via
    /// [`IfThenError::UnconfirmedPath`].
    pub fn verify(
        tentative: &Automaton,
        overlay: &mut QuestionPathOverlay,
        properties: &[PropertyAutomaton],
    ) -> Result<(), IfThenError> {
        let run = Run {
            target: Target::Verify(tentative, overlay),
            properties,
            max_waves: 0,
            worklist: CrossProductWorklist::new(),
            arena: Vec::new(),
            synthesized: Set::default(),
        };
        run.execute()
    }
}

/// What the traversal walks and what it may mutate.
enum Target<'a> {
    Extend(&'a mut Automaton),
    Verify(&'a Automaton, &'a mut QuestionPathOverlay),
}

impl Target<'_> {
    fn automaton(&self) -> &Automaton {
        match self {
            Target::Extend(automaton) => automaton,
            Target::Verify(automaton, _) => automaton,
        }
    }

    fn acceptance(&self, state: StateId) -> Acceptance {
        match self {
            Target::Extend(automaton) => automaton
                .acceptance(state)
                .expect("tentative state must exist"),
            Target::Verify(automaton, overlay) => automaton
                .acceptance(state)
                .or_else(|| overlay.acceptance(state))
                .expect("state must be real or virtual"),
        }
    }

    fn successor(&self, state: StateId, symbol: char) -> Option<StateId> {
        match self {
            Target::Extend(automaton) => automaton.successor(state, symbol),
            Target::Verify(automaton, overlay) => automaton
                .successor(state, symbol)
                .or_else(|| overlay.successor(state, symbol)),
        }
    }

    /// The symbols leaving `state` on the tentative side, including the overlay side when one
    /// is present.
    fn symbols_from(&self, state: StateId) -> BTreeSet<char> {
        let mut symbols: BTreeSet<char> = match self.automaton().state(state) {
            Some(real) => real.transitions().keys().copied().collect(),
            None => BTreeSet::new(),
        };
        if let Target::Verify(_, overlay) = self {
            symbols.extend(overlay.transitions_from(state).map(|(symbol, _)| symbol));
        }
        symbols
    }

    fn can_extend(&self) -> bool {
        matches!(self, Target::Extend(_))
    }
}

struct Run<'a, 'p> {
    target: Target<'a>,
    properties: &'p [PropertyAutomaton],
    max_waves: u32,
    worklist: CrossProductWorklist<usize, ElementKey, usize>,
    /// All admitted elements, addressed by the indices circulating in the worklist. Doubles as
    /// the record of visited elements for re-exploration and trace reconstruction.
    arena: Vec<ExplorationElement>,
    /// Tentative transitions synthesized by this run; crossing one advances the wave counter.
    synthesized: Set<(StateId, char)>,
}

impl Run<'_, '_> {
    fn execute(mut self) -> Result<(), IfThenError> {
        let properties = self.properties;
        let initial = self.target.automaton().initial();
        for (index, property) in properties.iter().enumerate() {
            self.offer(ExplorationElement {
                tentative: initial,
                then: None,
                property: index,
                if_state: Some(property.automaton().initial()),
                depth: 0,
                symbol: None,
                prev: None,
            });
        }
        while let Some(index) = self.worklist.pop() {
            self.process(index)?;
        }

        if let Target::Verify(_, overlay) = &self.target {
            if !overlay.fully_confirmed() {
                return Err(IfThenError::UnconfirmedPath {
                    states: overlay.unconfirmed().collect(),
                });
            }
        }
        if let Target::Extend(automaton) = &self.target {
            automaton.debug_assert_consistent();
            debug!(
                "property augmentation synthesized {} transitions over {} elements",
                self.synthesized.len(),
                self.arena.len(),
            );
        }
        Ok(())
    }

    fn process(&mut self, index: usize) -> Result<(), IfThenError> {
        let element = self.arena[index];
        let properties = self.properties;
        let property = &properties[element.property];

        // an active THEN obligation must agree with the tentative classification
        if let Some((_, then_state)) = element.then {
            let expected = property
                .automaton()
                .acceptance(then_state)
                .expect("fragment state must exist");
            if self.target.acceptance(element.tentative) != expected {
                return Err(IfThenError::MergeConflict {
                    trace: self.trace_of(index),
                });
            }
        }

        // a THEN link whose entry matches the classification starts a new obligation without
        // consuming a symbol; this is what unrolls chained fragments
        if let Some(if_state) = element.if_state {
            if let Some(&entry) = property.then_links().get(&if_state) {
                if property
                    .automaton()
                    .acceptance(entry)
                    .expect("fragment entry must exist")
                    == self.target.acceptance(element.tentative)
                {
                    self.offer(ExplorationElement {
                        then: Some((entry, entry)),
                        symbol: None,
                        prev: Some(index),
                        ..element
                    });
                }
            }
        }

        let mut symbols = self.target.symbols_from(element.tentative);
        if let Some((_, then_state)) = element.then {
            symbols.extend(
                property
                    .automaton()
                    .transitions_of(then_state)
                    .keys()
                    .copied(),
            );
        }
        for symbol in symbols {
            self.step(index, symbol)?;
        }
        Ok(())
    }

    /// Advances all active sides of the element simultaneously on `symbol`, synthesizing the
    /// tentative side from the THEN side when extension is permitted and the wave budget allows.
    fn step(&mut self, index: usize, symbol: char) -> Result<(), IfThenError> {
        let element = self.arena[index];
        let properties = self.properties;
        let property = &properties[element.property];

        let then_next = element.then.and_then(|(entry, then_state)| {
            property
                .automaton()
                .successor(then_state, symbol)
                .map(|next| (entry, next))
        });

        let (tentative_next, depth) = match self.target.successor(element.tentative, symbol) {
            Some(next) => {
                let crossed = self.synthesized.contains(&(element.tentative, symbol));
                (next, element.depth + u32::from(crossed))
            }
            None => {
                // only a THEN obligation may drive the automaton beyond its frontier
                let Some((_, then_target)) = then_next else {
                    return Ok(());
                };
                if !self.target.can_extend() || element.depth >= self.max_waves {
                    trace!(
                        "wave budget exhausted at {} on `{symbol}`",
                        element.tentative
                    );
                    return Ok(());
                }
                let acceptance = property
                    .automaton()
                    .acceptance(then_target)
                    .expect("fragment target must exist");
                let fresh = self.synthesize(element.tentative, symbol, acceptance);
                // the new transition may let patterns match that had nowhere to go before, so
                // everything that was expanded at this state has to be reconsidered
                self.requeue_where(|seen| {
                    seen.tentative == element.tentative && seen.if_state.is_some()
                });
                (fresh, element.depth + 1)
            }
        };

        // an obligation crossing into a speculative state is what explains it
        if then_next.is_some() {
            self.confirm(tentative_next);
        }

        let if_next = element
            .if_state
            .and_then(|if_state| property.automaton().successor(if_state, symbol));
        if if_next.is_none() && then_next.is_none() {
            return Ok(());
        }
        self.offer(ExplorationElement {
            tentative: tentative_next,
            then: then_next,
            property: element.property,
            if_state: if_next,
            depth,
            symbol: Some(symbol),
            prev: Some(index),
        });
        Ok(())
    }

    fn offer(&mut self, element: ExplorationElement) -> bool {
        let index = self.arena.len();
        if self
            .worklist
            .offer_if_new(element.property, element.key(), index)
        {
            trace!("admitting {element:?} as #{index}");
            self.arena.push(element);
            true
        } else {
            false
        }
    }

    fn synthesize(&mut self, from: StateId, symbol: char, acceptance: Acceptance) -> StateId {
        let Target::Extend(automaton) = &mut self.target else {
            unreachable!("synthesis is gated on extension mode");
        };
        let fresh = automaton.add_state(acceptance);
        automaton
            .set_transition(from, symbol, fresh)
            .expect("the row has no entry for this symbol");
        self.synthesized.insert((from, symbol));
        debug!("synthesized {from} --{symbol}--> {fresh}");
        fresh
    }

    /// In verification mode, marks a traversed speculative state as explained and re-offers the
    /// elements that already touched it.
    fn confirm(&mut self, state: StateId) {
        let newly_confirmed = match &mut self.target {
            Target::Verify(_, overlay) => overlay.confirm(state),
            Target::Extend(_) => false,
        };
        if newly_confirmed {
            trace!("confirmed speculative state {state}");
            self.requeue_where(|seen| seen.tentative == state);
        }
    }

    fn requeue_where(&mut self, keep: impl Fn(&ExplorationElement) -> bool) {
        let again: Vec<usize> = self
            .arena
            .iter()
            .enumerate()
            .filter(|(_, element)| keep(element))
            .map(|(index, _)| index)
            .collect();
        for index in again {
            self.worklist.requeue(index);
        }
    }

    fn trace_of(&self, index: usize) -> Vec<TraceStep> {
        let mut steps = Vec::new();
        let mut cursor = Some(index);
        while let Some(current) = cursor {
            let element = self.arena[current];
            steps.push(TraceStep {
                symbol: element.symbol,
                tentative: element.tentative,
                if_state: element.if_state,
                then_state: element.then.map(|(_, state)| state),
            });
            cursor = element.prev;
        }
        steps.reverse();
        steps
    }
}
