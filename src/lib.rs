//! Library for composing partially-learned finite automata with external constraint automata.
//!
//! During model inference, a learner produces a *tentative* deterministic automaton from observed
//! traces. That automaton is rarely the final word: ground-truth behaviour may be available as a
//! *reference* automaton describing everything the system under learning is permitted or required
//! to do, and temporal properties may be available as *IF/THEN* constraint automata, where certain
//! states of a pattern ("IF") carry an attached behaviour fragment ("THEN") that must be spliced
//! into any tentative state the pattern matches. This crate implements the machinery that
//! reconciles a tentative automaton with such constraints:
//!
//! - [`reference::augment`] merges a tentative automaton with a single reference automaton,
//!   detecting classification conflicts or (when permitted) overriding them, and materializing
//!   behaviour the reference prohibits as explicit reject transitions.
//! - [`property::PropertyAugmentationEngine`] validates a tentative automaton against a set of
//!   IF/THEN [`property::PropertyAutomaton`]s and can extend it by a bounded number of *waves* of
//!   newly synthesized transitions, or verify that a speculative [`overlay::QuestionPathOverlay`]
//!   is fully explained by the properties without ever touching the automaton itself.
//! - [`property::ifthen`] converts a plain deterministic automaton into IF/THEN form and checks
//!   the structural well-formedness of the result.
//!
//! Both engines are built on the same primitive, a [`worklist::CrossProductWorklist`]: a strict
//! FIFO queue over pairs (or triples) of states from different automata with per-context visited
//! memoization, which bounds every traversal by the product of the participating automaton sizes
//! and keeps diagnostics reproducible from run to run.
//!
//! Everything here is single-threaded and synchronous. Engines never mutate their inputs, with
//! one exception that is visible in the signatures: extension mode takes the tentative automaton
//! by `&mut` and grows it in place. All other results are freshly built automata, or `None` when
//! an input turns out to be compatible as-is.
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The prelude re-exports the types needed to work with this crate, so that
/// `use automata_augment::prelude::*;` is enough for most purposes.
pub mod prelude {
    pub use super::{
        automaton::{Acceptance, Automaton, AutomatonBuilder, AutomatonError, StateId},
        config::AugmentationConfig,
        overlay::QuestionPathOverlay,
        property::{
            ifthen, IfThenError, PropertyAugmentationEngine, PropertyAutomaton, TraceStep,
        },
        reference::{self, ConflictError, StatePair},
        worklist::CrossProductWorklist,
        Map, Set, Show,
    };
}

/// Defines the state/transition data structure all engines operate on.
pub mod automaton;

/// Explicit configuration values threaded through engine calls.
pub mod config;

/// Speculative transition overlays layered over a tentative automaton.
pub mod overlay;

/// Merging and validation against IF/THEN constraint automata.
pub mod property;

/// Merging against a single reference automaton.
pub mod reference;

/// FIFO cross-product traversal machinery shared by the engines.
pub mod worklist;

/// Type alias for sets, we use this to hide which type of `HashSet` we are actually using.
pub type Set<S> = fxhash::FxHashSet<S>;
/// Type alias for maps, we use this to hide which type of `HashMap` we are actually using.
pub type Map<K, V> = fxhash::FxHashMap<K, V>;

/// Helper trait which can be used to display states, symbols and such in diagnostics.
pub trait Show {
    /// Returns a human readable representation of `self`, for a state index that should be
    /// for example q0, q1, q2, ... Just use something that makes sense. This is mainly used
    /// for tracing and error rendering.
    fn show(&self) -> String;
}

impl Show for char {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl<S: Show> Show for Option<S> {
    fn show(&self) -> String {
        match self {
            None => "-".to_string(),
            Some(x) => x.show(),
        }
    }
}

impl<S: Show> Show for &S {
    fn show(&self) -> String {
        S::show(*self)
    }
}
