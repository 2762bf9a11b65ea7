/// Configuration for the augmentation engines. The original design kept these knobs in ambient
/// shared state; here they are an explicit value handed to each engine call, so two invocations
/// with different settings can never interfere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AugmentationConfig {
    /// Permit the reference automaton to override the classification of tentative states. When
    /// unset, any disagreement is reported as a [`crate::reference::ConflictError`] instead.
    pub override_labels: bool,
    /// Treat the reference automaton as partial: symbols the reference does not define are
    /// tolerated and exploration continues with the reference side exhausted. When unset, such
    /// symbols are conflicts.
    pub partial_reference: bool,
    /// Upper bound on the number of waves of newly synthesized transitions the property engine
    /// may add in extension mode.
    pub max_waves: u32,
    /// Enables the debug-only cross-checks (structural re-comparison of engine results,
    /// consistency sweeps). These are assertions, not errors, and are compiled out of release
    /// builds regardless of this flag.
    pub check_invariants: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            override_labels: false,
            partial_reference: false,
            max_waves: 0,
            check_invariants: cfg!(debug_assertions),
        }
    }
}
