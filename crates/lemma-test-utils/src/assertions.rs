//! Assertion utilities for validating module stages.

use lemma_core::{ModuleRegistry, ModuleState};
use thiserror::Error;

/// Error type for lattice validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LatticeViolation {
    /// A stage left its initial value before its predecessor succeeded
    #[error("Stage {stage} of {module} is \"{actual}\" before its predecessor succeeded")]
    PrematureStage {
        /// Module address
        module: String,
        /// Offending stage
        stage: &'static str,
        /// Description of the whole state
        actual: String,
    },
}

/// Check that every non-initial stage follows a successful one
pub fn check_lattice(module: &str, state: &ModuleState) -> Result<(), LatticeViolation> {
    if state.satisfies_lattice() {
        return Ok(());
    }

    let stage = if !state.formally_proved.is_initial() && !state.well_formed.is_success() {
        "formally proved"
    } else if !state.well_formed.is_initial() && !state.dependency.is_success() {
        "well-formed"
    } else if !state.dependency.is_initial() && !state.imports.is_success() {
        "dependency"
    } else {
        "imports"
    };
    Err(LatticeViolation::PrematureStage {
        module: module.to_string(),
        stage,
        actual: format!("{:?}", state),
    })
}

/// Panic unless `state` respects the stage lattice
pub fn assert_lattice_invariant(module: &str, state: &ModuleState) {
    if let Err(violation) = check_lattice(module, state) {
        panic!("{}", violation);
    }
}

/// Panic unless every module in `registry` respects the stage lattice
pub fn assert_registry_lattice(registry: &ModuleRegistry) {
    for address in registry.addresses() {
        if let Some(manager) = registry.get(&address) {
            assert_lattice_invariant(address.as_str(), &manager.state());
        }
    }
}
