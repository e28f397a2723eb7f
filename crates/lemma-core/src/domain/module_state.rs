//! The five verification stages of a module.
//!
//! Every stage is a tagged union with an initial value, progress values,
//! exactly one success value and a family of failure values. Stages form a
//! lattice: a stage may leave its initial value only after every earlier
//! stage reached success.

use serde::{Deserialize, Serialize};

/// Progress while a module is being located and read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadingPhase {
    /// Resolving the address to a source
    Locating,
    /// Downloading into the local buffer
    LoadingFromWeb,
    /// Reading the local buffer
    LoadingFromBuffer,
    /// Building the in-memory representation
    LoadingIntoMemory,
}

/// Ways loading can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadingFailure {
    /// The address could not be resolved
    LocatingFailed,
    /// Download failed
    LoadingFromWebFailed,
    /// The local buffer could not be read or parsed
    LoadingFromBufferFailed,
    /// The in-memory representation could not be built
    LoadingIntoMemoryFailed,
}

/// Stage 1: loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadingState {
    /// Nothing happened yet
    #[default]
    Undefined,
    /// Loading is running
    InProgress(LoadingPhase),
    /// Content and labels are available
    Loaded,
    /// Loading failed
    Failed(LoadingFailure),
    /// The record was deleted; terminal
    Deleted,
}

impl LoadingState {
    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            LoadingState::Undefined => "undefined",
            LoadingState::InProgress(LoadingPhase::Locating) => "locating",
            LoadingState::InProgress(LoadingPhase::LoadingFromWeb) => "loading from web",
            LoadingState::InProgress(LoadingPhase::LoadingFromBuffer) => "loading from buffer",
            LoadingState::InProgress(LoadingPhase::LoadingIntoMemory) => "loading into memory",
            LoadingState::Loaded => "loaded",
            LoadingState::Failed(LoadingFailure::LocatingFailed) => "locating failed",
            LoadingState::Failed(LoadingFailure::LoadingFromWebFailed) => "loading from web failed",
            LoadingState::Failed(LoadingFailure::LoadingFromBufferFailed) => {
                "loading from buffer failed"
            }
            LoadingState::Failed(LoadingFailure::LoadingIntoMemoryFailed) => {
                "loading into memory failed"
            }
            LoadingState::Deleted => "deleted",
        }
    }

    /// Success value reached
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, LoadingState::Loaded)
    }

    /// Any failure value
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, LoadingState::Failed(_))
    }

    /// Initial value
    #[inline]
    pub fn is_initial(&self) -> bool {
        matches!(self, LoadingState::Undefined)
    }
}

/// Stage 2: resolving imports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImportsState {
    /// Not started
    #[default]
    Undefined,
    /// Imports are being loaded
    InProgress,
    /// All imports resolved
    Loaded,
    /// At least one import could not be loaded
    Failed,
}

impl ImportsState {
    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            ImportsState::Undefined => "undefined",
            ImportsState::InProgress => "loading imports",
            ImportsState::Loaded => "loaded imports",
            ImportsState::Failed => "loading imports failed",
        }
    }

    /// Success value reached
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, ImportsState::Loaded)
    }

    /// Any failure value
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, ImportsState::Failed)
    }

    /// Initial value
    #[inline]
    pub fn is_initial(&self) -> bool {
        matches!(self, ImportsState::Undefined)
    }
}

/// Stage 3: resolving the required-module graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DependencyState {
    /// Not started
    #[default]
    Undefined,
    /// Required modules are being loaded
    InProgress,
    /// Every required module is loaded
    LoadedRequiredModules,
    /// A required module could not be loaded
    Failed,
}

impl DependencyState {
    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            DependencyState::Undefined => "undefined",
            DependencyState::InProgress => "loading required modules",
            DependencyState::LoadedRequiredModules => "loaded required modules",
            DependencyState::Failed => "loading required modules failed",
        }
    }

    /// Success value reached
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, DependencyState::LoadedRequiredModules)
    }

    /// Any failure value
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, DependencyState::Failed)
    }

    /// Initial value
    #[inline]
    pub fn is_initial(&self) -> bool {
        matches!(self, DependencyState::Undefined)
    }
}

/// Which part of a check is running or failed: the required modules or the module itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckPhase {
    /// Checking required modules
    External,
    /// Checking the module's own content
    Internal,
}

/// Stages 4 and 5: well-formedness and formal proof checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CheckingState {
    /// Not checked
    #[default]
    Unchecked,
    /// Check is running
    InProgress(CheckPhase),
    /// Check passed
    Checked,
    /// Check failed in the given phase
    Failed(CheckPhase),
}

impl CheckingState {
    /// Human readable description; `subject` names the check
    pub fn describe(&self, subject: &str) -> String {
        match self {
            CheckingState::Unchecked => format!("{} unchecked", subject),
            CheckingState::InProgress(CheckPhase::External) => {
                format!("checking required modules ({})", subject)
            }
            CheckingState::InProgress(CheckPhase::Internal) => format!("checking {}", subject),
            CheckingState::Checked => format!("{} checked", subject),
            CheckingState::Failed(CheckPhase::External) => {
                format!("checking required modules ({}) failed", subject)
            }
            CheckingState::Failed(CheckPhase::Internal) => format!("checking {} failed", subject),
        }
    }

    /// Success value reached
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, CheckingState::Checked)
    }

    /// Any failure value
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckingState::Failed(_))
    }

    /// Initial value
    #[inline]
    pub fn is_initial(&self) -> bool {
        matches!(self, CheckingState::Unchecked)
    }
}

/// Snapshot of all five stages of one module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleState {
    /// Stage 1
    pub loading: LoadingState,
    /// Stage 2
    pub imports: ImportsState,
    /// Stage 3
    pub dependency: DependencyState,
    /// Stage 4
    pub well_formed: CheckingState,
    /// Stage 5
    pub formally_proved: CheckingState,
}

impl ModuleState {
    /// True if every non-initial stage is preceded only by successful stages
    pub fn satisfies_lattice(&self) -> bool {
        let stages = [
            (self.loading.is_initial(), self.loading.is_success()),
            (self.imports.is_initial(), self.imports.is_success()),
            (self.dependency.is_initial(), self.dependency.is_success()),
            (self.well_formed.is_initial(), self.well_formed.is_success()),
            (self.formally_proved.is_initial(), self.formally_proved.is_success()),
        ];
        // Deleted records have every later stage reset.
        if self.loading == LoadingState::Deleted {
            return stages[1..].iter().all(|(initial, _)| *initial);
        }
        stages
            .windows(2)
            .all(|pair| pair[1].0 || pair[0].1)
    }

    /// True if any stage is in a failure value
    pub fn has_failures(&self) -> bool {
        self.loading.is_failure()
            || self.imports.is_failure()
            || self.dependency.is_failure()
            || self.well_formed.is_failure()
            || self.formally_proved.is_failure()
    }

    /// Description of the most advanced stage that left its initial value
    pub fn description(&self) -> String {
        if !self.formally_proved.is_initial() {
            return self.formally_proved.describe("formal proofs");
        }
        if !self.well_formed.is_initial() {
            return self.well_formed.describe("well-formedness");
        }
        if !self.dependency.is_initial() {
            return self.dependency.description().to_string();
        }
        if !self.imports.is_initial() {
            return self.imports.description().to_string();
        }
        self.loading.description().to_string()
    }

    /// Reset stages 2 to 5
    pub(crate) fn reset_after_loading(&mut self) {
        self.imports = ImportsState::Undefined;
        self.reset_after_imports();
    }

    /// Reset stages 3 to 5
    pub(crate) fn reset_after_imports(&mut self) {
        self.dependency = DependencyState::Undefined;
        self.reset_after_dependency();
    }

    /// Reset stages 4 and 5
    pub(crate) fn reset_after_dependency(&mut self) {
        self.well_formed = CheckingState::Unchecked;
        self.formally_proved = CheckingState::Unchecked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fully_checked() -> ModuleState {
        ModuleState {
            loading: LoadingState::Loaded,
            imports: ImportsState::Loaded,
            dependency: DependencyState::LoadedRequiredModules,
            well_formed: CheckingState::Checked,
            formally_proved: CheckingState::Checked,
        }
    }

    #[test]
    fn test_default_state_is_initial() {
        let state = ModuleState::default();
        assert!(state.loading.is_initial());
        assert!(state.imports.is_initial());
        assert!(state.dependency.is_initial());
        assert!(state.well_formed.is_initial());
        assert!(state.formally_proved.is_initial());
        assert!(state.satisfies_lattice());
        assert_eq!(state.description(), "undefined");
    }

    #[test]
    fn test_lattice_detects_gap() {
        let mut state = fully_checked();
        assert!(state.satisfies_lattice());

        state.dependency = DependencyState::InProgress;
        assert!(!state.satisfies_lattice());

        state.reset_after_dependency();
        assert!(state.satisfies_lattice());
    }

    #[test]
    fn test_deleted_requires_reset_stages() {
        let mut state = fully_checked();
        state.loading = LoadingState::Deleted;
        assert!(!state.satisfies_lattice());
        state.reset_after_loading();
        assert!(state.satisfies_lattice());
    }

    #[test]
    fn test_description_follows_most_advanced_stage() {
        let mut state = ModuleState {
            loading: LoadingState::InProgress(LoadingPhase::LoadingFromWeb),
            ..Default::default()
        };
        assert_eq!(state.description(), "loading from web");

        state.loading = LoadingState::Loaded;
        state.imports = ImportsState::Failed;
        assert_eq!(state.description(), "loading imports failed");
        assert!(state.has_failures());

        let mut state = fully_checked();
        state.formally_proved = CheckingState::InProgress(CheckPhase::Internal);
        assert_eq!(state.description(), "checking formal proofs");

        state.formally_proved = CheckingState::Failed(CheckPhase::External);
        assert_eq!(
            state.description(),
            "checking required modules (formal proofs) failed"
        );
    }

    #[test]
    fn test_stage_predicates() {
        assert!(LoadingState::Failed(LoadingFailure::LocatingFailed).is_failure());
        assert!(!LoadingState::Deleted.is_success());
        assert!(DependencyState::LoadedRequiredModules.is_success());
        assert!(CheckingState::Failed(CheckPhase::Internal).is_failure());
        assert!(!CheckingState::InProgress(CheckPhase::Internal).is_success());
    }
}
