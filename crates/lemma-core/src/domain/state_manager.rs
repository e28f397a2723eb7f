//! Sole mutator of a module record.
//!
//! Every setter checks its precondition against the stage lattice, applies
//! the transition under the record's write lock, then (without holding that
//! lock) runs any invalidation cascade and notifies the event log.

use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::domain::diagnostics::{Diagnostic, ModuleDiagnostics, PluginResults};
use crate::domain::events::ModuleEvent;
use crate::domain::module_record::{
    ExistenceChecker, LabelTable, ModuleContent, ModuleRecord, ModuleReference,
};
use crate::domain::module_state::{
    CheckPhase, CheckingState, DependencyState, ImportsState, LoadingFailure, LoadingPhase,
    LoadingState, ModuleState,
};
use crate::domain::registry::{CheckRegression, ModuleRegistry, SharedRecord};
use crate::error::CoreError;
use crate::types::{ModuleAddress, ServiceDescriptor};

/// Handle through which a module record is read and changed.
///
/// Cheap to clone. A handle keeps pointing at its record after `delete()`;
/// every further mutation through it fails with `CoreError::ModuleDeleted`.
#[derive(Clone)]
pub struct StateManager {
    address: ModuleAddress,
    record: SharedRecord,
    registry: ModuleRegistry,
}

impl StateManager {
    pub(crate) fn new(address: ModuleAddress, record: SharedRecord, registry: ModuleRegistry) -> Self {
        Self {
            address,
            record,
            registry,
        }
    }

    /// Address of the managed module
    pub fn address(&self) -> &ModuleAddress {
        &self.address
    }

    // ----- loading -------------------------------------------------------

    /// Loading is running in `phase`. Resets every later stage.
    pub fn set_loading_progress_state(&self, phase: LoadingPhase) -> Result<(), CoreError> {
        self.update("set_loading_progress_state", |record| {
            record.state.loading = LoadingState::InProgress(phase);
            record.state.reset_after_loading();
            record.clear_content();
            record.diagnostics.clear();
            Ok(())
        })
    }

    /// Loading failed. Resets every later stage and keeps only `diagnostics`.
    pub fn set_loading_failure_state(
        &self,
        failure: LoadingFailure,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<(), CoreError> {
        self.update("set_loading_failure_state", |record| {
            record.state.loading = LoadingState::Failed(failure);
            record.state.reset_after_loading();
            record.clear_content();
            record.diagnostics.clear();
            record.diagnostics.set_pipeline(diagnostics);
            Ok(())
        })
    }

    /// Loading finished with parsed `content` and its `labels`
    pub fn set_loaded(&self, content: ModuleContent, labels: LabelTable) -> Result<(), CoreError> {
        self.update("set_loaded", |record| {
            if !matches!(record.state.loading, LoadingState::InProgress(_)) {
                return Err(precondition(record, "set_loaded", "loading in progress"));
            }
            record.state.loading = LoadingState::Loaded;
            record.state.reset_after_loading();
            record.content = Some(content);
            record.labels = labels;
            record.imports.clear();
            record.diagnostics.clear();
            Ok(())
        })
    }

    // ----- imports -------------------------------------------------------

    /// Imports are being loaded
    pub fn set_loading_imports_progress_state(&self) -> Result<(), CoreError> {
        self.update("set_loading_imports_progress_state", |record| {
            require_loaded(record, "set_loading_imports_progress_state")?;
            record.state.imports = ImportsState::InProgress;
            record.state.reset_after_imports();
            record.imports.clear();
            record.diagnostics.clear_pipeline();
            Ok(())
        })
    }

    /// Every import resolved
    pub fn set_loaded_imports(&self, imports: Vec<ModuleReference>) -> Result<(), CoreError> {
        self.update("set_loaded_imports", |record| {
            require_loaded(record, "set_loaded_imports")?;
            record.state.imports = ImportsState::Loaded;
            record.state.reset_after_imports();
            record.imports = imports;
            record.diagnostics.clear_pipeline();
            Ok(())
        })
    }

    /// An import could not be loaded
    pub fn set_loading_imports_failure_state(
        &self,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<(), CoreError> {
        self.update("set_loading_imports_failure_state", |record| {
            require_loaded(record, "set_loading_imports_failure_state")?;
            record.state.imports = ImportsState::Failed;
            record.state.reset_after_imports();
            record.imports.clear();
            record.diagnostics.set_pipeline(diagnostics);
            Ok(())
        })
    }

    // ----- dependencies --------------------------------------------------

    /// Required modules are being loaded
    pub fn set_dependency_progress_state(&self) -> Result<(), CoreError> {
        self.update("set_dependency_progress_state", |record| {
            require_imports(record, "set_dependency_progress_state")?;
            record.state.dependency = DependencyState::InProgress;
            record.state.reset_after_dependency();
            record.diagnostics.clear_pipeline();
            Ok(())
        })
    }

    /// A required module could not be loaded
    pub fn set_dependency_failure_state(&self, diagnostics: Vec<Diagnostic>) -> Result<(), CoreError> {
        self.update("set_dependency_failure_state", |record| {
            require_imports(record, "set_dependency_failure_state")?;
            record.state.dependency = DependencyState::Failed;
            record.state.reset_after_dependency();
            record.diagnostics.set_pipeline(diagnostics);
            Ok(())
        })
    }

    /// Every required module is loaded.
    ///
    /// Replaces this module's required list and registers it as a dependent
    /// of each entry. If the module had already resolved its requirements,
    /// its current dependents are invalidated first.
    pub fn set_loaded_required_modules(&self, required: Vec<ModuleAddress>) -> Result<(), CoreError> {
        let (old, new, added) = self.apply("set_loaded_required_modules", |record| {
            require_imports(record, "set_loaded_required_modules")?;
            record.state.dependency = DependencyState::LoadedRequiredModules;
            record.state.reset_after_dependency();
            record.diagnostics.clear_pipeline();
            Ok(())
        })?;
        if added {
            self.registry.notify(ModuleEvent::added(&self.address));
        }

        // Old edges go first so a cycle cannot lead the cascade back here
        self.registry.graph().clear_required(&self.address);
        let reset = if old.dependency.is_success() {
            self.registry.invalidate_dependents(&self.address)
        } else {
            0
        };
        self.registry.graph().set_required(&self.address, required);
        self.report_cascade(reset);
        self.registry
            .notify(ModuleEvent::state_changed(&self.address, new));
        Ok(())
    }

    // ----- well-formedness -----------------------------------------------

    /// Well-formedness check is running
    pub fn set_well_formed_progress_state(&self, phase: CheckPhase) -> Result<(), CoreError> {
        self.update("set_well_formed_progress_state", |record| {
            require_dependencies(record, "set_well_formed_progress_state")?;
            record.state.well_formed = CheckingState::InProgress(phase);
            record.state.formally_proved = CheckingState::Unchecked;
            record.diagnostics.clear_pipeline();
            Ok(())
        })
    }

    /// Well-formedness check failed in `phase`
    pub fn set_well_formed_failure_state(
        &self,
        phase: CheckPhase,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<(), CoreError> {
        self.update("set_well_formed_failure_state", |record| {
            require_dependencies(record, "set_well_formed_failure_state")?;
            record.state.well_formed = CheckingState::Failed(phase);
            record.state.formally_proved = CheckingState::Unchecked;
            record.diagnostics.set_pipeline(diagnostics);
            Ok(())
        })
    }

    /// Module is well-formed; `checker` is kept for later checks
    pub fn set_well_formed(&self, checker: Arc<dyn ExistenceChecker>) -> Result<(), CoreError> {
        self.update("set_well_formed", |record| {
            require_dependencies(record, "set_well_formed")?;
            record.state.well_formed = CheckingState::Checked;
            record.state.formally_proved = CheckingState::Unchecked;
            record.existence_checker = Some(checker);
            record.diagnostics.clear_pipeline();
            Ok(())
        })
    }

    // ----- formal proofs -------------------------------------------------

    /// Proof check is running
    pub fn set_formally_proved_progress_state(&self, phase: CheckPhase) -> Result<(), CoreError> {
        self.update("set_formally_proved_progress_state", |record| {
            require_well_formed(record, "set_formally_proved_progress_state")?;
            record.state.formally_proved = CheckingState::InProgress(phase);
            record.diagnostics.clear_pipeline();
            Ok(())
        })
    }

    /// Proof check failed in `phase`
    pub fn set_formally_proved_failure_state(
        &self,
        phase: CheckPhase,
        diagnostics: Vec<Diagnostic>,
    ) -> Result<(), CoreError> {
        self.update("set_formally_proved_failure_state", |record| {
            require_well_formed(record, "set_formally_proved_failure_state")?;
            record.state.formally_proved = CheckingState::Failed(phase);
            record.diagnostics.set_pipeline(diagnostics);
            Ok(())
        })
    }

    /// Every proof checked
    pub fn set_formally_proved(&self) -> Result<(), CoreError> {
        self.update("set_formally_proved", |record| {
            require_well_formed(record, "set_formally_proved")?;
            record.state.formally_proved = CheckingState::Checked;
            record.diagnostics.clear_pipeline();
            Ok(())
        })
    }

    // ----- deletion ------------------------------------------------------

    /// Delete the module.
    ///
    /// Every transitive dependent is reset to its loaded imports, the record
    /// moves to `Deleted` and the address leaves the registry.
    pub fn delete(&self) -> Result<(), CoreError> {
        {
            let mut record = self.record.write();
            if record.state.loading == LoadingState::Deleted {
                return Err(CoreError::ModuleDeleted(self.address.clone()));
            }
            record.state.loading = LoadingState::Deleted;
            record.state.reset_after_loading();
            record.clear_content();
            record.diagnostics.clear();
            record.running_service = None;
            record.touch();
        }

        self.registry.graph().clear_required(&self.address);
        let reset = self.registry.invalidate_dependents(&self.address);
        self.registry.detach(&self.address, &self.record);
        self.report_cascade(reset);

        info!(module = %self.address, reset_dependents = reset, "Deleted module");
        self.registry.notify(ModuleEvent::removed(&self.address));
        Ok(())
    }

    // ----- plugin results ------------------------------------------------

    /// Append `errors` and `warnings` reported by `plugin`. Stages are unchanged.
    pub fn add_plugin_results(
        &self,
        plugin: &str,
        errors: Vec<Diagnostic>,
        warnings: Vec<Diagnostic>,
    ) -> Result<(), CoreError> {
        self.update("add_plugin_results", |record| {
            record.diagnostics.add_plugin_results(plugin, errors, warnings);
            Ok(())
        })
    }

    /// Drop the results of `plugin`
    pub fn clear_plugin_results(&self, plugin: &str) -> Result<(), CoreError> {
        self.update("clear_plugin_results", |record| {
            record.diagnostics.clear_plugin_results(plugin);
            Ok(())
        })
    }

    /// Drop the results of every plugin
    pub fn clear_all_plugin_results(&self) -> Result<(), CoreError> {
        self.update("clear_all_plugin_results", |record| {
            record.diagnostics.clear_all_plugin_results();
            Ok(())
        })
    }

    /// Mark which service currently works on the module. Ignored once deleted.
    pub fn set_running_service(&self, service: Option<ServiceDescriptor>) {
        let mut record = self.record.write();
        if record.state.loading != LoadingState::Deleted {
            record.running_service = service;
        }
    }

    // ----- queries -------------------------------------------------------

    /// Snapshot of the five stages
    pub fn state(&self) -> ModuleState {
        self.record.read().state
    }

    /// Readable description of the most advanced stage
    pub fn state_description(&self) -> String {
        self.state().description()
    }

    /// True once `delete()` ran on this record
    pub fn is_deleted(&self) -> bool {
        self.state().loading == LoadingState::Deleted
    }

    /// Stage 1 succeeded
    pub fn is_loaded(&self) -> bool {
        self.state().loading.is_success()
    }

    /// Stage 2 succeeded
    pub fn has_loaded_imports(&self) -> bool {
        self.state().imports.is_success()
    }

    /// Stage 3 succeeded
    pub fn has_loaded_required_modules(&self) -> bool {
        self.state().dependency.is_success()
    }

    /// Stage 4 succeeded
    pub fn is_well_formed(&self) -> bool {
        self.state().well_formed.is_success()
    }

    /// Stage 5 succeeded
    pub fn is_fully_formally_proved(&self) -> bool {
        self.state().formally_proved.is_success()
    }

    /// A failure in any stage before proof checking
    pub fn has_basic_failures(&self) -> bool {
        let state = self.state();
        state.loading.is_failure()
            || state.imports.is_failure()
            || state.dependency.is_failure()
            || state.well_formed.is_failure()
    }

    /// Any pipeline or plugin error
    pub fn has_errors(&self) -> bool {
        self.record.read().diagnostics.has_errors()
    }

    /// Any pipeline or plugin warning
    pub fn has_warnings(&self) -> bool {
        self.record.read().diagnostics.has_warnings()
    }

    /// Pipeline errors followed by plugin errors
    pub fn errors(&self) -> Vec<Diagnostic> {
        self.record.read().diagnostics.errors()
    }

    /// Pipeline warnings followed by plugin warnings
    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.record.read().diagnostics.warnings()
    }

    /// Copy of all diagnostics
    pub fn diagnostics(&self) -> ModuleDiagnostics {
        self.record.read().diagnostics.clone()
    }

    /// Results reported by `plugin`
    pub fn plugin_results(&self, plugin: &str) -> Option<PluginResults> {
        self.record.read().diagnostics.plugin_results(plugin).cloned()
    }

    /// Modules this module requires
    pub fn required_modules(&self) -> Vec<ModuleAddress> {
        self.registry.required_modules(&self.address)
    }

    /// Modules requiring this module
    pub fn dependent_modules(&self) -> Vec<ModuleAddress> {
        self.registry.dependent_modules(&self.address)
    }

    /// Imports stored by the imports stage
    pub fn import_references(&self) -> Vec<ModuleReference> {
        self.record.read().imports.clone()
    }

    /// Label table of the loaded content
    pub fn labels(&self) -> LabelTable {
        self.record.read().labels.clone()
    }

    /// Existence checker stored by a successful well-formedness check
    pub fn existence_checker(&self) -> Option<Arc<dyn ExistenceChecker>> {
        self.record.read().existence_checker()
    }

    /// Parsed content, if loaded
    pub fn content(&self) -> Option<ModuleContent> {
        self.record.read().content.clone()
    }

    /// Service currently working on the module
    pub fn running_service(&self) -> Option<ServiceDescriptor> {
        self.record.read().running_service.clone()
    }

    /// Copy of the whole record
    pub fn snapshot(&self) -> ModuleRecord {
        self.record.read().clone()
    }

    // ----- internals -----------------------------------------------------

    fn update<F>(&self, operation: &'static str, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut ModuleRecord) -> Result<(), CoreError>,
    {
        let (old, new, added) = self.apply(operation, f)?;
        if added {
            self.registry.notify(ModuleEvent::added(&self.address));
        }
        self.propagate(old, new);
        self.registry
            .notify(ModuleEvent::state_changed(&self.address, new));
        Ok(())
    }

    /// Run `f` under the write lock. Returns the states before and after
    /// and whether this was the first transition out of `Undefined`.
    fn apply<F>(&self, operation: &'static str, f: F) -> Result<(ModuleState, ModuleState, bool), CoreError>
    where
        F: FnOnce(&mut ModuleRecord) -> Result<(), CoreError>,
    {
        let mut record = self.record.write();
        if record.state.loading == LoadingState::Deleted {
            return Err(CoreError::ModuleDeleted(self.address.clone()));
        }
        let old = record.state;
        f(&mut record)?;

        if !record.state.well_formed.is_success() {
            record.existence_checker = None;
        }
        let added = !record.registered && !record.state.loading.is_initial();
        if added {
            record.registered = true;
        }
        record.touch();
        let new = record.state;
        debug_assert!(new.satisfies_lattice(), "{} broke the stage lattice", operation);

        trace!(
            module = %self.address,
            operation,
            from = %old.description(),
            to = %new.description(),
            "State transition"
        );
        Ok((old, new, added))
    }

    /// Invalidate dependents whose results relied on a stage this module lost
    fn propagate(&self, old: ModuleState, new: ModuleState) {
        let reset = if old.dependency.is_success() && !new.dependency.is_success() {
            self.registry.graph().clear_required(&self.address);
            self.registry.invalidate_dependents(&self.address)
        } else if old.well_formed.is_success() && !new.well_formed.is_success() {
            self.registry
                .invalidate_dependent_checks(&self.address, CheckRegression::WellFormed)
        } else if old.formally_proved.is_success() && !new.formally_proved.is_success() {
            self.registry
                .invalidate_dependent_checks(&self.address, CheckRegression::FormallyProved)
        } else {
            0
        };
        self.report_cascade(reset);
    }

    fn report_cascade(&self, reset: usize) {
        if reset > 0 {
            debug!(module = %self.address, reset_modules = reset, "Cascade invalidation");
            self.registry
                .metrics()
                .record_cascade_invalidation(self.address.as_str(), reset);
        }
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

fn precondition(record: &ModuleRecord, operation: &str, expected: &str) -> CoreError {
    CoreError::illegal(
        &record.address,
        format!(
            "{} requires {}, but the module is at \"{}\"",
            operation,
            expected,
            record.state.description()
        ),
    )
}

fn require_loaded(record: &ModuleRecord, operation: &str) -> Result<(), CoreError> {
    if record.state.loading.is_success() {
        Ok(())
    } else {
        Err(precondition(record, operation, "a loaded module"))
    }
}

fn require_imports(record: &ModuleRecord, operation: &str) -> Result<(), CoreError> {
    if record.state.imports.is_success() {
        Ok(())
    } else {
        Err(precondition(record, operation, "loaded imports"))
    }
}

fn require_dependencies(record: &ModuleRecord, operation: &str) -> Result<(), CoreError> {
    if record.state.dependency.is_success() {
        Ok(())
    } else {
        Err(precondition(record, operation, "loaded required modules"))
    }
}

fn require_well_formed(record: &ModuleRecord, operation: &str) -> Result<(), CoreError> {
    if record.state.well_formed.is_success() {
        Ok(())
    } else {
        Err(precondition(record, operation, "a well-formed module"))
    }
}
