//! Registry of module records.
//!
//! Records are created lazily on first reference to an address. The
//! registry also owns the dependency graph and the event-log listener, and
//! implements the cross-module invalidation cascades.

use dashmap::DashMap;
use lemma_monitoring::SchedulerMetrics;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::domain::dependency_graph::DependencyGraph;
use crate::domain::events::{ModuleEvent, ModuleEventListener, TracingEventLog};
use crate::domain::module_record::ModuleRecord;
use crate::domain::module_state::{CheckingState, DependencyState};
use crate::domain::state_manager::StateManager;
use crate::types::ModuleAddress;

pub(crate) type SharedRecord = Arc<RwLock<ModuleRecord>>;

/// Which checking stage regressed in an upstream module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckRegression {
    /// Well-formedness left `Checked`: dependents lose stages 4 and 5
    WellFormed,
    /// Formal proofs left `Checked`: dependents lose stage 5
    FormallyProved,
}

struct RegistryInner {
    modules: DashMap<ModuleAddress, SharedRecord>,
    graph: Mutex<DependencyGraph>,
    listener: Arc<dyn ModuleEventListener>,
    metrics: SchedulerMetrics,
}

/// Registry of module records. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ModuleRegistry {
    inner: Arc<RegistryInner>,
}

impl ModuleRegistry {
    /// Registry logging events through `tracing`
    pub fn new() -> Self {
        Self::with_listener(Arc::new(TracingEventLog))
    }

    /// Registry reporting events to `listener`
    pub fn with_listener(listener: Arc<dyn ModuleEventListener>) -> Self {
        Self::with_listener_and_metrics(listener, SchedulerMetrics::default())
    }

    /// Registry reporting events to `listener` and cascades to `metrics`
    pub fn with_listener_and_metrics(
        listener: Arc<dyn ModuleEventListener>,
        metrics: SchedulerMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                modules: DashMap::new(),
                graph: Mutex::new(DependencyGraph::new()),
                listener,
                metrics,
            }),
        }
    }

    /// State manager for `address`, creating an empty record on first reference
    pub fn state_manager(&self, address: &ModuleAddress) -> StateManager {
        let record = self
            .inner
            .modules
            .entry(address.clone())
            .or_insert_with(|| {
                trace!(module = %address, "Creating module record");
                Arc::new(RwLock::new(ModuleRecord::new(address.clone())))
            })
            .clone();
        StateManager::new(address.clone(), record, self.clone())
    }

    /// State manager for `address` if a record exists
    pub fn get(&self, address: &ModuleAddress) -> Option<StateManager> {
        let record = self.inner.modules.get(address).map(|r| r.value().clone())?;
        Some(StateManager::new(address.clone(), record, self.clone()))
    }

    /// True if a record exists for `address`
    pub fn contains(&self, address: &ModuleAddress) -> bool {
        self.inner.modules.contains_key(address)
    }

    /// All known addresses, sorted
    pub fn addresses(&self) -> Vec<ModuleAddress> {
        let mut addresses: Vec<ModuleAddress> =
            self.inner.modules.iter().map(|e| e.key().clone()).collect();
        addresses.sort();
        addresses
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.inner.modules.len()
    }

    /// True if there are no records
    pub fn is_empty(&self) -> bool {
        self.inner.modules.is_empty()
    }

    /// Modules `address` requires
    pub fn required_modules(&self, address: &ModuleAddress) -> Vec<ModuleAddress> {
        self.graph().required(address)
    }

    /// Modules requiring `address`
    pub fn dependent_modules(&self, address: &ModuleAddress) -> Vec<ModuleAddress> {
        self.graph().dependents(address)
    }

    /// Delete every record. Returns the number of deleted modules.
    pub fn remove_all(&self) -> usize {
        let mut deleted = 0;
        for address in self.addresses() {
            if let Some(manager) = self.get(&address) {
                if manager.delete().is_ok() {
                    deleted += 1;
                }
            }
        }
        debug!(deleted, "Removed all modules");
        deleted
    }

    pub(crate) fn graph(&self) -> MutexGuard<'_, DependencyGraph> {
        self.inner.graph.lock()
    }

    pub(crate) fn notify(&self, event: ModuleEvent) {
        self.inner.listener.handle_event(&event);
    }

    pub(crate) fn metrics(&self) -> &SchedulerMetrics {
        &self.inner.metrics
    }

    /// Remove the registry entry for `address` if it still holds `record`
    pub(crate) fn detach(&self, address: &ModuleAddress, record: &SharedRecord) {
        self.inner
            .modules
            .remove_if(address, |_, current| Arc::ptr_eq(current, record));
    }

    /// Reset every transitive dependent of `target` that loaded its required
    /// modules back to `Loaded`. Returns the number of reset modules.
    ///
    /// Each dependent is detached from `target` before recursing, so a cycle
    /// terminates. Dependents are reset after their own dependents.
    pub(crate) fn invalidate_dependents(&self, target: &ModuleAddress) -> usize {
        let dependents = self.graph().take_dependents(target);
        let mut reset = 0;
        for dependent in dependents {
            let still_listed = self.graph().requires(&dependent, target);
            if !still_listed {
                continue;
            }
            reset += self.invalidate_dependents(&dependent);
            if self.reset_to_loaded(&dependent) {
                reset += 1;
            }
        }
        reset
    }

    fn reset_to_loaded(&self, address: &ModuleAddress) -> bool {
        self.graph().clear_required(address);

        let Some(record) = self.inner.modules.get(address).map(|r| r.value().clone()) else {
            return false;
        };
        let state = {
            let mut record = record.write();
            if record.state.dependency != DependencyState::LoadedRequiredModules {
                return false;
            }
            record.state.reset_after_imports();
            record.existence_checker = None;
            record.touch();
            record.state
        };
        debug!(module = %address, "Invalidated to loaded imports");
        self.notify(ModuleEvent::state_changed(address, state));
        true
    }

    /// Drop checking results of every transitive dependent of `target`
    pub(crate) fn invalidate_dependent_checks(
        &self,
        target: &ModuleAddress,
        regression: CheckRegression,
    ) -> usize {
        let dependents = self.graph().transitive_dependents(target);
        let mut reset = 0;
        for dependent in dependents {
            let Some(record) = self.inner.modules.get(&dependent).map(|r| r.value().clone())
            else {
                continue;
            };
            let changed = {
                let mut record = record.write();
                let changed = match regression {
                    CheckRegression::WellFormed if !record.state.well_formed.is_initial() => {
                        record.state.reset_after_dependency();
                        record.existence_checker = None;
                        true
                    }
                    CheckRegression::FormallyProved
                        if !record.state.formally_proved.is_initial() =>
                    {
                        record.state.formally_proved = CheckingState::Unchecked;
                        true
                    }
                    _ => false,
                };
                if changed {
                    record.touch();
                    Some(record.state)
                } else {
                    None
                }
            };
            if let Some(state) = changed {
                debug!(module = %dependent, regression = ?regression, "Invalidated dependent checks");
                self.notify(ModuleEvent::state_changed(&dependent, state));
                reset += 1;
            }
        }
        reset
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.inner.modules.len())
            .finish()
    }
}
