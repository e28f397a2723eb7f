use std::sync::Arc;

use crate::application::process_manager::ServiceProcessManager;
use crate::application::service_call::ServiceCall;
use crate::application::service_process::ServiceProcess;
use crate::application::service_result::ServiceResult;
use crate::application::thread_context;
use crate::domain::registry::ModuleRegistry;
use crate::domain::state_manager::StateManager;
use crate::error::CoreError;
use crate::types::{ModuleAddress, Parameters};
use crate::ServiceExecutor;

/// What an executor sees of its call: the call itself, the target module and
/// a way to run nested calls on the same process.
#[derive(Clone)]
pub struct ServiceContext {
    manager: ServiceProcessManager,
    process: Arc<ServiceProcess>,
    call: Arc<ServiceCall>,
    state: StateManager,
}

impl ServiceContext {
    pub(crate) fn new(
        manager: ServiceProcessManager,
        process: Arc<ServiceProcess>,
        call: Arc<ServiceCall>,
        state: StateManager,
    ) -> Self {
        Self {
            manager,
            process,
            call,
            state,
        }
    }

    /// The running call
    pub fn call(&self) -> &Arc<ServiceCall> {
        &self.call
    }

    /// The process owning the call
    pub fn process(&self) -> &Arc<ServiceProcess> {
        &self.process
    }

    /// Target module
    pub fn module(&self) -> &ModuleAddress {
        self.call.module()
    }

    /// Call parameters
    pub fn parameters(&self) -> &Parameters {
        self.call.params()
    }

    /// Service configuration
    pub fn config(&self) -> &Parameters {
        self.call.config()
    }

    /// State manager of the target module; the call holds its lock
    pub fn state_manager(&self) -> &StateManager {
        &self.state
    }

    /// All modules, for reading state of modules this call does not lock
    pub fn registry(&self) -> &ModuleRegistry {
        self.manager.registry()
    }

    /// Report live progress
    pub fn set_progress(&self, percentage: f64, description: impl Into<String>) {
        self.call.set_progress(percentage, description);
    }

    /// Mark the result as carrying warnings
    pub fn add_warning_flag(&self) {
        self.call.flag_warnings();
    }

    /// Mark the result as carrying errors
    pub fn add_error_flag(&self) {
        self.call.flag_errors();
    }

    /// `Err(CoreError::Interrupted)` once the process was asked to stop
    pub fn check_interrupted(&self) -> Result<(), CoreError> {
        thread_context::check_interrupted()
    }

    /// Run a registered plugin on `module` as a nested call of this one
    pub fn execute_plugin(
        &self,
        plugin_id: &str,
        module: &ModuleAddress,
        params: Parameters,
    ) -> Result<ServiceResult, CoreError> {
        self.manager
            .execute_plugin(plugin_id, module, params, Some(&self.process))
    }

    /// Run `executor` on `module` as a nested call of this one
    pub fn execute_service(
        &self,
        executor: &dyn ServiceExecutor,
        module: &ModuleAddress,
        params: Parameters,
    ) -> Result<ServiceResult, CoreError> {
        self.manager
            .execute_service(executor, module, params, &self.process)
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("process", &self.process.id())
            .field("call", &self.call.id())
            .field("module", self.call.module())
            .finish()
    }
}
