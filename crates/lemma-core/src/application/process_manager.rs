//! Service process manager.
//!
//! Composes the arbiter, the process and call lists and the plugin registry.
//! `execute_service` is the containment boundary: executor errors and panics
//! become failed results, cancellation propagates, and the module lock is
//! released on every path.

use dashmap::DashMap;
use lemma_monitoring::SchedulerMetrics;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::arbiter::ModuleArbiter;
use crate::application::context::ServiceContext;
use crate::application::service_call::ServiceCall;
use crate::application::service_process::ServiceProcess;
use crate::application::service_result::ServiceResult;
use crate::application::thread_context;
use crate::config::SchedulerConfig;
use crate::domain::registry::ModuleRegistry;
use crate::error::CoreError;
use crate::types::{CallId, ModuleAddress, Parameters, ProcessId, ServiceDescriptor};
use crate::ServiceExecutor;

struct ManagerInner {
    config: SchedulerConfig,
    registry: ModuleRegistry,
    arbiter: ModuleArbiter,
    plugins: DashMap<String, Arc<dyn ServiceExecutor>>,
    processes: RwLock<Vec<Arc<ServiceProcess>>>,
    calls: RwLock<VecDeque<Arc<ServiceCall>>>,
    next_process_id: AtomicU64,
    next_call_id: AtomicU64,
    metrics: SchedulerMetrics,
}

/// Runs services on modules. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ServiceProcessManager {
    inner: Arc<ManagerInner>,
}

impl ServiceProcessManager {
    /// Manager over `registry`
    pub fn new(registry: ModuleRegistry, config: SchedulerConfig) -> Result<Self, CoreError> {
        let metrics = if config.enable_metrics {
            SchedulerMetrics::default()
        } else {
            SchedulerMetrics::disabled()
        };
        Self::with_metrics(registry, config, metrics)
    }

    /// Manager over `registry` reporting to `metrics`
    pub fn with_metrics(
        registry: ModuleRegistry,
        config: SchedulerConfig,
        metrics: SchedulerMetrics,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let arbiter = ModuleArbiter::with_metrics(config.lock_poll_interval(), metrics.clone());
        debug!(
            lock_poll_interval_ms = config.lock_poll_interval_ms,
            retain_payloads = config.retain_payloads,
            "Creating service process manager"
        );
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                registry,
                arbiter,
                plugins: DashMap::new(),
                processes: RwLock::new(Vec::new()),
                calls: RwLock::new(VecDeque::new()),
                next_process_id: AtomicU64::new(1),
                next_call_id: AtomicU64::new(1),
                metrics,
            }),
        })
    }

    /// Module registry
    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    /// Configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Lock table
    pub fn arbiter(&self) -> &ModuleArbiter {
        &self.inner.arbiter
    }

    // ----- plugin registry -----------------------------------------------

    /// Register `executor` under its descriptor id, returning the one it replaces
    pub fn register_plugin(&self, executor: Arc<dyn ServiceExecutor>) -> Option<Arc<dyn ServiceExecutor>> {
        let id = executor.descriptor().id.clone();
        info!(plugin = %id, name = %executor.descriptor().name, "Registering plugin");
        self.inner.plugins.insert(id, executor)
    }

    /// Executor registered under `plugin_id`
    pub fn plugin(&self, plugin_id: &str) -> Option<Arc<dyn ServiceExecutor>> {
        self.inner.plugins.get(plugin_id).map(|e| e.value().clone())
    }

    /// Descriptors of all registered plugins, sorted by id
    pub fn plugins(&self) -> Vec<ServiceDescriptor> {
        let mut plugins: Vec<ServiceDescriptor> = self
            .inner
            .plugins
            .iter()
            .map(|e| e.value().descriptor().clone())
            .collect();
        plugins.sort_by(|a, b| a.id.cmp(&b.id));
        plugins
    }

    // ----- processes and calls -------------------------------------------

    /// New running process bound to the calling thread
    pub fn create_service_process(&self, label: impl Into<String>) -> Arc<ServiceProcess> {
        let id = ProcessId(self.inner.next_process_id.fetch_add(1, Ordering::SeqCst));
        let process = Arc::new(ServiceProcess::new(id, label));
        self.inner.processes.write().push(process.clone());
        debug!(process_id = %id, label = %process.label(), "Created service process");
        self.inner
            .metrics
            .record_running_processes(self.running_service_processes().len());
        process
    }

    /// Push a call for `service` on `module` onto `process` and acquire the
    /// module lock, waiting while another process holds it.
    pub fn create_service_call(
        &self,
        service: &ServiceDescriptor,
        module: &ModuleAddress,
        config: Parameters,
        params: Parameters,
        process: &Arc<ServiceProcess>,
    ) -> Result<Arc<ServiceCall>, CoreError> {
        if !process.is_running() {
            return Err(CoreError::ProcessNotRunning(process.id()));
        }

        let parent = process.current_call();
        let id = CallId(self.inner.next_call_id.fetch_add(1, Ordering::SeqCst));
        let call = Arc::new(ServiceCall::new(
            id,
            service.clone(),
            module.clone(),
            config,
            params,
            process,
            parent.clone(),
        ));
        self.inner.calls.write().push_back(call.clone());
        process.set_current_call(Some(call.clone()));

        call.pause();
        let locked = self.inner.arbiter.lock(process, module, service);
        call.resume();

        match locked {
            Ok(new_lock) => {
                call.set_new_lock(new_lock);
                self.inner
                    .registry
                    .state_manager(module)
                    .set_running_service(Some(service.clone()));
                debug!(
                    call_id = %id,
                    process_id = %process.id(),
                    module = %module,
                    service = %service,
                    new_lock,
                    "Created service call"
                );
                Ok(call)
            }
            Err(err) => {
                // Cancelled while waiting for the lock
                interrupt_call(&call);
                process.set_current_call(parent);
                debug!(call_id = %id, module = %module, "Service call cancelled before start");
                Err(err)
            }
        }
    }

    /// Pop `call` from its process and release the module lock if the call
    /// acquired it.
    pub fn end_service_call(&self, call: &Arc<ServiceCall>) -> Result<(), CoreError> {
        let process = call.process().ok_or_else(|| {
            CoreError::Other(format!(
                "process {} of call {} no longer exists",
                call.process_id(),
                call.id()
            ))
        })?;

        match process.current_call() {
            Some(current) if Arc::ptr_eq(&current, call) => {
                process.set_current_call(call.parent().cloned());
            }
            _ => warn!(
                call_id = %call.id(),
                process_id = %process.id(),
                "Ended call is not the current call of its process"
            ),
        }

        if let Some(state) = self.inner.registry.get(call.module()) {
            state.set_running_service(enclosing_service(call));
        }

        let released = if call.has_new_lock() {
            self.inner.arbiter.unlock(&process, call.module())
        } else {
            Ok(false)
        };

        let outcome = call
            .result()
            .map(|result| result.outcome_label())
            .unwrap_or("unfinished");
        self.inner.metrics.record_service_call(
            &call.service().id,
            call.module().as_str(),
            call.duration().as_secs_f64() * 1000.0,
            outcome,
        );

        if !self.inner.config.retain_payloads {
            call.drop_payload();
        }
        self.trim_call_history();

        released.map(|_| ())
    }

    /// Run `executor` on `module` as a call of `process`.
    ///
    /// Returns the call's result when the executor returned or faulted. A
    /// cancellation is returned as `Err(CoreError::Interrupted)`.
    pub fn execute_service(
        &self,
        executor: &dyn ServiceExecutor,
        module: &ModuleAddress,
        params: Parameters,
        process: &Arc<ServiceProcess>,
    ) -> Result<ServiceResult, CoreError> {
        let service = executor.descriptor().clone();
        let call = self.create_service_call(&service, module, executor.configuration(), params, process)?;
        let context = ServiceContext::new(
            self.clone(),
            process.clone(),
            call.clone(),
            self.inner.registry.state_manager(module),
        );

        let outcome = match thread_context::check_interrupted() {
            Err(err) => Ok(Err(err)),
            Ok(()) => panic::catch_unwind(AssertUnwindSafe(|| executor.execute(&context))),
        };

        let result = match outcome {
            Ok(Ok(payload)) => {
                let result = ServiceResult::ok(payload).with_flags(call.has_warnings(), call.has_errors());
                self.finish(&call, result)
            }
            Ok(Err(err)) if err.is_interrupted() => {
                debug!(
                    call_id = %call.id(),
                    process_id = %process.id(),
                    module = %module,
                    service = %service,
                    "Service call interrupted"
                );
                interrupt_call(&call);
                process.set_failure_state();
                Err(err)
            }
            Ok(Err(err)) => self.fault(&call, process, err.to_string()),
            Err(payload) => self.fault(&call, process, panic_payload_to_string(&payload)),
        };

        let ended = self.end_service_call(&call);
        let result = result?;
        ended?;
        Ok(result)
    }

    /// Run the plugin registered under `plugin_id` on `module`.
    ///
    /// With a running `process` the plugin runs as a nested call of it.
    /// Without one a fresh process is created and closed afterwards.
    pub fn execute_plugin(
        &self,
        plugin_id: &str,
        module: &ModuleAddress,
        params: Parameters,
        process: Option<&Arc<ServiceProcess>>,
    ) -> Result<ServiceResult, CoreError> {
        let executor = self
            .plugin(plugin_id)
            .ok_or_else(|| CoreError::ServiceNotFound(plugin_id.to_string()))?;

        if let Some(process) = process {
            return self.execute_service(executor.as_ref(), module, params, process);
        }

        thread_context::clear_interrupt();
        let label = format!("{} {}", executor.descriptor().action, module);
        let process = self.create_service_process(label);
        let result = self.execute_service(executor.as_ref(), module, params, &process);
        match &result {
            Ok(_) => process.set_success_state(),
            Err(_) => process.set_failure_state(),
        }
        thread_context::clear_interrupt();

        info!(
            process_id = %process.id(),
            plugin = %plugin_id,
            module = %module,
            status = ?process.status(),
            "Service process ended"
        );
        self.inner
            .metrics
            .record_running_processes(self.running_service_processes().len());
        result
    }

    /// Every known process, oldest first
    pub fn service_processes(&self) -> Vec<Arc<ServiceProcess>> {
        self.inner.processes.read().clone()
    }

    /// Processes still running
    pub fn running_service_processes(&self) -> Vec<Arc<ServiceProcess>> {
        self.inner
            .processes
            .read()
            .iter()
            .filter(|p| p.is_running())
            .cloned()
            .collect()
    }

    /// Process with id `id`
    pub fn service_process(&self, id: ProcessId) -> Option<Arc<ServiceProcess>> {
        self.inner
            .processes
            .read()
            .iter()
            .find(|p| p.id() == id)
            .cloned()
    }

    /// Retained calls, oldest first
    pub fn service_calls(&self) -> Vec<Arc<ServiceCall>> {
        self.inner.calls.read().iter().cloned().collect()
    }

    /// Modules locked by `process`
    pub fn blocked_modules(&self, process: &ServiceProcess) -> Vec<ModuleAddress> {
        self.inner.arbiter.blocked_modules(process.id())
    }

    /// Ask every running process to stop. Returns how many were asked.
    pub fn terminate_all_service_processes(&self) -> usize {
        let running = self.running_service_processes();
        for process in &running {
            process.interrupt();
        }
        info!(count = running.len(), "Interrupted all running service processes");
        running.len()
    }

    /// Forget every ended process and its calls. Returns how many processes were removed.
    pub fn remove_all_service_processes(&self) -> usize {
        let (removed, running) = {
            let mut processes = self.inner.processes.write();
            let before = processes.len();
            processes.retain(|p| p.is_running());
            let running: HashSet<ProcessId> = processes.iter().map(|p| p.id()).collect();
            (before - processes.len(), running)
        };
        self.inner
            .calls
            .write()
            .retain(|call| running.contains(&call.process_id()));
        debug!(removed, "Removed ended service processes");
        removed
    }

    fn finish(&self, call: &Arc<ServiceCall>, result: ServiceResult) -> Result<ServiceResult, CoreError> {
        call.finish(result.clone())?;
        debug!(
            call_id = %call.id(),
            module = %call.module(),
            service = %call.service(),
            outcome = result.outcome_label(),
            "Service call finished"
        );
        Ok(result)
    }

    fn fault(
        &self,
        call: &Arc<ServiceCall>,
        process: &ServiceProcess,
        message: String,
    ) -> Result<ServiceResult, CoreError> {
        error!(
            call_id = %call.id(),
            process_id = %process.id(),
            module = %call.module(),
            service = %call.service(),
            error = %message,
            "Service call failed"
        );
        let result = ServiceResult::failed(message).with_flags(call.has_warnings(), true);
        process.set_failure_state();
        call.finish(result.clone())?;
        Ok(result)
    }

    /// Drop the oldest ended calls beyond `max_retained_calls`
    fn trim_call_history(&self) {
        let limit = self.inner.config.max_retained_calls;
        if limit == 0 {
            return;
        }
        let mut calls = self.inner.calls.write();
        let mut excess = calls.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }
        calls.retain(|call| {
            if excess > 0 && !call.is_running() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

impl std::fmt::Debug for ServiceProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProcessManager")
            .field("config", &self.inner.config)
            .field("plugins", &self.inner.plugins.len())
            .field("processes", &self.inner.processes.read().len())
            .finish()
    }
}

/// Service of the nearest ancestor call working on the same module
fn enclosing_service(call: &ServiceCall) -> Option<ServiceDescriptor> {
    let mut current = call.parent();
    while let Some(ancestor) = current {
        if ancestor.module() == call.module() {
            return Some(ancestor.service().clone());
        }
        current = ancestor.parent();
    }
    None
}

/// Mark `call` interrupted. A call that already ended keeps its result.
fn interrupt_call(call: &ServiceCall) {
    if let Err(err) = call.interrupt() {
        warn!(
            call_id = %call.id(),
            module = %call.module(),
            error = %err,
            "Interrupted call had already ended"
        );
    }
}

fn panic_payload_to_string(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "unknown panic".to_string()
    }
}

/// JSON payload helper for executors
pub fn payload<T: serde::Serialize>(value: &T) -> Result<Option<Value>, CoreError> {
    Ok(Some(serde_json::to_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::service_call::CallStatus;
    use serde_json::json;
    use std::thread;
    use std::time::Duration;

    struct Scripted {
        descriptor: ServiceDescriptor,
        action: fn(&ServiceContext) -> Result<Option<Value>, CoreError>,
    }

    impl Scripted {
        fn new(id: &str, action: fn(&ServiceContext) -> Result<Option<Value>, CoreError>) -> Arc<Self> {
            Arc::new(Self {
                descriptor: ServiceDescriptor::new(id, id, format!("running {}", id)),
                action,
            })
        }
    }

    impl ServiceExecutor for Scripted {
        fn descriptor(&self) -> &ServiceDescriptor {
            &self.descriptor
        }

        fn execute(&self, context: &ServiceContext) -> Result<Option<Value>, CoreError> {
            (self.action)(context)
        }
    }

    fn manager() -> ServiceProcessManager {
        let config = SchedulerConfig {
            lock_poll_interval_ms: 10,
            ..Default::default()
        };
        ServiceProcessManager::new(ModuleRegistry::new(), config).unwrap()
    }

    fn addr(name: &str) -> ModuleAddress {
        ModuleAddress::new(name)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SchedulerConfig {
            lock_poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            ServiceProcessManager::new(ModuleRegistry::new(), config),
            Err(CoreError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_successful_plugin_releases_lock() {
        let manager = manager();
        manager.register_plugin(Scripted::new("count", |ctx| {
            ctx.set_progress(50.0, "half way");
            ctx.add_warning_flag();
            Ok(Some(json!({"module": ctx.module().as_str()})))
        }));

        let result = manager
            .execute_plugin("count", &addr("M012"), Parameters::new(), None)
            .unwrap();
        assert!(result.is_ok());
        assert!(result.has_warnings());
        assert_eq!(result.payload(), Some(&json!({"module": "M012"})));
        assert_eq!(manager.arbiter().lock_owner(&addr("M012")), None);

        let processes = manager.service_processes();
        assert_eq!(processes.len(), 1);
        assert!(processes[0].was_successful());
        assert_eq!(processes[0].execution_percentage(), 100.0);
        assert!(processes[0].current_call().is_none());
        assert!(manager.registry().state_manager(&addr("M012")).running_service().is_none());
    }

    #[test]
    fn test_unknown_plugin() {
        let manager = manager();
        assert_eq!(
            manager
                .execute_plugin("missing", &addr("M"), Parameters::new(), None)
                .unwrap_err(),
            CoreError::ServiceNotFound("missing".to_string())
        );
        assert!(manager.service_processes().is_empty());
    }

    #[test]
    fn test_error_is_contained() {
        let manager = manager();
        manager.register_plugin(Scripted::new("broken", |_| {
            Err(CoreError::ServiceExecutionError("parser crashed".into()))
        }));

        let result = manager
            .execute_plugin("broken", &addr("M"), Parameters::new(), None)
            .unwrap();
        assert!(!result.is_ok());
        assert!(result.has_errors());
        assert_eq!(
            result.error_message(),
            Some("Service execution error: parser crashed")
        );
        assert!(manager.service_processes()[0].was_failure());
        assert_eq!(manager.arbiter().locked_count(), 0);
    }

    #[test]
    fn test_panic_is_contained() {
        let manager = manager();
        manager.register_plugin(Scripted::new("panicking", |_| panic!("index out of bounds")));

        let result = manager
            .execute_plugin("panicking", &addr("M"), Parameters::new(), None)
            .unwrap();
        assert!(result.has_errors());
        assert_eq!(result.error_message(), Some("panicked: index out of bounds"));
        assert_eq!(manager.arbiter().locked_count(), 0);
    }

    #[test]
    fn test_cancellation_propagates() {
        let manager = manager();
        manager.register_plugin(Scripted::new("cancelling", |ctx| {
            ctx.process().interrupt();
            ctx.check_interrupted()?;
            Ok(None)
        }));

        let err = manager
            .execute_plugin("cancelling", &addr("M"), Parameters::new(), None)
            .unwrap_err();
        assert!(err.is_interrupted());
        assert!(manager.service_processes()[0].was_failure());
        assert_eq!(manager.arbiter().locked_count(), 0);
        assert!(!thread_context::is_interrupted());

        let calls = manager.service_calls();
        assert!(calls[0].result().unwrap().was_interrupted());
    }

    #[test]
    fn test_nested_call_keeps_ancestor_lock() {
        let manager = manager();
        manager.register_plugin(Scripted::new("inner", |ctx| {
            let owner = ctx.registry().state_manager(ctx.module()).running_service();
            Ok(Some(json!({
                "depth": ctx.call().depth(),
                "new_lock": ctx.call().has_new_lock(),
                "marker": owner.map(|s| s.id),
            })))
        }));
        manager.register_plugin(Scripted::new("outer", |ctx| {
            let same = ctx.execute_plugin("inner", ctx.module(), Parameters::new())?;
            let held = ctx.registry().contains(ctx.module());
            let other = ctx.execute_plugin("inner", &ModuleAddress::new("B"), Parameters::new())?;
            Ok(Some(json!({
                "same": same.payload().cloned(),
                "other": other.payload().cloned(),
                "still_registered": held,
            })))
        }));

        let result = manager
            .execute_plugin("outer", &addr("A"), Parameters::new(), None)
            .unwrap();
        let payload = result.payload().unwrap();
        assert_eq!(payload["same"]["depth"], json!(1));
        assert_eq!(payload["same"]["new_lock"], json!(false));
        assert_eq!(payload["same"]["marker"], json!("inner"));
        assert_eq!(payload["other"]["new_lock"], json!(true));
        assert_eq!(manager.arbiter().locked_count(), 0);
        assert_eq!(manager.service_calls().len(), 3);
    }

    #[test]
    fn test_call_on_ended_process_fails_fast() {
        let manager = manager();
        let process = manager.create_service_process("done");
        process.set_success_state();
        let service = ServiceDescriptor::new("s", "S", "s");
        let err = manager
            .create_service_call(&service, &addr("M"), Parameters::new(), Parameters::new(), &process)
            .unwrap_err();
        assert_eq!(err, CoreError::ProcessNotRunning(process.id()));
    }

    #[test]
    fn test_blocked_process_is_reported() {
        let manager = manager();
        let service = ServiceDescriptor::new("s", "S", "s");
        let holder = manager.create_service_process("holder");
        let call = manager
            .create_service_call(&service, &addr("M"), Parameters::new(), Parameters::new(), &holder)
            .unwrap();
        assert_eq!(manager.blocked_modules(&holder), vec![addr("M")]);

        let waiter = {
            let manager = manager.clone();
            let service = service.clone();
            thread::spawn(move || {
                let process = manager.create_service_process("waiter");
                let call = manager.create_service_call(
                    &service,
                    &addr("M"),
                    Parameters::new(),
                    Parameters::new(),
                    &process,
                )?;
                call.finish(ServiceResult::ok(None))?;
                manager.end_service_call(&call)?;
                process.set_success_state();
                Ok::<_, CoreError>(())
            })
        };

        while !manager.service_processes().iter().any(|p| p.is_blocked()) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(manager.running_service_processes().len(), 2);

        call.finish(ServiceResult::ok(None)).unwrap();
        manager.end_service_call(&call).unwrap();
        holder.set_success_state();
        waiter.join().unwrap().unwrap();

        assert_eq!(manager.remove_all_service_processes(), 2);
        assert!(manager.service_calls().is_empty());
    }

    #[test]
    fn test_terminate_all_interrupts_waiters() {
        let manager = manager();
        let service = ServiceDescriptor::new("s", "S", "s");
        let holder = manager.create_service_process("holder");
        let call = manager
            .create_service_call(&service, &addr("M"), Parameters::new(), Parameters::new(), &holder)
            .unwrap();

        let waiter = {
            let manager = manager.clone();
            let service = service.clone();
            thread::spawn(move || {
                let process = manager.create_service_process("waiter");
                manager
                    .create_service_call(&service, &addr("M"), Parameters::new(), Parameters::new(), &process)
                    .map(|_| ())
            })
        };

        while !manager.service_processes().iter().any(|p| p.is_blocked()) {
            thread::sleep(Duration::from_millis(1));
        }
        let waiting = manager
            .service_processes()
            .into_iter()
            .find(|p| p.is_blocked())
            .unwrap();
        waiting.interrupt();

        assert!(waiter.join().unwrap().unwrap_err().is_interrupted());
        assert_eq!(manager.arbiter().lock_owner(&addr("M")), Some(holder.id()));

        call.finish(ServiceResult::ok(None)).unwrap();
        manager.end_service_call(&call).unwrap();
        assert_eq!(manager.terminate_all_service_processes(), 1);
        thread_context::clear_interrupt();
    }

    #[test]
    fn test_cancel_after_executor_ended_its_own_call() {
        let manager = manager();
        manager.register_plugin(Scripted::new("self-ending", |ctx| {
            ctx.call().finish(ServiceResult::ok(Some(json!("done"))))?;
            Err(CoreError::Interrupted("stop".into()))
        }));

        let err = manager
            .execute_plugin("self-ending", &addr("M"), Parameters::new(), None)
            .unwrap_err();
        assert!(err.is_interrupted());

        let call = &manager.service_calls()[0];
        assert_eq!(call.status(), CallStatus::Finished);
        assert_eq!(call.result().unwrap().payload(), Some(&json!("done")));
        assert!(manager.service_processes()[0].was_failure());
        assert_eq!(manager.arbiter().locked_count(), 0);
    }

    #[test]
    fn test_payload_retention() {
        let config = SchedulerConfig {
            lock_poll_interval_ms: 10,
            retain_payloads: false,
            max_retained_calls: 2,
            ..Default::default()
        };
        let manager = ServiceProcessManager::new(ModuleRegistry::new(), config).unwrap();
        manager.register_plugin(Scripted::new("value", |_| payload(&vec![1, 2, 3])));

        for _ in 0..3 {
            let result = manager
                .execute_plugin("value", &addr("M"), Parameters::new(), None)
                .unwrap();
            assert_eq!(result.payload(), Some(&json!([1, 2, 3])));
        }

        let calls = manager.service_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.result().unwrap().payload().is_none()));
        assert_eq!(manager.plugins().len(), 1);
    }
}
