//! Scripted service executors.
//!
//! `ScriptedExecutor` plays one fixed behavior per call. `PipelineExecutor`
//! drives a module through all five stages, loading its required modules as
//! nested calls.

use lemma_core::{
    CheckPhase, CoreError, Diagnostic, ExistenceChecker, LabelTable, LoadingFailure, LoadingPhase,
    ModuleAddress, ModuleContent, ModuleReference, Parameters, ServiceContext, ServiceDescriptor,
    ServiceExecutor,
};
use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// What a scripted executor does when called
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return the payload
    Succeed(Option<Value>),
    /// Flag warnings, then succeed
    Warn,
    /// Return `ServiceExecutionError` with the message
    Fail(String),
    /// Panic with the message
    Panic(String),
    /// Interrupt the own process and observe the cancellation
    Cancel,
    /// Wait at the gate until it opens or the process is interrupted
    Gated(Arc<Gate>),
    /// Run a registered plugin as a nested call, on `module` or the own module
    Nested {
        /// Plugin to run
        plugin: String,
        /// Target, defaults to the module of the calling call
        module: Option<ModuleAddress>,
    },
}

/// Executor playing a fixed behavior
#[derive(Debug)]
pub struct ScriptedExecutor {
    descriptor: ServiceDescriptor,
    behavior: Behavior,
    invocations: AtomicUsize,
}

impl ScriptedExecutor {
    /// Executor `id` playing `behavior`
    pub fn new(id: &str, behavior: Behavior) -> Self {
        Self {
            descriptor: ServiceDescriptor::new(id, id, format!("running {}", id)),
            behavior,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Succeeds with an empty payload
    pub fn succeeding(id: &str) -> Arc<Self> {
        Arc::new(Self::new(id, Behavior::Succeed(None)))
    }

    /// Succeeds with warnings
    pub fn warning(id: &str) -> Arc<Self> {
        Arc::new(Self::new(id, Behavior::Warn))
    }

    /// Returns an execution error
    pub fn faulting(id: &str, message: &str) -> Arc<Self> {
        Arc::new(Self::new(id, Behavior::Fail(message.to_string())))
    }

    /// Panics
    pub fn panicking(id: &str, message: &str) -> Arc<Self> {
        Arc::new(Self::new(id, Behavior::Panic(message.to_string())))
    }

    /// Cancels its own process
    pub fn cancelling(id: &str) -> Arc<Self> {
        Arc::new(Self::new(id, Behavior::Cancel))
    }

    /// Waits at `gate`
    pub fn gated(id: &str, gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self::new(id, Behavior::Gated(gate)))
    }

    /// Runs `plugin` nested on `module`, or on its own module if `None`
    pub fn nested(id: &str, plugin: &str, module: Option<ModuleAddress>) -> Arc<Self> {
        Arc::new(Self::new(
            id,
            Behavior::Nested {
                plugin: plugin.to_string(),
                module,
            },
        ))
    }

    /// How often `execute` ran
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl ServiceExecutor for ScriptedExecutor {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn execute(&self, context: &ServiceContext) -> Result<Option<Value>, CoreError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        debug!(service = %self.descriptor.id, module = %context.module(), "Scripted executor running");

        match &self.behavior {
            Behavior::Succeed(payload) => Ok(payload.clone()),
            Behavior::Warn => {
                context.add_warning_flag();
                Ok(None)
            }
            Behavior::Fail(message) => Err(CoreError::ServiceExecutionError(message.clone())),
            Behavior::Panic(message) => panic!("{}", message),
            Behavior::Cancel => {
                context.process().interrupt();
                context.check_interrupted()?;
                Ok(None)
            }
            Behavior::Gated(gate) => {
                context.set_progress(0.0, "waiting at gate");
                gate.enter();
                while !gate.wait_open(Duration::from_millis(10)) {
                    context.check_interrupted()?;
                }
                Ok(None)
            }
            Behavior::Nested { plugin, module } => {
                let target = module.clone().unwrap_or_else(|| context.module().clone());
                let result = context.execute_plugin(plugin, &target, context.parameters().clone())?;
                Ok(Some(json!({
                    "ok": result.is_ok(),
                    "errors": result.has_errors(),
                    "payload": result.payload().cloned(),
                })))
            }
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    entered: usize,
    open: bool,
}

/// Rendezvous between a test and gated executors
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    /// A closed gate
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Let every waiting and future executor pass
    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }

    /// Number of executors that reached the gate
    pub fn entered(&self) -> usize {
        self.state.lock().entered
    }

    /// Wait until `count` executors reached the gate. False on timeout.
    pub fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.entered < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.entered >= count;
            }
        }
        true
    }

    fn enter(&self) {
        self.state.lock().entered += 1;
        self.changed.notify_all();
    }

    fn wait_open(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.open {
            self.changed.wait_for(&mut state, timeout);
        }
        state.open
    }
}

/// Existence checker knowing no constants
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyExistenceChecker;

impl ExistenceChecker for EmptyExistenceChecker {
    fn predicate_exists(&self, _name: &str, _arguments: usize) -> bool {
        false
    }

    fn function_exists(&self, _name: &str, _arguments: usize) -> bool {
        false
    }
}

/// Drives a module through all five stages.
///
/// Parameter `requires` maps module addresses to the addresses they
/// require; required modules are processed first as nested calls. Modules
/// listed under `broken` fail to load.
#[derive(Debug)]
pub struct PipelineExecutor {
    descriptor: ServiceDescriptor,
}

impl PipelineExecutor {
    /// Plugin id under which the pipeline registers
    pub const ID: &'static str = "pipeline";

    /// Create the executor
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            descriptor: ServiceDescriptor::new(Self::ID, "Pipeline", "verifying module"),
        })
    }

    /// Parameters declaring which module requires which
    pub fn requirements(graph: &[(&str, &[&str])]) -> Parameters {
        let map: serde_json::Map<String, Value> = graph
            .iter()
            .map(|(module, required)| (module.to_string(), json!(required)))
            .collect();
        Parameters::new().with("requires", Value::Object(map))
    }

    fn required_of(params: &Parameters, module: &ModuleAddress) -> Vec<ModuleAddress> {
        params
            .get("requires")
            .and_then(|graph| graph.get(module.as_str()))
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(ModuleAddress::new)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_broken(params: &Parameters, module: &ModuleAddress) -> bool {
        params
            .get("broken")
            .and_then(Value::as_array)
            .map(|list| list.iter().any(|m| m.as_str() == Some(module.as_str())))
            .unwrap_or(false)
    }
}

impl ServiceExecutor for PipelineExecutor {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn execute(&self, context: &ServiceContext) -> Result<Option<Value>, CoreError> {
        let module = context.module().clone();
        let state = context.state_manager();

        // Already being processed further up the call stack
        let mut ancestor = context.call().parent();
        while let Some(call) = ancestor {
            if call.module() == &module {
                return Ok(Some(json!("cycle")));
            }
            ancestor = call.parent();
        }
        if state.is_fully_formally_proved() {
            return Ok(Some(json!("proved")));
        }

        // Loading
        state.set_loading_progress_state(LoadingPhase::Locating)?;
        context.set_progress(10.0, "loading");
        if Self::is_broken(context.parameters(), &module) {
            state.set_loading_failure_state(
                LoadingFailure::LoadingFromBufferFailed,
                vec![Diagnostic::error(1, format!("cannot parse {}", module))],
            )?;
            context.add_error_flag();
            return Ok(Some(json!("broken")));
        }
        state.set_loaded(ModuleContent::new(module.to_string()), LabelTable::new())?;

        // Imports
        let required = Self::required_of(context.parameters(), &module);
        state.set_loading_imports_progress_state()?;
        state.set_loaded_imports(
            required
                .iter()
                .map(|r| ModuleReference::new(r.name(), r.clone()))
                .collect(),
        )?;

        // Required modules
        context.set_progress(30.0, "loading required modules");
        state.set_dependency_progress_state()?;
        for dependency in &required {
            context.check_interrupted()?;
            let result = context.execute_plugin(Self::ID, dependency, context.parameters().clone())?;
            let loaded = context
                .registry()
                .get(dependency)
                .map(|m| m.is_loaded())
                .unwrap_or(false);
            if !result.is_ok() || !loaded {
                state.set_dependency_failure_state(vec![Diagnostic::error(
                    2,
                    format!("required module {} could not be loaded", dependency),
                )])?;
                context.add_error_flag();
                return Ok(Some(json!("dependency failed")));
            }
        }
        state.set_loaded_required_modules(required)?;

        // Checks
        context.set_progress(60.0, "checking well-formedness");
        state.set_well_formed_progress_state(CheckPhase::Internal)?;
        state.set_well_formed(Arc::new(EmptyExistenceChecker))?;

        context.set_progress(80.0, "checking proofs");
        state.set_formally_proved_progress_state(CheckPhase::Internal)?;
        state.set_formally_proved()?;

        Ok(Some(json!("proved")))
    }
}
