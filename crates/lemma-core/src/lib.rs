//!
//! Lemma Core - verification-stage scheduler for the Lemma platform
//!
//! This crate defines the per-module stage lattice and its state manager,
//! the module lock arbiter, and the service processes and calls that run
//! pluggable analysis services on modules.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde_json::Value;

/// Domain layer - module records, stage lattice, dependency graph
pub mod domain;

/// Application layer - arbiter, processes, calls, manager
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

/// Scheduler configuration
pub mod config;

// Re-export key types
pub use config::SchedulerConfig;
pub use error::CoreError;
pub use types::{CallId, ModuleAddress, Parameters, ProcessId, ServiceDescriptor};

pub use domain::diagnostics::{Diagnostic, ModuleDiagnostics, PluginResults, Severity};
pub use domain::events::{ModuleEvent, ModuleEventListener, TracingEventLog};
pub use domain::module_record::{
    ExistenceChecker, LabelTable, ModuleContent, ModuleRecord, ModuleReference,
};
pub use domain::module_state::{
    CheckPhase, CheckingState, DependencyState, ImportsState, LoadingFailure, LoadingPhase,
    LoadingState, ModuleState,
};
pub use domain::registry::ModuleRegistry;
pub use domain::state_manager::StateManager;

pub use application::arbiter::ModuleArbiter;
pub use application::async_runner::AsyncServiceRunner;
pub use application::context::ServiceContext;
pub use application::process_manager::{payload, ServiceProcessManager};
pub use application::service_call::{CallStatus, ServiceCall};
pub use application::service_process::{ProcessStatus, ServiceProcess};
pub use application::service_result::{ServiceOutcome, ServiceResult};

/// A pluggable analysis service.
///
/// `execute` runs on the worker thread of the calling process while the
/// target module is locked. Returning `Err(CoreError::Interrupted)` cancels
/// the whole process; any other error, or a panic, fails the call.
pub trait ServiceExecutor: Send + Sync {
    /// Id, name and action of the service
    fn descriptor(&self) -> &ServiceDescriptor;

    /// Configuration handed to every call of this service
    fn configuration(&self) -> Parameters {
        Parameters::new()
    }

    /// Work on `context.module()`
    fn execute(&self, context: &ServiceContext) -> Result<Option<Value>, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop {
        descriptor: ServiceDescriptor,
    }

    impl ServiceExecutor for Noop {
        fn descriptor(&self) -> &ServiceDescriptor {
            &self.descriptor
        }

        fn execute(&self, _context: &ServiceContext) -> Result<Option<Value>, CoreError> {
            Ok(None)
        }
    }

    #[test]
    fn test_executor_defaults() {
        let noop = Noop {
            descriptor: ServiceDescriptor::new("noop", "No-op", "doing nothing"),
        };
        assert!(noop.configuration().is_empty());
        assert_eq!(noop.descriptor().to_string(), "No-op (noop)");
    }
}
