//! A worker running service calls on one thread.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::{debug, warn};

use crate::application::service_call::ServiceCall;
use crate::application::thread_context::ThreadHandle;
use crate::types::{ModuleAddress, ProcessId};

/// Lifecycle of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Working or waiting for a module lock
    Running,
    /// Ended normally
    Succeeded,
    /// Faulted, was cancelled or its thread died
    Failed,
}

#[derive(Debug)]
struct ProcessState {
    status: ProcessStatus,
    blocked: bool,
    current: Option<Arc<ServiceCall>>,
    stopped_at: Option<DateTime<Utc>>,
    final_percentage: f64,
    final_action: String,
}

/// A worker bound to the thread that created it.
///
/// Terminal states are idempotent: the first transition out of `Running`
/// wins and later ones are ignored.
#[derive(Debug)]
pub struct ServiceProcess {
    id: ProcessId,
    label: String,
    thread: ThreadHandle,
    started_at: DateTime<Utc>,
    state: Mutex<ProcessState>,
}

impl ServiceProcess {
    /// Process bound to the calling thread
    pub(crate) fn new(id: ProcessId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            thread: ThreadHandle::current(),
            started_at: Utc::now(),
            state: Mutex::new(ProcessState {
                status: ProcessStatus::Running,
                blocked: false,
                current: None,
                stopped_at: None,
                final_percentage: 0.0,
                final_action: String::new(),
            }),
        }
    }

    /// Process id
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Label given at creation
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Owning thread
    pub fn thread(&self) -> &ThreadHandle {
        &self.thread
    }

    /// Owning thread id
    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }

    /// Status. A running process whose thread died becomes `Failed`.
    pub fn status(&self) -> ProcessStatus {
        let mut state = self.state.lock();
        if state.status == ProcessStatus::Running && !self.thread.is_alive() {
            warn!(process_id = %self.id, label = %self.label, "Thread of service process died");
            Self::terminate(&mut state, ProcessStatus::Failed);
        }
        state.status
    }

    /// Running (possibly blocked)
    pub fn is_running(&self) -> bool {
        self.status() == ProcessStatus::Running
    }

    /// Running and waiting for a module lock
    pub fn is_blocked(&self) -> bool {
        self.is_running() && self.state.lock().blocked
    }

    /// Ended normally
    pub fn was_successful(&self) -> bool {
        self.status() == ProcessStatus::Succeeded
    }

    /// Faulted, cancelled or lost its thread
    pub fn was_failure(&self) -> bool {
        self.status() == ProcessStatus::Failed
    }

    /// Mark as ended normally
    pub fn set_success_state(&self) {
        let mut state = self.state.lock();
        if state.status == ProcessStatus::Running {
            Self::terminate(&mut state, ProcessStatus::Succeeded);
            debug!(process_id = %self.id, "Service process succeeded");
        }
    }

    /// Mark as failed
    pub fn set_failure_state(&self) {
        let mut state = self.state.lock();
        if state.status == ProcessStatus::Running {
            Self::terminate(&mut state, ProcessStatus::Failed);
            debug!(process_id = %self.id, "Service process failed");
        }
    }

    pub(crate) fn set_blocked(&self, blocked: bool) {
        self.state.lock().blocked = blocked;
    }

    /// Raise the cancellation flag of the owning thread
    pub fn interrupt(&self) {
        debug!(process_id = %self.id, "Interrupting service process");
        self.thread.interrupt();
    }

    /// Innermost running call
    pub fn current_call(&self) -> Option<Arc<ServiceCall>> {
        self.state.lock().current.clone()
    }

    pub(crate) fn set_current_call(&self, call: Option<Arc<ServiceCall>>) {
        self.state.lock().current = call;
    }

    /// Modules of the current call chain, outermost first, without repeats
    pub fn processed_modules(&self) -> Vec<ModuleAddress> {
        let mut chain = Vec::new();
        let mut current = self.current_call();
        while let Some(call) = current {
            chain.push(call.module().clone());
            current = call.parent().cloned();
        }
        chain.reverse();

        let mut seen = HashSet::new();
        chain.retain(|module| seen.insert(module.clone()));
        chain
    }

    /// Progress of the current call while running, frozen afterwards
    pub fn execution_percentage(&self) -> f64 {
        if self.is_running() {
            return self
                .current_call()
                .map(|call| call.execution_percentage())
                .unwrap_or(0.0);
        }
        self.state.lock().final_percentage
    }

    /// Action of the current call while running, frozen afterwards
    pub fn execution_action_description(&self) -> String {
        if self.is_running() {
            return self
                .current_call()
                .map(|call| call.execution_action_description())
                .unwrap_or_default();
        }
        self.state.lock().final_action.clone()
    }

    /// When the process started
    pub fn start_time(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the process ended
    pub fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().stopped_at
    }

    /// Wall-clock run time so far
    pub fn duration(&self) -> chrono::Duration {
        self.stop_time().unwrap_or_else(Utc::now) - self.started_at
    }

    fn terminate(state: &mut ProcessState, status: ProcessStatus) {
        let (percentage, action) = match (&state.current, status) {
            (_, ProcessStatus::Succeeded) => (100.0, "finished".to_string()),
            (Some(call), _) => (
                call.execution_percentage(),
                format!("failed: {}", call.execution_action_description()),
            ),
            (None, _) => (0.0, "failed".to_string()),
        };
        state.status = status;
        state.blocked = false;
        state.stopped_at = Some(Utc::now());
        state.final_percentage = percentage;
        state.final_action = action;
    }
}
