//! One invocation of a service on a module.
//!
//! Calls of one process form a stack through their parent links. A call
//! ends exactly once, either by `finish` or by `interrupt`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::application::service_process::ServiceProcess;
use crate::application::service_result::ServiceResult;
use crate::error::CoreError;
use crate::types::{CallId, ModuleAddress, Parameters, ProcessId, ServiceDescriptor};

/// Lifecycle of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    /// Executing or waiting for its module lock
    Running,
    /// Ended by `finish`
    Finished,
    /// Ended by `interrupt`
    Interrupted,
}

#[derive(Debug)]
struct CallState {
    status: CallStatus,
    result: Option<ServiceResult>,
    ended_at: Option<DateTime<Utc>>,
    ended: Option<Instant>,
    paused_since: Option<Instant>,
    paused_total: Duration,
    percentage: f64,
    action: String,
    warnings: bool,
    errors: bool,
    new_lock: bool,
}

/// A service invocation on a module, owned by one process
#[derive(Debug)]
pub struct ServiceCall {
    id: CallId,
    service: ServiceDescriptor,
    module: ModuleAddress,
    config: Parameters,
    params: Parameters,
    process_id: ProcessId,
    process: Weak<ServiceProcess>,
    parent: Option<Arc<ServiceCall>>,
    begun_at: DateTime<Utc>,
    begun: Instant,
    state: Mutex<CallState>,
}

impl ServiceCall {
    pub(crate) fn new(
        id: CallId,
        service: ServiceDescriptor,
        module: ModuleAddress,
        config: Parameters,
        params: Parameters,
        process: &Arc<ServiceProcess>,
        parent: Option<Arc<ServiceCall>>,
    ) -> Self {
        let action = service.action.clone();
        Self {
            id,
            service,
            module,
            config,
            params,
            process_id: process.id(),
            process: Arc::downgrade(process),
            parent,
            begun_at: Utc::now(),
            begun: Instant::now(),
            state: Mutex::new(CallState {
                status: CallStatus::Running,
                result: None,
                ended_at: None,
                ended: None,
                paused_since: None,
                paused_total: Duration::ZERO,
                percentage: 0.0,
                action,
                warnings: false,
                errors: false,
                new_lock: false,
            }),
        }
    }

    /// Call id
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Invoked service
    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    /// Target module
    pub fn module(&self) -> &ModuleAddress {
        &self.module
    }

    /// Service configuration
    pub fn config(&self) -> &Parameters {
        &self.config
    }

    /// Call parameters
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Owning process id
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Owning process, while it exists
    pub fn process(&self) -> Option<Arc<ServiceProcess>> {
        self.process.upgrade()
    }

    /// Calling call, absent for a top-level call
    pub fn parent(&self) -> Option<&Arc<ServiceCall>> {
        self.parent.as_ref()
    }

    /// Number of ancestors
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_ref();
        while let Some(call) = current {
            depth += 1;
            current = call.parent.as_ref();
        }
        depth
    }

    /// Current status
    pub fn status(&self) -> CallStatus {
        self.state.lock().status
    }

    /// Still running
    pub fn is_running(&self) -> bool {
        self.status() == CallStatus::Running
    }

    /// When the call began
    pub fn begin_time(&self) -> DateTime<Utc> {
        self.begun_at
    }

    /// When the call ended
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().ended_at
    }

    /// Result, once ended
    pub fn result(&self) -> Option<ServiceResult> {
        self.state.lock().result.clone()
    }

    /// Running time, excluding time spent waiting for the module lock
    pub fn duration(&self) -> Duration {
        let state = self.state.lock();
        let now = Instant::now();
        let end = state.ended.unwrap_or(now);
        let mut paused = state.paused_total;
        if let Some(since) = state.paused_since {
            paused += end.saturating_duration_since(since);
        }
        end.saturating_duration_since(self.begun).saturating_sub(paused)
    }

    /// Stop the duration clock
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.paused_since.is_none() {
            state.paused_since = Some(Instant::now());
        }
    }

    /// Restart the duration clock
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if let Some(since) = state.paused_since.take() {
            state.paused_total += since.elapsed();
        }
    }

    /// Live progress: `percentage` is clamped to 0..=100
    pub fn set_progress(&self, percentage: f64, description: impl Into<String>) {
        let mut state = self.state.lock();
        state.percentage = percentage.clamp(0.0, 100.0);
        state.action = description.into();
    }

    /// Progress in percent
    pub fn execution_percentage(&self) -> f64 {
        self.state.lock().percentage
    }

    /// What the call is doing right now
    pub fn execution_action_description(&self) -> String {
        self.state.lock().action.clone()
    }

    /// Record that the service reported warnings
    pub fn flag_warnings(&self) {
        self.state.lock().warnings = true;
    }

    /// Record that the service reported errors
    pub fn flag_errors(&self) {
        self.state.lock().errors = true;
    }

    /// Warnings reported so far
    pub fn has_warnings(&self) -> bool {
        self.state.lock().warnings
    }

    /// Errors reported so far
    pub fn has_errors(&self) -> bool {
        self.state.lock().errors
    }

    /// End the call with `result`
    pub fn finish(&self, result: ServiceResult) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        self.ensure_running(&state)?;
        if result.is_ok() {
            state.percentage = 100.0;
        }
        state.status = CallStatus::Finished;
        state.result = Some(result);
        Self::stamp_end(&mut state);
        Ok(())
    }

    /// End the call as cancelled
    pub fn interrupt(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        self.ensure_running(&state)?;
        state.status = CallStatus::Interrupted;
        state.result = Some(ServiceResult::interrupted());
        Self::stamp_end(&mut state);
        Ok(())
    }

    /// Forget the result payload
    pub fn drop_payload(&self) {
        if let Some(result) = self.state.lock().result.as_mut() {
            result.drop_payload();
        }
    }

    pub(crate) fn set_new_lock(&self, new_lock: bool) {
        self.state.lock().new_lock = new_lock;
    }

    /// Did this call acquire the module lock (rather than inherit it)?
    pub fn has_new_lock(&self) -> bool {
        self.state.lock().new_lock
    }

    fn ensure_running(&self, state: &CallState) -> Result<(), CoreError> {
        if state.status == CallStatus::Running {
            Ok(())
        } else {
            Err(CoreError::CallAlreadyFinished(format!(
                "call {} of {} on {} is {:?}",
                self.id, self.service, self.module, state.status
            )))
        }
    }

    fn stamp_end(state: &mut CallState) {
        let now = Instant::now();
        if let Some(since) = state.paused_since.take() {
            state.paused_total += now.saturating_duration_since(since);
        }
        state.ended = Some(now);
        state.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(parent: Option<Arc<ServiceCall>>, id: u64) -> (Arc<ServiceProcess>, Arc<ServiceCall>) {
        let process = Arc::new(ServiceProcess::new(ProcessId(1), "test"));
        let call = Arc::new(ServiceCall::new(
            CallId(id),
            ServiceDescriptor::new("wf", "Well-formedness", "checking well-formedness"),
            ModuleAddress::new("M012"),
            Parameters::new(),
            Parameters::new().with("strict", true),
            &process,
            parent,
        ));
        (process, call)
    }

    #[test]
    fn test_new_call() {
        let (process, call) = call(None, 7);
        assert_eq!(call.id(), CallId(7));
        assert_eq!(call.process_id(), process.id());
        assert!(call.process().is_some());
        assert!(call.parent().is_none());
        assert!(call.is_running());
        assert_eq!(call.execution_action_description(), "checking well-formedness");
        assert_eq!(call.params().get_bool("strict"), Some(true));
    }

    #[test]
    fn test_finish_exactly_once() {
        let (_process, call) = call(None, 1);
        call.set_progress(40.0, "axiom 3");
        assert_eq!(call.execution_percentage(), 40.0);

        call.finish(ServiceResult::ok(Some(json!(1)))).unwrap();
        assert_eq!(call.status(), CallStatus::Finished);
        assert_eq!(call.execution_percentage(), 100.0);
        assert!(call.end_time().is_some());

        assert!(matches!(
            call.finish(ServiceResult::ok(None)),
            Err(CoreError::CallAlreadyFinished(_))
        ));
        assert!(call.interrupt().is_err());

        call.drop_payload();
        assert!(call.result().unwrap().payload().is_none());
    }

    #[test]
    fn test_interrupt() {
        let (_process, call) = call(None, 1);
        call.interrupt().unwrap();
        assert_eq!(call.status(), CallStatus::Interrupted);
        assert!(call.result().unwrap().was_interrupted());
    }

    #[test]
    fn test_parent_chain_depth() {
        let (_p1, top) = call(None, 1);
        let (_p2, nested) = call(Some(top.clone()), 2);
        let (_p3, deepest) = call(Some(nested.clone()), 3);
        assert_eq!(top.depth(), 0);
        assert_eq!(deepest.depth(), 2);
        assert_eq!(deepest.parent().unwrap().id(), CallId(2));
    }

    #[test]
    fn test_duration_excludes_pause() {
        let (_process, call) = call(None, 1);
        call.pause();
        std::thread::sleep(Duration::from_millis(50));
        call.resume();
        call.finish(ServiceResult::ok(None)).unwrap();
        assert!(call.duration() < Duration::from_millis(50));
    }

    #[test]
    fn test_progress_is_clamped() {
        let (_process, call) = call(None, 1);
        call.set_progress(250.0, "overflow");
        assert_eq!(call.execution_percentage(), 100.0);
        call.set_progress(-1.0, "underflow");
        assert_eq!(call.execution_percentage(), 0.0);
        call.flag_warnings();
        assert!(call.has_warnings());
        assert!(!call.has_errors());
    }
}
