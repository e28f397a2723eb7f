//! Exclusive module locks.
//!
//! At most one process owns a module at a time. A contended `lock` waits on
//! a condition variable for at most one poll interval, then checks the
//! calling thread's cancellation flag before retrying.

use lemma_monitoring::SchedulerMetrics;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::application::service_process::ServiceProcess;
use crate::application::thread_context;
use crate::error::CoreError;
use crate::types::{ModuleAddress, ProcessId, ServiceDescriptor};

/// Lock table: module to owning process
#[derive(Debug)]
pub struct ModuleArbiter {
    locks: Mutex<HashMap<ModuleAddress, ProcessId>>,
    released: Condvar,
    poll_interval: Duration,
    metrics: SchedulerMetrics,
}

impl ModuleArbiter {
    /// Arbiter waking contended waiters at least every `poll_interval`
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_metrics(poll_interval, SchedulerMetrics::disabled())
    }

    /// Arbiter reporting lock waits to `metrics`
    pub fn with_metrics(poll_interval: Duration, metrics: SchedulerMetrics) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            poll_interval,
            metrics,
        }
    }

    /// Acquire `module` for `process`.
    ///
    /// Returns `Ok(false)` without waiting if `process` already owns it and
    /// `Ok(true)` once newly acquired. While waiting the process is marked
    /// blocked. If the calling thread is interrupted while waiting, the
    /// process is marked failed and `CoreError::Interrupted` is returned.
    pub fn lock(
        &self,
        process: &ServiceProcess,
        module: &ModuleAddress,
        service: &ServiceDescriptor,
    ) -> Result<bool, CoreError> {
        let mut locks = self.locks.lock();
        if locks.get(module) == Some(&process.id()) {
            trace!(module = %module, process_id = %process.id(), "Lock already owned");
            return Ok(false);
        }

        let mut waiting_since: Option<Instant> = None;
        loop {
            if !locks.contains_key(module) {
                locks.insert(module.clone(), process.id());
                break;
            }

            if waiting_since.is_none() {
                debug!(
                    module = %module,
                    process_id = %process.id(),
                    owner = %locks[module],
                    service = %service,
                    "Waiting for module lock"
                );
                process.set_blocked(true);
                waiting_since = Some(Instant::now());
            }

            self.released.wait_for(&mut locks, self.poll_interval);

            if thread_context::is_interrupted() {
                drop(locks);
                process.set_blocked(false);
                process.set_failure_state();
                debug!(module = %module, process_id = %process.id(), "Lock wait interrupted");
                return Err(CoreError::Interrupted(format!(
                    "process {} was interrupted while waiting for {}",
                    process.id(),
                    module
                )));
            }
        }
        drop(locks);

        if let Some(since) = waiting_since {
            process.set_blocked(false);
            let waited = since.elapsed();
            debug!(
                module = %module,
                process_id = %process.id(),
                waited_ms = waited.as_millis() as u64,
                "Acquired contended module lock"
            );
            self.metrics
                .record_lock_wait(module.as_str(), waited.as_secs_f64() * 1000.0);
        } else {
            trace!(module = %module, process_id = %process.id(), service = %service, "Acquired module lock");
        }
        Ok(true)
    }

    /// Release `module` held by `process`.
    ///
    /// `Ok(false)` if nobody holds it; `CoreError::LockNotOwned` if another
    /// process does.
    pub fn unlock(&self, process: &ServiceProcess, module: &ModuleAddress) -> Result<bool, CoreError> {
        let mut locks = self.locks.lock();
        match locks.get(module).copied() {
            Some(owner) if owner == process.id() => {
                locks.remove(module);
                drop(locks);
                self.released.notify_all();
                trace!(module = %module, process_id = %process.id(), "Released module lock");
                Ok(true)
            }
            Some(owner) => Err(CoreError::LockNotOwned {
                module: module.clone(),
                owner,
                requester: process.id(),
            }),
            None => Ok(false),
        }
    }

    /// Modules currently locked by `process`, sorted
    pub fn blocked_modules(&self, process: ProcessId) -> Vec<ModuleAddress> {
        let mut modules: Vec<ModuleAddress> = self
            .locks
            .lock()
            .iter()
            .filter(|(_, owner)| **owner == process)
            .map(|(module, _)| module.clone())
            .collect();
        modules.sort();
        modules
    }

    /// Process owning `module`
    pub fn lock_owner(&self, module: &ModuleAddress) -> Option<ProcessId> {
        self.locks.lock().get(module).copied()
    }

    /// Number of locked modules
    pub fn locked_count(&self) -> usize {
        self.locks.lock().len()
    }
}
