use thiserror::Error;

use crate::types::{ModuleAddress, ProcessId};

/// Core error type for the Lemma scheduler
///
/// Contract violations (illegal stage transitions, lock ownership breaches,
/// use of dead processes) indicate programming errors in the caller.
/// `Interrupted` is the cooperative cancellation signal and is never logged
/// as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A stage setter was called before its predecessor stage succeeded
    #[error("Illegal state transition for {module}: {message}")]
    IllegalStateTransition {
        /// Module whose record was touched
        module: ModuleAddress,
        /// What was attempted and why it is not allowed
        message: String,
    },

    /// The module record was deleted and can no longer change
    #[error("Module was deleted: {0}")]
    ModuleDeleted(ModuleAddress),

    /// A process tried to release a lock held by another process
    #[error("Lock on {module} is held by process {owner}, not by process {requester}")]
    LockNotOwned {
        /// Locked module
        module: ModuleAddress,
        /// Process owning the lock
        owner: ProcessId,
        /// Process that tried to release it
        requester: ProcessId,
    },

    /// A service call was requested on a process that is no longer running
    #[error("Service process {0} is not running")]
    ProcessNotRunning(ProcessId),

    /// A service call was finished or interrupted twice
    #[error("Service call already finished: {0}")]
    CallAlreadyFinished(String),

    /// Cooperative cancellation
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// No executor is registered under the requested id
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// A service failed while executing
    #[error("Service execution error: {0}")]
    ServiceExecutionError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// True for errors that indicate a broken calling discipline
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            CoreError::IllegalStateTransition { .. }
                | CoreError::ModuleDeleted(_)
                | CoreError::LockNotOwned { .. }
                | CoreError::ProcessNotRunning(_)
                | CoreError::CallAlreadyFinished(_)
        )
    }

    /// True for the cancellation signal
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CoreError::Interrupted(_))
    }

    pub(crate) fn illegal(module: &ModuleAddress, message: impl Into<String>) -> Self {
        CoreError::IllegalStateTransition {
            module: module.clone(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
