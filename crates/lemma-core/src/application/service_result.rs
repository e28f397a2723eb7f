use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a service call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceOutcome {
    /// Cancelled before it could finish
    Interrupted,
    /// Executor returned normally
    Ok,
    /// Executor faulted with the given message
    Failed(String),
}

/// Result of one service call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResult {
    outcome: ServiceOutcome,
    has_warnings: bool,
    has_errors: bool,
    payload: Option<Value>,
}

impl ServiceResult {
    /// Normal completion
    pub fn ok(payload: Option<Value>) -> Self {
        Self {
            outcome: ServiceOutcome::Ok,
            has_warnings: false,
            has_errors: false,
            payload,
        }
    }

    /// Executor fault; always flags errors
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            outcome: ServiceOutcome::Failed(message.into()),
            has_warnings: false,
            has_errors: true,
            payload: None,
        }
    }

    /// Cancellation
    pub fn interrupted() -> Self {
        Self {
            outcome: ServiceOutcome::Interrupted,
            has_warnings: false,
            has_errors: false,
            payload: None,
        }
    }

    /// Set the warning and error flags reported by the executor
    pub fn with_flags(mut self, warnings: bool, errors: bool) -> Self {
        self.has_warnings |= warnings;
        self.has_errors |= errors;
        self
    }

    /// Outcome
    pub fn outcome(&self) -> &ServiceOutcome {
        &self.outcome
    }

    /// The executor returned normally
    pub fn is_ok(&self) -> bool {
        self.outcome == ServiceOutcome::Ok
    }

    /// The call was cancelled
    pub fn was_interrupted(&self) -> bool {
        self.outcome == ServiceOutcome::Interrupted
    }

    /// Warnings were reported
    pub fn has_warnings(&self) -> bool {
        self.has_warnings
    }

    /// Errors were reported or the executor faulted
    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    /// Fault message
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            ServiceOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// Executor payload
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Forget the payload
    pub fn drop_payload(&mut self) {
        self.payload = None;
    }

    /// Short label for logs and metrics
    pub fn outcome_label(&self) -> &'static str {
        match self.outcome {
            ServiceOutcome::Interrupted => "interrupted",
            ServiceOutcome::Ok if self.has_errors => "ok_with_errors",
            ServiceOutcome::Ok => "ok",
            ServiceOutcome::Failed(_) => "failed",
        }
    }
}
