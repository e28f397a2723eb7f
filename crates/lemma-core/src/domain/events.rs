use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::module_state::ModuleState;
use crate::types::ModuleAddress;

/// Event emitted for every state-changing operation on a module record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModuleEvent {
    /// The module entered the pipeline for the first time
    Added {
        /// The module
        module: ModuleAddress,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },

    /// The module was deleted
    Removed {
        /// The module
        module: ModuleAddress,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },

    /// One or more stages changed
    StateChanged {
        /// The module
        module: ModuleAddress,
        /// Stages after the change
        state: ModuleState,
        /// Readable description of `state`
        description: String,
        /// When the event occurred
        timestamp: DateTime<Utc>,
    },
}

impl ModuleEvent {
    pub(crate) fn added(module: &ModuleAddress) -> Self {
        ModuleEvent::Added {
            module: module.clone(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn removed(module: &ModuleAddress) -> Self {
        ModuleEvent::Removed {
            module: module.clone(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn state_changed(module: &ModuleAddress, state: ModuleState) -> Self {
        ModuleEvent::StateChanged {
            module: module.clone(),
            state,
            description: state.description(),
            timestamp: Utc::now(),
        }
    }

    /// Returns the type of the event as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            ModuleEvent::Added { .. } => "module.added",
            ModuleEvent::Removed { .. } => "module.removed",
            ModuleEvent::StateChanged { .. } => "module.state_changed",
        }
    }

    /// Returns the module this event is associated with
    pub fn module(&self) -> &ModuleAddress {
        match self {
            ModuleEvent::Added { module, .. }
            | ModuleEvent::Removed { module, .. }
            | ModuleEvent::StateChanged { module, .. } => module,
        }
    }

    /// Returns the timestamp when the event occurred
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ModuleEvent::Added { timestamp, .. }
            | ModuleEvent::Removed { timestamp, .. }
            | ModuleEvent::StateChanged { timestamp, .. } => *timestamp,
        }
    }
}

/// Observer of module events (the event-log collaborator)
pub trait ModuleEventListener: Send + Sync {
    /// Handle a module event
    fn handle_event(&self, event: &ModuleEvent);
}

/// Event log writing every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl ModuleEventListener for TracingEventLog {
    fn handle_event(&self, event: &ModuleEvent) {
        match event {
            ModuleEvent::Added { module, .. } => {
                info!(module = %module, "Module added");
            }
            ModuleEvent::Removed { module, .. } => {
                info!(module = %module, "Module removed");
            }
            ModuleEvent::StateChanged {
                module,
                description,
                ..
            } => {
                debug!(module = %module, state = %description, "Module state changed");
            }
        }
    }
}
