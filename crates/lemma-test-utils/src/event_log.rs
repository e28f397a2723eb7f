//! Event log recording every module event for later inspection.

use lemma_core::{ModuleEvent, ModuleEventListener, ModuleState};
use parking_lot::Mutex;

/// Event listener keeping every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventLog {
    events: Mutex<Vec<ModuleEvent>>,
}

impl RecordingEventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far, oldest first
    pub fn events(&self) -> Vec<ModuleEvent> {
        self.events.lock().clone()
    }

    /// Number of events of `event_type` about `module`
    pub fn count(&self, event_type: &str, module: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type && e.module().as_str() == module)
            .count()
    }

    /// States reported for `module`, oldest first
    pub fn states_of(&self, module: &str) -> Vec<ModuleState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ModuleEvent::StateChanged { module: m, state, .. } if m.as_str() == module => {
                    Some(*state)
                }
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ModuleEventListener for RecordingEventLog {
    fn handle_event(&self, event: &ModuleEvent) {
        self.events.lock().push(event.clone());
    }
}
