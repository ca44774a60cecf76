//! Notification recorder

use clearance_core::{AccessEvent, NotificationEffects};
use parking_lot::Mutex;

/// Keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<AccessEvent>>,
}

impl RecordingNotifier {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<AccessEvent> {
        self.events.lock().clone()
    }

    /// Number of events named `name` (see [`AccessEvent::name`]).
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl NotificationEffects for RecordingNotifier {
    fn notify(&self, event: AccessEvent) {
        self.events.lock().push(event);
    }
}
